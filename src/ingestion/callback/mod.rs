// Status callbacks
// Best-effort JSON notifications about an ingestion run, delivered in order by one task per run


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::database::models::IngestionStatus;
use crate::http::{HttpClient, run_blocking};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotification {
    pub external_id: String,
    pub status: IngestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_processed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusNotification {
    #[inline]
    pub fn processing(external_id: &str, chunks_processed: i64, total_chunks: i64) -> Self {
        Self {
            external_id: external_id.to_string(),
            status: IngestionStatus::Processing,
            chunks_processed: Some(chunks_processed),
            total_chunks: Some(total_chunks),
            error_message: None,
        }
    }

    #[inline]
    pub fn completed(external_id: &str, total_chunks: i64) -> Self {
        Self {
            external_id: external_id.to_string(),
            status: IngestionStatus::Completed,
            chunks_processed: Some(total_chunks),
            total_chunks: Some(total_chunks),
            error_message: None,
        }
    }

    #[inline]
    pub fn failed(external_id: &str, reason: &str) -> Self {
        Self {
            external_id: external_id.to_string(),
            status: IngestionStatus::Failed,
            chunks_processed: None,
            total_chunks: None,
            error_message: Some(reason.to_string()),
        }
    }
}

/// Whether progress after the chunk at zero-based `index` should be reported
#[inline]
pub fn should_report_progress(index: usize, total: usize, every: usize) -> bool {
    index % every.max(1) == 0 || index + 1 == total
}

#[derive(Debug, Clone)]
pub struct CallbackClient {
    http: HttpClient,
}

impl CallbackClient {
    #[inline]
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(timeout).with_retry_attempts(1),
        }
    }

    /// Start the sender for one run; without a URL every notification is dropped
    #[inline]
    pub fn start(&self, url: Option<Url>, cancelled: Arc<AtomicBool>) -> StatusNotifier {
        let Some(url) = url else {
            return StatusNotifier {
                sender: None,
                task: None,
            };
        };

        let (sender, mut receiver) = mpsc::unbounded_channel::<StatusNotification>();
        let http = self.http.clone();

        let task = tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                if cancelled.load(Ordering::SeqCst) {
                    debug!(
                        "Run for {} was cancelled, dropping pending callbacks",
                        notification.external_id
                    );
                    break;
                }

                let http = http.clone();
                let url = url.clone();
                let status = notification.status;
                let external_id = notification.external_id.clone();

                match run_blocking(move || http.post_json_once(&url, &notification)).await {
                    Ok(()) => debug!("Delivered {} callback for {}", status, external_id),
                    Err(e) => warn!(
                        "Failed to deliver {} callback for {}: {:#}",
                        status, external_id, e
                    ),
                }
            }
        });

        StatusNotifier {
            sender: Some(sender),
            task: Some(task),
        }
    }
}

/// Queue side of a run's callback sender
#[derive(Debug)]
pub struct StatusNotifier {
    sender: Option<mpsc::UnboundedSender<StatusNotification>>,
    task: Option<JoinHandle<()>>,
}

impl StatusNotifier {
    #[inline]
    pub fn notify(&self, notification: StatusNotification) {
        if let Some(sender) = &self.sender {
            if sender.send(notification).is_err() {
                debug!("Callback sender already stopped");
            }
        }
    }

    /// Close the queue and wait until queued notifications are delivered
    #[inline]
    pub async fn finish(mut self) {
        self.sender = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Callback sender task failed: {}", e);
            }
        }
    }
}
