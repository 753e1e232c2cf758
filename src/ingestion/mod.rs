// Ingestion module
// Turns submitted documents into persisted, indexed chunk embeddings in the background

pub mod callback;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::chunking::ChunkingConfig;
use crate::config::IngestionConfig;
use crate::database::Database;
use crate::database::models::{IngestionRecord, IngestionStatus, NewDocument};
use crate::embeddings::{Embedder, check_dimension, check_finite};
use crate::index::VectorIndex;
use crate::{RagError, Result};

pub use callback::{CallbackClient, StatusNotification, StatusNotifier};

pub const CANCELLED_REASON: &str = "cancelled";
pub const INTERRUPTED_REASON: &str = "interrupted";

/// What to do when a document is submitted while a run for it is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Reject,
    Supersede,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub content: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub external_id: String,
    pub status: IngestionStatus,
    pub message: String,
}

struct ActiveRun {
    run_id: Uuid,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    finished: watch::Receiver<bool>,
}

struct PipelineInner {
    database: Database,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    settings: IngestionConfig,
    callbacks: CallbackClient,
    runs: Mutex<HashMap<String, ActiveRun>>,
    // Serializes ingest and cancel so a document's runs never overlap
    control: tokio::sync::Mutex<()>,
}

/// Background ingestion of documents, one active run per external id
#[derive(Clone)]
pub struct IngestionPipeline {
    inner: Arc<PipelineInner>,
}

struct RunJob {
    external_id: String,
    document_id: i64,
    segments: Vec<String>,
    run_id: Uuid,
    cancelled: Arc<AtomicBool>,
    notifier: StatusNotifier,
    finished: watch::Sender<bool>,
}

enum RunOutcome {
    Completed(usize),
    Cancelled,
    /// The persisted run was ended by someone else; holds the chunks this run wrote
    Withdrawn(Vec<i64>),
}

impl IngestionPipeline {
    #[inline]
    pub fn new(
        database: Database,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        settings: IngestionConfig,
    ) -> Self {
        let callbacks = CallbackClient::new(settings.callback_timeout());
        Self {
            inner: Arc::new(PipelineInner {
                database,
                index,
                embedder,
                chunking,
                settings,
                callbacks,
                runs: Mutex::new(HashMap::new()),
                control: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Validate and register a document, then process it in the background
    #[inline]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse> {
        let callback_url = validate_request(&request)?;
        let external_id = request.external_id.clone();
        let segments = self.inner.chunking.split(&request.content)?;

        let _control = self.inner.control.lock().await;

        let previous = {
            let mut runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
            match runs.get_mut(&external_id) {
                Some(_) if self.inner.settings.on_conflict == ConflictPolicy::Reject => {
                    warn!("Rejected ingestion of {}: a run is already active", external_id);
                    return Err(RagError::ConcurrentIngestionConflict(external_id));
                }
                Some(active) => {
                    active.cancelled.store(true, Ordering::SeqCst);
                    active.handle.take()
                }
                None => None,
            }
        };

        if let Some(handle) = previous {
            info!("Superseding active ingestion run for {}", external_id);
            self.stop_run(&external_id, handle).await;
        } else {
            // A run owned by another process can only be rejected
            let existing = self
                .inner
                .database
                .get_ingestion_status(&external_id)
                .await?;
            if let Some(existing) = existing {
                if existing.status.is_active() && existing.updated_at >= self.stale_cutoff() {
                    warn!(
                        "Rejected ingestion of {}: another process is processing it",
                        external_id
                    );
                    return Err(RagError::ConcurrentIngestionConflict(external_id));
                }
            }
        }

        let document = self
            .inner
            .database
            .upsert_document(&NewDocument {
                external_id: external_id.clone(),
                title: request.title,
                description: request.description,
            })
            .await?;

        let removed = self.inner.database.delete_document_chunks(document.id).await?;
        self.inner.index.delete_document(&external_id);
        if removed > 0 {
            info!("Removed {} previous chunks of {}", removed, external_id);
        }

        self.inner.database.reset_ingestion_status(&external_id).await?;
        if !self
            .inner
            .database
            .mark_ingestion_processing(&external_id, segments.len() as i64)
            .await?
        {
            // Cancelled by another process between the two writes
            warn!("Ingestion of {} was cancelled before it started", external_id);
            let record = self.status(&external_id).await?;
            return Ok(IngestResponse {
                external_id,
                status: record.status,
                message: "Document ingestion was cancelled before it started".to_string(),
            });
        }

        let run_id = Uuid::new_v4();
        let cancelled = Arc::new(AtomicBool::new(false));
        let notifier = self
            .inner
            .callbacks
            .start(callback_url, Arc::clone(&cancelled));

        let (finished_tx, finished) = watch::channel(false);

        let job = RunJob {
            external_id: external_id.clone(),
            document_id: document.id,
            segments,
            run_id,
            cancelled: Arc::clone(&cancelled),
            notifier,
            finished: finished_tx,
        };

        {
            let mut runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
            let handle = tokio::spawn(Arc::clone(&self.inner).run(job));
            runs.insert(
                external_id.clone(),
                ActiveRun {
                    run_id,
                    cancelled,
                    handle: Some(handle),
                    finished,
                },
            );
        }

        info!("Queued ingestion run {} for {}", run_id, external_id);

        Ok(IngestResponse {
            external_id,
            status: IngestionStatus::Pending,
            message: "Document ingestion started".to_string(),
        })
    }

    /// Stop an active run and discard everything it produced
    #[inline]
    pub async fn cancel(&self, external_id: &str) -> Result<IngestionRecord> {
        let _control = self.inner.control.lock().await;

        let record = self.status(external_id).await?;
        if !record.status.is_active() {
            return Err(RagError::InvalidInput(format!(
                "Ingestion of '{}' is {} and cannot be cancelled",
                external_id, record.status
            )));
        }

        let handle = {
            let mut runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
            runs.get_mut(external_id).and_then(|active| {
                active.cancelled.store(true, Ordering::SeqCst);
                active.handle.take()
            })
        };

        if let Some(handle) = handle {
            self.stop_run(external_id, handle).await;
        } else {
            debug!("No live run for {}, clearing persisted state only", external_id);
        }

        if let Some(document) = self.inner.database.get_document(external_id).await? {
            self.inner
                .database
                .delete_document_chunks(document.id)
                .await?;
        }
        self.inner.index.delete_document(external_id);
        self.inner
            .database
            .mark_ingestion_cancelled(external_id, CANCELLED_REASON)
            .await?;

        info!("Cancelled ingestion of {}", external_id);
        self.status(external_id).await
    }

    #[inline]
    pub async fn status(&self, external_id: &str) -> Result<IngestionRecord> {
        self.inner
            .database
            .get_ingestion_status(external_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("No ingestion for '{}'", external_id)))
    }

    /// Wait for the active run of `external_id`, if any, then return its status
    #[inline]
    pub async fn wait(&self, external_id: &str) -> Result<IngestionRecord> {
        let finished = self
            .inner
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(external_id)
            .map(|active| active.finished.clone());

        if let Some(mut finished) = finished {
            // A dropped sender means the task was aborted, which also ends the wait
            let _ = finished.wait_for(|done| *done).await;
        }

        self.status(external_id).await
    }

    #[inline]
    pub fn is_running(&self, external_id: &str) -> bool {
        self.inner
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(external_id)
    }

    /// Mark runs left pending or processing by a dead process as failed.
    ///
    /// Only runs without progress for `stale_after_seconds` are touched, so
    /// runs owned by another live process survive.
    #[inline]
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let recovered = self
            .inner
            .database
            .fail_active_ingestions(INTERRUPTED_REASON, self.stale_cutoff())
            .await?;
        if recovered > 0 {
            warn!("Marked {} interrupted ingestion runs as failed", recovered);
        }
        Ok(recovered)
    }

    fn stale_cutoff(&self) -> NaiveDateTime {
        let stale_after = chrono::Duration::from_std(self.inner.settings.stale_after())
            .unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .naive_utc()
            .checked_sub_signed(stale_after)
            .unwrap_or(NaiveDateTime::MIN)
    }

    async fn stop_run(&self, external_id: &str, mut handle: JoinHandle<()>) {
        let grace = self.inner.settings.cancel_grace();
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => debug!("Run for {} stopped within grace period", external_id),
            Err(_) => {
                warn!(
                    "Run for {} did not stop within {:?}, aborting",
                    external_id, grace
                );
                handle.abort();
                let _ = handle.await;
            }
        }

        self.inner
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(external_id);
    }
}

impl PipelineInner {
    async fn run(self: Arc<Self>, job: RunJob) {
        let RunJob {
            external_id,
            document_id,
            segments,
            run_id,
            cancelled,
            notifier,
            finished,
        } = job;

        info!("Starting ingestion run {} for {}", run_id, external_id);

        let outcome = self
            .process(&external_id, document_id, &segments, &cancelled, &notifier)
            .await;

        match outcome {
            Ok(RunOutcome::Completed(total)) => {
                info!(
                    "Completed ingestion of {} with {} chunks",
                    external_id, total
                );
            }
            Ok(RunOutcome::Cancelled) => {
                info!("Ingestion run {} for {} observed cancellation", run_id, external_id);
            }
            Ok(RunOutcome::Withdrawn(chunk_ids)) => {
                cancelled.store(true, Ordering::SeqCst);
                warn!(
                    "Ingestion of {} was ended elsewhere, discarding {} chunks",
                    external_id,
                    chunk_ids.len()
                );
                self.discard_chunks(&chunk_ids).await;
            }
            Err(e) if cancelled.load(Ordering::SeqCst) => {
                debug!("Cancelled run for {} ended with: {}", external_id, e);
            }
            Err(e) => {
                let reason = e.to_string();
                error!("Ingestion of {} failed: {}", external_id, reason);
                if let Err(db_err) = self.database.mark_ingestion_failed(&external_id, &reason).await
                {
                    error!(
                        "Failed to record failure of {}: {}",
                        external_id, db_err
                    );
                }
                notifier.notify(StatusNotification::failed(&external_id, &reason));
            }
        }

        notifier.finish().await;

        {
            let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            if runs
                .get(&external_id)
                .is_some_and(|active| active.run_id == run_id)
            {
                runs.remove(&external_id);
            }
        }

        finished.send_replace(true);
    }

    async fn process(
        &self,
        external_id: &str,
        document_id: i64,
        segments: &[String],
        cancelled: &AtomicBool,
        notifier: &StatusNotifier,
    ) -> Result<RunOutcome> {
        let total = segments.len();
        let model_id = self.embedder.model_id().to_string();
        let mut written = Vec::with_capacity(total);

        notifier.notify(StatusNotification::processing(external_id, 0, total as i64));

        for (position, text) in segments.iter().enumerate() {
            if cancelled.load(Ordering::SeqCst) {
                return Ok(RunOutcome::Cancelled);
            }

            let vector = self.embedder.embed(text).await?;
            check_dimension(self.embedder.dimension(), &vector)?;
            check_finite(&vector)?;

            if cancelled.load(Ordering::SeqCst) {
                return Ok(RunOutcome::Cancelled);
            }

            let chunk_id = self
                .database
                .insert_chunk_with_embedding(document_id, position as i64, text, &model_id, &vector)
                .await?;
            written.push(chunk_id);
            self.index.upsert(external_id, chunk_id, vector, &model_id)?;

            let processed = position as i64 + 1;
            if !self
                .database
                .update_ingestion_progress(external_id, processed)
                .await?
            {
                return Ok(RunOutcome::Withdrawn(written));
            }
            debug!("Processed chunk {}/{} of {}", processed, total, external_id);

            if callback::should_report_progress(position, total, self.settings.progress_every) {
                notifier.notify(StatusNotification::processing(
                    external_id,
                    processed,
                    total as i64,
                ));
            }
        }

        if cancelled.load(Ordering::SeqCst) {
            return Ok(RunOutcome::Cancelled);
        }

        if !self.database.mark_ingestion_completed(external_id).await? {
            return Ok(RunOutcome::Withdrawn(written));
        }
        notifier.notify(StatusNotification::completed(external_id, total as i64));

        Ok(RunOutcome::Completed(total))
    }

    async fn discard_chunks(&self, chunk_ids: &[i64]) {
        for chunk_id in chunk_ids {
            self.index.delete(*chunk_id);
        }
        if let Err(e) = self.database.delete_chunks(chunk_ids).await {
            error!("Failed to discard chunks of a withdrawn run: {}", e);
        }
    }
}

fn validate_request(request: &IngestRequest) -> Result<Option<Url>> {
    if request.external_id.trim().is_empty() {
        return Err(RagError::InvalidInput(
            "external_id must not be empty".to_string(),
        ));
    }
    if request.title.trim().is_empty() {
        return Err(RagError::InvalidInput("title must not be empty".to_string()));
    }
    if request.content.trim().is_empty() {
        return Err(RagError::InvalidInput(
            "content must not be empty".to_string(),
        ));
    }

    request
        .callback_url
        .as_deref()
        .map(|raw| {
            Url::parse(raw).map_err(|e| {
                RagError::InvalidInput(format!("Invalid callback URL '{}': {}", raw, e))
            })
        })
        .transpose()
}
