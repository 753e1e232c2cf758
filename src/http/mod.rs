// Blocking HTTP plumbing shared by the embedding, generation and callback clients


use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const BACKOFF_UNIT_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    retry_attempts: u32,
    bearer_token: Option<String>,
}

impl HttpClient {
    #[inline]
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            bearer_token: None,
        }
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// GET `url` and return the body, retrying transient failures
    #[inline]
    pub fn get_text(&self, url: &Url) -> Result<String> {
        self.make_request_with_retry(url, || {
            let mut request = self.agent.get(url.as_str());
            if let Some(token) = &self.bearer_token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }
            request
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    /// POST a JSON body and decode the JSON response, retrying transient failures
    #[inline]
    pub fn post_json<B, R>(&self, url: &Url, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request_json = serde_json::to_string(body).context("Failed to serialize request")?;

        let response_text = self.make_request_with_retry(url, || {
            let mut request = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            if let Some(token) = &self.bearer_token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }
            request
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    /// POST a JSON body once, ignoring the response body
    #[inline]
    pub fn post_json_once<B>(&self, url: &Url, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let request_json = serde_json::to_string(body).context("Failed to serialize request")?;

        self.agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .map_err(|e| anyhow::anyhow!("POST {} failed: {}", url, e))?;

        Ok(())
    }

    fn make_request_with_retry<F>(&self, url: &Url, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 || *status == 429 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * BACKOFF_UNIT_MS;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Run a blocking HTTP call on the blocking thread pool
#[inline]
pub async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("Blocking HTTP task did not complete")?
}

/// Join `path` onto `base`, keeping any path prefix already on `base`
#[inline]
pub fn join_url(base: &Url, path: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .with_context(|| format!("Failed to build URL from {} and {}", base, path))
}
