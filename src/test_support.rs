// Test doubles shared by unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::database::Database;
use crate::embeddings::{Embedder, HashEmbedder};
use crate::generation::Generator;
use crate::{RagError, Result};

pub(crate) const TEST_MODEL: &str = "test-hash";
pub(crate) const TEST_DIMENSION: usize = 64;

pub(crate) async fn temp_database() -> (TempDir, Database) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database = Database::initialize_in_dir(temp_dir.path(), "test.db")
        .await
        .expect("Failed to open test database");
    (temp_dir, database)
}

/// Hash embedder that can be slowed down or made to fail after N calls
pub(crate) struct ScriptedEmbedder {
    inner: HashEmbedder,
    delay: Duration,
    fail_after: Option<usize>,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub(crate) fn new() -> Self {
        Self {
            inner: HashEmbedder::new(TEST_MODEL, TEST_DIMENSION),
            delay: Duration::ZERO,
            fail_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing_after(mut self, successful_calls: usize) -> Self {
        self.fail_after = Some(successful_calls);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_after.is_some_and(|limit| call >= limit) {
            return Err(RagError::BackendUnavailable(
                "embedding backend offline".to_string(),
            ));
        }
        Ok(self.inner.embed_sync(text))
    }
}

/// Embedder that returns vectors of the wrong length
pub(crate) struct WrongDimensionEmbedder;

#[async_trait]
impl Embedder for WrongDimensionEmbedder {
    fn model_id(&self) -> &str {
        TEST_MODEL
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.5; TEST_DIMENSION / 2])
    }
}

pub(crate) enum Reply {
    Text(String),
    Fail,
    Hang,
}

/// Generator that records prompts and answers from a script
pub(crate) struct RecordingGenerator {
    reply: Reply,
    prompts: Mutex<Vec<(String, String)>>,
}

impl RecordingGenerator {
    pub(crate) fn answering(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Text(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Fail,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn hanging() -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Hang,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn prompts(&self) -> Vec<(String, String)> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn model_id(&self) -> &str {
        "recording"
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((system.to_string(), prompt.to_string()));

        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail => Err(RagError::BackendUnavailable(
                "generation backend offline".to_string(),
            )),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}
