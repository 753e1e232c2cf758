// Embeddings module
// The Embedder capability and its local and remote backends

pub mod local;
pub mod ollama;
pub mod openai;


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::{Config, EmbeddingBackend};
use crate::http::HttpClient;
use crate::{RagError, Result};

pub use local::HashEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

/// Maps text to a fixed-length vector.
///
/// Implementations are pure functions of the input text and the model identity.
/// A backend is constructed once at startup and shared behind an `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model (and version) producing the vectors
    fn model_id(&self) -> &str;

    /// Length of every vector returned by [`Embedder::embed`]
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Verify the backend can serve requests
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the embedding backend selected in the configuration
#[inline]
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let settings = &config.embedding;
    let timeout = Duration::from_secs(settings.timeout_seconds);

    let embedder: Arc<dyn Embedder> = match settings.backend {
        EmbeddingBackend::Local => Arc::new(HashEmbedder::new(&settings.model, settings.dimension)),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(
            config.ollama_url()?,
            &settings.model,
            settings.dimension,
            HttpClient::new(timeout),
        )),
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(
            config.openai.url()?,
            &settings.model,
            settings.dimension,
            HttpClient::new(timeout).with_bearer_token(config.openai.api_key.clone()),
        )),
    };

    info!(
        "Using {:?} embedding backend with model {} ({} dimensions)",
        settings.backend,
        embedder.model_id(),
        embedder.dimension()
    );

    Ok(embedder)
}

/// Reject vectors whose length disagrees with the embedder's dimension
#[inline]
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(RagError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Reject vectors holding NaN or infinite components
#[inline]
pub fn check_finite(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|x| !x.is_finite()) {
        Some(position) => Err(RagError::InvalidInput(format!(
            "vector component {} is not a finite number",
            position
        ))),
        None => Ok(()),
    }
}

/// Encode a vector as little-endian `f32` bytes
#[inline]
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes; trailing partial values are ignored
#[inline]
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
