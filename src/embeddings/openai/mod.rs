
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{Embedder, check_dimension};
use crate::http::{HttpClient, join_url, run_blocking};
use crate::{RagError, Result};

/// Embeddings from an OpenAI-compatible `/v1/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    base_url: Url,
    model: String,
    dimension: usize,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    #[inline]
    pub fn new(base_url: Url, model: &str, dimension: usize, http: HttpClient) -> Self {
        Self {
            base_url,
            model: model.to_string(),
            dimension,
            http,
        }
    }

    fn embed_blocking(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        debug!("Requesting OpenAI embedding for text (length: {})", text.len());

        let url = join_url(&self.base_url, "v1/embeddings")?;
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response: EmbeddingResponse = self
            .http
            .post_json(&url, &request)
            .context("Failed to generate embedding")?;

        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no data"))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let this = self.clone();
        let text = text.to_string();

        let vector = run_blocking(move || this.embed_blocking(&text))
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("{:#}", e)))?;

        check_dimension(self.dimension, &vector)?;
        Ok(vector)
    }
}
