#[cfg(test)]
mod tests;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{Embedder, check_dimension};
use crate::http::{HttpClient, join_url, run_blocking};
use crate::{RagError, Result};

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    base_url: Url,
    model: String,
    dimension: usize,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaEmbedder {
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
        debug!("Requesting Ollama embedding for text (length: {})", text.len());

        let url = join_url(&self.base_url, "api/embed")?;
        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let response: EmbedResponse = self
            .http
            .post_json(&url, &request)
            .context("Failed to generate embedding")?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embeddings"))
    }
}

/// Fetch `/api/tags` from an Ollama server
#[inline]
pub fn list_models(http: &HttpClient, base_url: &Url) -> anyhow::Result<Vec<ModelInfo>> {
    let url = join_url(base_url, "api/tags")?;
    debug!("Fetching available models from {}", url);

    let text = http.get_text(&url).context("Failed to fetch models")?;
    let response: ModelsResponse =
        serde_json::from_str(&text).context("Failed to parse models response")?;

    debug!("Found {} models", response.models.len());
    Ok(response.models)
}

/// Check that `model` is among the server's models; a missing `:tag` matches `:latest`
#[inline]
pub fn validate_model(http: &HttpClient, base_url: &Url, model: &str) -> anyhow::Result<()> {
    let models = list_models(http, base_url)?;
    let wanted = if model.contains(':') {
        model.to_string()
    } else {
        format!("{}:latest", model)
    };

    if models.iter().any(|m| m.name == model || m.name == wanted) {
        debug!("Model {} is available", model);
        return Ok(());
    }

    let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    warn!("Model {} not found. Available models: {:?}", model, available);
    Err(anyhow::anyhow!(
        "Model '{}' is not available. Available models: {:?}",
        model,
        available
    ))
}

#[async_trait]
impl Embedder for OllamaEmbedder {
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

    async fn health_check(&self) -> Result<()> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let model = self.model.clone();

        run_blocking(move || validate_model(&http, &base_url, &model))
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("{:#}", e)))?;

        info!(
            "Health check passed for Ollama embeddings at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }
}
