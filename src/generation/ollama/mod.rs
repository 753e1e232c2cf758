
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{GenerationOptions, Generator};
use crate::http::{HttpClient, join_url, run_blocking};
use crate::{RagError, Result};

#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    base_url: Url,
    model: String,
    options: GenerationOptions,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(base_url: Url, model: &str, options: GenerationOptions, http: HttpClient) -> Self {
        Self {
            base_url,
            model: model.to_string(),
            options,
            http,
        }
    }

    fn generate_blocking(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        debug!(
            "Requesting Ollama completion with model {} (prompt length: {})",
            self.model,
            prompt.len()
        );

        let url = join_url(&self.base_url, "api/generate")?;
        let request = GenerateRequest {
            model: &self.model,
            system,
            prompt,
            stream: false,
            options: SamplingOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            },
        };

        let response: GenerateResponse = self
            .http
            .post_json(&url, &request)
            .context("Failed to generate completion")?;

        Ok(response.response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let this = self.clone();
        let system = system.to_string();
        let prompt = prompt.to_string();

        run_blocking(move || this.generate_blocking(&system, &prompt))
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("{:#}", e)))
    }
}
