
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{GenerationOptions, Generator};
use crate::http::{HttpClient, join_url, run_blocking};
use crate::{RagError, Result};

/// Completions from an OpenAI-compatible `/v1/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    base_url: Url,
    model: String,
    options: GenerationOptions,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGenerator {
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
        debug!("Requesting chat completion with model {}", self.model);

        let url = join_url(&self.base_url, "v1/chat/completions")?;
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };

        let response: ChatResponse = self
            .http
            .post_json(&url, &request)
            .context("Failed to generate completion")?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Completion response contained no choices"))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
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
