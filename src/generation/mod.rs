// Generation module
// Text completion backends and prompt assembly

pub mod ollama;
pub mod openai;


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::Result;
use crate::config::{Config, GenerationBackend};
use crate::http::HttpClient;

pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant that answers questions based only on the provided context. \
If the context does not contain the answer, say that you don't know.";

/// Produces a completion for a system instruction and a user prompt
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Sampling parameters passed to every backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Fill the prompt template with the assembled context and the question
#[inline]
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the question based on the context below.\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:"
    )
}

/// Build the generation backend selected in the configuration
#[inline]
pub fn build_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    let settings = &config.generation;
    let options = GenerationOptions {
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    };
    let http = HttpClient::new(Duration::from_secs(settings.timeout_seconds));

    let generator: Arc<dyn Generator> = match settings.backend {
        GenerationBackend::Ollama => Arc::new(OllamaGenerator::new(
            config.ollama_url()?,
            &settings.model,
            options,
            http,
        )),
        GenerationBackend::OpenAi => Arc::new(OpenAiGenerator::new(
            config.openai.url()?,
            &settings.model,
            options,
            http.with_bearer_token(config.openai.api_key.clone()),
        )),
    };

    info!(
        "Using {:?} generation backend with model {}",
        settings.backend,
        generator.model_id()
    );

    Ok(generator)
}
