#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::chunking::ChunkingConfig;
use crate::ingestion::ConflictPolicy;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATABASE_FILE_NAME: &str = "docs-rag.db";
pub const HOME_ENV_VAR: &str = "DOCS_RAG_HOME";
pub const OPENAI_KEY_ENV_VAR: &str = "OPENAI_API_KEY";
const DEFAULT_DIR_NAME: &str = ".docs-rag";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Feature-hashing embedder that runs in-process
    #[default]
    Local,
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationBackend {
    #[default]
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: "local-hash-v1".to_string(),
            dimension: 384,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub backend: GenerationBackend,
    pub model: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: GenerationBackend::Ollama,
            model: "llama3.2:latest".to_string(),
            timeout_seconds: 60,
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

impl GenerationConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per question
    pub top_k: usize,
    /// Upper bound on the assembled context, in characters
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_context_chars: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestionConfig {
    /// Send a progress callback every N chunks
    pub progress_every: usize,
    pub callback_timeout_seconds: u64,
    pub on_conflict: ConflictPolicy,
    /// How long `cancel` waits for a run to stop before aborting it
    pub cancel_grace_ms: u64,
    /// Active runs without progress for this long are treated as interrupted
    pub stale_after_seconds: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            progress_every: 5,
            callback_timeout_seconds: 10,
            on_conflict: ConflictPolicy::Reject,
            cancel_grace_ms: 5000,
            stale_after_seconds: 900,
        }
    }
}

impl IngestionConfig {
    #[inline]
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_seconds)
    }

    #[inline]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    #[inline]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 16 and 8192)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid chunk size: {0} (must be between 50 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be at most half the chunk size ({1})")]
    InvalidChunkOverlap(usize, usize),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid context budget: {0} (must be between 200 and 200000 characters)")]
    InvalidContextBudget(usize),
    #[error("Invalid {0} timeout: {1} (must be between 1 and 600 seconds)")]
    InvalidTimeout(&'static str, u64),
    #[error("Invalid progress interval: {0} (must be at least 1)")]
    InvalidProgressInterval(usize),
    #[error("Invalid stale_after_seconds: {0} (must be at least 60)")]
    InvalidStaleAfter(u64),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("OpenAI backend selected but no API key configured (set {OPENAI_KEY_ENV_VAR})")]
    MissingApiKey,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            ollama: OllamaConfig::default(),
            openai: OpenAiConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingestion: IngestionConfig::default(),
            base_dir: PathBuf::from(DEFAULT_DIR_NAME),
        }
    }
}

impl Config {
    /// Default base directory: `$DOCS_RAG_HOME`, else `~/.docs-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var(HOME_ENV_VAR) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }

        dirs::home_dir()
            .map(|home| home.join(DEFAULT_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Values from the environment take precedence over the file
    #[inline]
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(OPENAI_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                self.openai.api_key = Some(key);
            }
        }
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join(DATABASE_FILE_NAME)
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn uses_openai(&self) -> bool {
        self.embedding.backend == EmbeddingBackend::OpenAi
            || self.generation.backend == GenerationBackend::OpenAi
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.openai.validate(self.uses_openai())?;
        self.validate_embedding_config()?;
        self.validate_generation_config()?;
        self.validate_chunking_config()?;
        self.validate_retrieval_config()?;
        self.validate_ingestion_config()?;
        Ok(())
    }

    fn validate_embedding_config(&self) -> Result<(), ConfigError> {
        let config = &self.embedding;

        if config.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(config.model.clone()));
        }

        if !(16..=8192).contains(&config.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(config.dimension));
        }

        validate_timeout("embedding", config.timeout_seconds)
    }

    fn validate_generation_config(&self) -> Result<(), ConfigError> {
        let config = &self.generation;

        if config.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(config.model.clone()));
        }

        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(ConfigError::InvalidTemperature(config.temperature));
        }

        validate_timeout("generation", config.timeout_seconds)
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(50..=8192).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.chunk_overlap * 2 > config.chunk_size {
            return Err(ConfigError::InvalidChunkOverlap(
                config.chunk_overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        let config = &self.retrieval;

        if !(1..=100).contains(&config.top_k) {
            return Err(ConfigError::InvalidTopK(config.top_k));
        }

        if !(200..=200_000).contains(&config.max_context_chars) {
            return Err(ConfigError::InvalidContextBudget(config.max_context_chars));
        }

        Ok(())
    }

    fn validate_ingestion_config(&self) -> Result<(), ConfigError> {
        let config = &self.ingestion;

        if config.progress_every == 0 {
            return Err(ConfigError::InvalidProgressInterval(config.progress_every));
        }

        if config.stale_after_seconds < 60 {
            return Err(ConfigError::InvalidStaleAfter(config.stale_after_seconds));
        }

        validate_timeout("callback", config.callback_timeout_seconds)
    }
}

fn validate_timeout(name: &'static str, seconds: u64) -> Result<(), ConfigError> {
    if !(1..=600).contains(&seconds) {
        return Err(ConfigError::InvalidTimeout(name, seconds));
    }
    Ok(())
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        self.ollama_url()?;
        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

impl OpenAiConfig {
    pub fn validate(&self, required: bool) -> Result<(), ConfigError> {
        let url = self.url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }

        if required && self.api_key.as_deref().is_none_or(|key| key.trim().is_empty()) {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(())
    }

    pub fn url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))
    }
}
