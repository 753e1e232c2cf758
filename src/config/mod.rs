// Configuration management module
// TOML settings, validation and the `config` command output

pub mod display;
pub mod settings;

pub use display::{init_config, show_config};
pub use settings::{
    Config, ConfigError, EmbeddingBackend, EmbeddingConfig, GenerationBackend, GenerationConfig,
    IngestionConfig, OllamaConfig, OpenAiConfig, RetrievalConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
