use anyhow::{Context, Result};
use console::style;

use super::{Config, EmbeddingBackend, GenerationBackend};

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding:").bold().yellow());
    eprintln!("  Backend: {}", style(backend_label(config.embedding.backend)).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());

    eprintln!();
    eprintln!("{}", style("Generation:").bold().yellow());
    eprintln!(
        "  Backend: {}",
        style(generation_label(config.generation.backend)).cyan()
    );
    eprintln!("  Model: {}", style(&config.generation.model).cyan());
    eprintln!(
        "  Timeout: {}s",
        style(config.generation.timeout_seconds).cyan()
    );

    eprintln!();
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  OpenAI URL: {}", style(&config.openai.base_url).cyan());
    eprintln!(
        "  OpenAI key: {}",
        if config.openai.api_key.is_some() {
            style("set").green()
        } else {
            style("not set").dim()
        }
    );

    eprintln!();
    eprintln!("{}", style("Pipeline:").bold().yellow());
    eprintln!(
        "  Chunk size / overlap: {} / {}",
        style(config.chunking.chunk_size).cyan(),
        style(config.chunking.chunk_overlap).cyan()
    );
    eprintln!(
        "  Top K / context budget: {} / {} chars",
        style(config.retrieval.top_k).cyan(),
        style(config.retrieval.max_context_chars).cyan()
    );
    eprintln!(
        "  Conflict policy: {}",
        style(format!("{:?}", config.ingestion.on_conflict).to_lowercase()).cyan()
    );
    eprintln!(
        "  Interrupted after: {}s without progress",
        style(config.ingestion.stale_after_seconds).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!(
        "Database: {}",
        style(config.database_path().display()).dim()
    );

    Ok(())
}

/// Write a default configuration file unless one already exists
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let path = config.config_file_path();
    if path.exists() {
        eprintln!(
            "{}",
            style(format!("Configuration already exists at {}", path.display())).yellow()
        );
        return Ok(());
    }

    config.save().context("Failed to save configuration")?;
    eprintln!("{}", style("✓ Configuration saved successfully!").green());
    eprintln!("Configuration saved to: {}", style(path.display()).cyan());
    Ok(())
}

fn backend_label(backend: EmbeddingBackend) -> &'static str {
    match backend {
        EmbeddingBackend::Local => "local (feature hashing)",
        EmbeddingBackend::Ollama => "ollama",
        EmbeddingBackend::OpenAi => "openai",
    }
}

fn generation_label(backend: GenerationBackend) -> &'static str {
    match backend {
        GenerationBackend::Ollama => "ollama",
        GenerationBackend::OpenAi => "openai",
    }
}
