use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.embedding.backend, EmbeddingBackend::Local);
    assert_eq!(config.embedding.dimension, 384);
    assert_eq!(config.chunking.chunk_size, 500);
    assert_eq!(config.chunking.chunk_overlap, 50);
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.ingestion.progress_every, 5);
    assert_eq!(config.ingestion.on_conflict, ConflictPolicy::Reject);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidModel(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.embedding.dimension = 4;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(4))
    ));

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_overlap = 400;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidChunkOverlap(400, 500))
    ));

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.generation.timeout_seconds = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTimeout("generation", 0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.ingestion.stale_after_seconds = 5;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidStaleAfter(5))
    ));

    let mut invalid_config = config;
    invalid_config.ingestion.progress_every = 0;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn openai_backend_requires_api_key() {
    let mut config = Config::default();
    config.generation.backend = GenerationBackend::OpenAi;
    config.openai.api_key = None;
    assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));

    config.openai.api_key = Some("sk-test".to_string());
    assert!(config.validate().is_ok());
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let mut parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    parsed_config.base_dir = config.base_dir.clone();
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_section_defaults() {
    let toml_str = r#"
        [chunking]
        chunk_size = 800

        [ingestion]
        on_conflict = "supersede"
    "#;

    let config: Config = toml::from_str(toml_str).expect("should parse partial toml");

    assert_eq!(config.chunking.chunk_size, 800);
    assert_eq!(config.chunking.chunk_overlap, 50);
    assert_eq!(config.ingestion.on_conflict, ConflictPolicy::Supersede);
    assert_eq!(config.ingestion.progress_every, 5);
    assert_eq!(config.retrieval, RetrievalConfig::default());
}

#[test]
fn backend_names_in_toml() {
    let toml_str = r#"
        [embedding]
        backend = "ollama"
        model = "nomic-embed-text:latest"
        dimension = 768

        [generation]
        backend = "ollama"
    "#;

    let config: Config = toml::from_str(toml_str).expect("should parse backends");
    assert_eq!(config.embedding.backend, EmbeddingBackend::Ollama);
    assert_eq!(config.embedding.dimension, 768);
    assert_eq!(config.generation.backend, GenerationBackend::Ollama);
}

#[test]
#[serial]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("can create temp dir");

    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.chunking, ChunkingConfig::default());
    assert_eq!(
        config.database_path(),
        temp_dir.path().join(DATABASE_FILE_NAME)
    );
}

#[test]
#[serial]
fn save_and_load_roundtrip() {
    let temp_dir = TempDir::new().expect("can create temp dir");
    let mut config = Config::default();
    config.base_dir = temp_dir.path().join("nested");
    config.retrieval.top_k = 8;
    config.chunking.chunk_size = 1000;
    config.chunking.chunk_overlap = 100;

    config.save().expect("should save config");
    let loaded = Config::load(&config.base_dir).expect("should load saved config");

    assert_eq!(loaded.retrieval.top_k, 8);
    assert_eq!(loaded.chunking.chunk_size, 1000);
    assert_eq!(loaded.chunking.chunk_overlap, 100);
}

#[test]
#[serial]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("can create temp dir");
    fs::write(
        temp_dir.path().join(CONFIG_FILE_NAME),
        "[retrieval]\ntop_k = 0\n",
    )
    .expect("can write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
#[serial]
fn env_overrides_api_key_and_home() {
    let temp_dir = TempDir::new().expect("can create temp dir");

    // SAFETY: serialized with every other test that touches the environment
    unsafe {
        std::env::set_var(OPENAI_KEY_ENV_VAR, "sk-from-env");
        std::env::set_var(HOME_ENV_VAR, temp_dir.path());
    }

    let dir = Config::config_dir().expect("should resolve config dir");
    let config = Config::load(&dir).expect("should load config");

    // SAFETY: see above
    unsafe {
        std::env::remove_var(OPENAI_KEY_ENV_VAR);
        std::env::remove_var(HOME_ENV_VAR);
    }

    assert_eq!(dir, temp_dir.path());
    assert_eq!(config.openai.api_key.as_deref(), Some("sk-from-env"));
}
