
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::context::ContextConfig;
use crate::embeddings::chunking::ChunkerConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection settings for the embedding service (Ollama-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    /// Texts per embedding request sent upstream.
    pub batch_size: u32,
    pub embedding_dimension: u32,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: 768,
            timeout_seconds: 30,
        }
    }
}

/// Connection settings for the generation service (Ollama-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    /// Maximum tool-augmented reasoning rounds before a turn is finalized.
    pub max_tool_steps: u32,
    /// Wall-clock bound for one generation round, including streaming.
    pub timeout_seconds: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.1:latest".to_string(),
            max_tool_steps: 5,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8402".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid chunk size: {0} (must be between 100 and 8192 characters)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid token budget: {0} (must be at least 1000)")]
    InvalidTokenBudget(usize),
    #[error("Invalid chars-per-token estimate: {0} (must be between 1 and 16)")]
    InvalidCharsPerToken(usize),
    #[error("Invalid greedy headroom: {0} (must be within (0, 1])")]
    InvalidHeadroom(f64),
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid max tool steps: {0} (must be between 0 and 32)")]
    InvalidMaxToolSteps(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from the default per-user config directory.
    pub fn load_default() -> Result<Self> {
        let base = dirs::config_dir()
            .context("Could not determine user config directory")?
            .join("lectern");
        Self::load(base)
    }

    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.generation.validate()?;
        self.validate_chunking()?;
        self.validate_context()?;

        if self.server.bind.trim().is_empty() {
            return Err(ConfigError::InvalidBindAddress(self.server.bind.clone()));
        }

        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;

        if !(100..=8192).contains(&chunking.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(chunking.chunk_size));
        }

        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                chunking.chunk_overlap,
                chunking.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_context(&self) -> Result<(), ConfigError> {
        let context = &self.context;

        if context.token_budget < 1000 {
            return Err(ConfigError::InvalidTokenBudget(context.token_budget));
        }

        if !(1..=16).contains(&context.chars_per_token) {
            return Err(ConfigError::InvalidCharsPerToken(context.chars_per_token));
        }

        if context.greedy_headroom <= 0.0 || context.greedy_headroom > 1.0 {
            return Err(ConfigError::InvalidHeadroom(context.greedy_headroom));
        }

        Ok(())
    }

    /// Path for the SQLite metadata database.
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("metadata.db")
    }

    /// Path for the LanceDB vector database directory.
    pub fn vector_database_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkerConfig::default(),
            context: ContextConfig::default(),
            server: ServerConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

fn validate_endpoint(
    protocol: &str,
    host: &str,
    port: u16,
    model: &str,
) -> Result<(), ConfigError> {
    if protocol != "http" && protocol != "https" {
        return Err(ConfigError::InvalidProtocol(protocol.to_string()));
    }

    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }

    let url_str = format!("{}://{}:{}", protocol, host, port);
    Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

    if model.trim().is_empty() {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }

    Ok(())
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port, &self.model)?;

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if self.timeout_seconds == 0 || self.timeout_seconds > 600 {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port, &self.model)?;

        if self.max_tool_steps > 32 {
            return Err(ConfigError::InvalidMaxToolSteps(self.max_tool_steps));
        }

        if self.timeout_seconds == 0 || self.timeout_seconds > 600 {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
