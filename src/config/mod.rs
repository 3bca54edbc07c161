
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::KbError;
use crate::chunking::ChunkingLimits;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSION;

pub const API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub chunking: ChunkingLimits,
    pub retrieval: RetrievalConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkingLimits::default(),
            retrieval: RetrievalConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    /// Falls back to the `OPENROUTER_API_KEY` environment variable when empty.
    pub api_key: String,
    pub model: String,
    pub batch_size: u32,
    pub timeout_seconds: u64,
    pub dimension: u32,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model: "openai/text-embedding-3-small".to_string(),
            batch_size: 50,
            timeout_seconds: 60,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    /// Falls back to the `OPENROUTER_API_KEY` environment variable when empty.
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    /// Low temperature for factual, document-grounded answers.
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model: "google/gemini-2.0-flash-001".to_string(),
            max_tokens: 2000,
            temperature: 0.3,
            timeout_seconds: 60,
        }
    }
}

/// Retrieval policy for the RAG answer path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates fetched from the vector index per query.
    pub max_candidates: usize,
    /// Maximum cosine distance for a candidate to count as relevant.
    pub relevance_threshold: f32,
    /// Minimum results returned when any candidate exists, regardless of
    /// the threshold.
    pub min_results: usize,
    /// Prior conversation turns included in the generation prompt.
    pub history_limit: usize,
    /// Length of the content preview on source citations.
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_candidates: 10,
            relevance_threshold: 0.5,
            min_results: 1,
            history_limit: 10,
            preview_chars: 300,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be between 1 and 100000)")]
    InvalidMaxTokens(u32),
    #[error("Invalid relevance threshold: {0} (cosine distance must be between 0.0 and 2.0)")]
    InvalidRelevanceThreshold(f32),
    #[error("Invalid min results: {0} (must be at least 1)")]
    InvalidMinResults(usize),
    #[error("Max candidates ({0}) must not be smaller than min results ({1})")]
    MaxCandidatesTooSmall(usize, usize),
    #[error("Invalid min chunk size: {0} (must be between 1 and 1000)")]
    InvalidMinChunkSize(usize),
    #[error("Invalid max chunk size: {0} (must be between 100 and 100000)")]
    InvalidMaxChunkSize(usize),
    #[error("Max chunk size ({0}) must be greater than min chunk size ({1})")]
    MaxChunkSizeTooSmall(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load the configuration from `config.toml` in the given base
    /// directory, falling back to defaults when no file exists.
    #[inline]
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let config_path = base_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: base_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = base_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
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

    /// Default per-user base directory.
    #[inline]
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|dir| dir.join("expertbase"))
            .context("Could not determine local data directory")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.generation.validate()?;
        self.validate_retrieval()?;
        self.validate_chunking()?;
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;

        if !(0.0..=2.0).contains(&retrieval.relevance_threshold) {
            return Err(ConfigError::InvalidRelevanceThreshold(
                retrieval.relevance_threshold,
            ));
        }
        if retrieval.min_results == 0 {
            return Err(ConfigError::InvalidMinResults(retrieval.min_results));
        }
        if retrieval.max_candidates < retrieval.min_results {
            return Err(ConfigError::MaxCandidatesTooSmall(
                retrieval.max_candidates,
                retrieval.min_results,
            ));
        }

        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;

        if !(1..=1000).contains(&chunking.min_chunk_size) {
            return Err(ConfigError::InvalidMinChunkSize(chunking.min_chunk_size));
        }
        if !(100..=100_000).contains(&chunking.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(chunking.max_chunk_size));
        }
        if chunking.max_chunk_size <= chunking.min_chunk_size {
            return Err(ConfigError::MaxChunkSizeTooSmall(
                chunking.max_chunk_size,
                chunking.min_chunk_size,
            ));
        }

        Ok(())
    }

    /// Path of the SQLite metadata database.
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("metadata.db")
    }

    /// Path of the vector database directory.
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service(
            &self.base_url,
            &self.model,
            self.timeout_seconds,
        )?;

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        if !(64..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        Ok(())
    }

    /// The configured API key, or the environment fallback.
    pub fn resolved_api_key(&self) -> crate::Result<String> {
        resolve_api_key(&self.api_key)
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service(
            &self.base_url,
            &self.model,
            self.timeout_seconds,
        )?;

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }
        if self.max_tokens == 0 || self.max_tokens > 100_000 {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        Ok(())
    }

    /// The configured API key, or the environment fallback.
    pub fn resolved_api_key(&self) -> crate::Result<String> {
        resolve_api_key(&self.api_key)
    }
}

fn validate_service(base_url: &str, model: &str, timeout_seconds: u64) -> Result<(), ConfigError> {
    Url::parse(base_url).map_err(|_| ConfigError::InvalidUrl(base_url.to_string()))?;

    if model.trim().is_empty() {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }
    if timeout_seconds == 0 || timeout_seconds > 600 {
        return Err(ConfigError::InvalidTimeout(timeout_seconds));
    }

    Ok(())
}

fn resolve_api_key(configured: &str) -> crate::Result<String> {
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }

    match std::env::var(API_KEY_ENV_VAR) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(KbError::Config(format!(
            "API key not configured and {API_KEY_ENV_VAR} is not set"
        ))),
    }
}
