//! chemkb Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for local use.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Ingestion, chunking and cache settings
    pub knowledge_base: KnowledgeBaseConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Knowledge base
        if let Ok(dir) = std::env::var("CHEMKB_CACHE_DIR") {
            self.knowledge_base.cache_dir = PathBuf::from(dir);
        }
        if let Ok(size) = std::env::var("CHEMKB_CHUNK_SIZE") {
            self.knowledge_base.chunk_size = parse_env("CHEMKB_CHUNK_SIZE", size)?;
        }
        if let Ok(overlap) = std::env::var("CHEMKB_CHUNK_OVERLAP") {
            self.knowledge_base.chunk_overlap = parse_env("CHEMKB_CHUNK_OVERLAP", overlap)?;
        }
        if let Ok(top_k) = std::env::var("CHEMKB_TOP_K") {
            self.knowledge_base.default_top_k = parse_env("CHEMKB_TOP_K", top_k)?;
        }

        // Embedding
        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(dimension) = std::env::var("EMBEDDING_DIMENSION") {
            self.embedding.dimension = Some(parse_env("EMBEDDING_DIMENSION", dimension)?);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.embedding.ollama_url = url;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.embedding.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.embedding.openai_base_url = Some(url);
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(json) = std::env::var("LOG_JSON") {
            self.logging.json_format = parse_env("LOG_JSON", json)?;
        }

        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let kb = &self.knowledge_base;
        if kb.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "chunk_size".to_string(),
                value: "0".to_string(),
            });
        }
        if kb.chunk_overlap >= kb.chunk_size {
            return Err(ConfigError::InvalidValue {
                key: "chunk_overlap".to_string(),
                value: format!("{} (must be below chunk_size {})", kb.chunk_overlap, kb.chunk_size),
            });
        }
        if self.embedding.dimension == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "embedding.dimension".to_string(),
                value: "0".to_string(),
            });
        }
        if self.embedding.provider == EmbeddingProvider::OpenAI
            && self.embedding.openai_api_key.is_none()
        {
            return Err(ConfigError::MissingRequired("OPENAI_API_KEY".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Knowledge base pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseConfig {
    /// Directory holding cached chunk lists and indexes
    pub cache_dir: PathBuf,

    /// Disable to always re-ingest
    pub cache_enabled: bool,

    /// Target chunk size in characters
    pub chunk_size: usize,

    /// Characters repeated from the previous chunk
    pub chunk_overlap: usize,

    /// Prefer paragraph/sentence boundaries over hard cuts
    pub respect_boundaries: bool,

    /// Run best-effort table detection on PDF pages
    pub extract_tables: bool,

    /// Number of chunks returned when the caller does not specify k
    pub default_top_k: usize,

    /// Capacity of the in-memory query embedding cache
    pub query_cache_capacity: u64,

    /// Time-to-live of query embeddings (seconds)
    pub query_cache_ttl_secs: u64,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".chemkb/cache"),
            cache_enabled: true,
            chunk_size: 1000,
            chunk_overlap: 200,
            respect_boundaries: true,
            extract_tables: true,
            default_top_k: 3,
            query_cache_capacity: 1_000,
            query_cache_ttl_secs: 3600,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding provider to use
    pub provider: EmbeddingProvider,

    /// Model name understood by the provider
    pub model: String,

    /// Vector dimension; provider default when unset
    pub dimension: Option<usize>,

    /// Ollama server URL
    pub ollama_url: String,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub openai_base_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    /// The pretrained all-MiniLM-L6-v2 model when built with
    /// `local-embeddings`, otherwise the hashing embedder
    fn default() -> Self {
        #[cfg(feature = "local-embeddings")]
        let (provider, model) = (EmbeddingProvider::FastEmbed, "all-MiniLM-L6-v2");
        #[cfg(not(feature = "local-embeddings"))]
        let (provider, model) = (EmbeddingProvider::Hashing, "token-hash-v2");

        Self {
            provider,
            model: model.to_string(),
            dimension: None,
            ollama_url: "http://localhost:11434".to_string(),
            openai_api_key: None,
            openai_base_url: None,
            timeout_secs: 60,
        }
    }
}

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local feature-hashed bag of words
    Hashing,
    /// Local ONNX sentence-transformer (requires `local-embeddings`)
    FastEmbed,
    Ollama,
    OpenAI,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hashing" | "hash" => Ok(Self::Hashing),
            "fastembed" | "local" => Ok(Self::FastEmbed),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(ConfigError::InvalidValue {
                key: "EMBEDDING_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hashing => write!(f, "hashing"),
            Self::FastEmbed => write!(f, "fastembed"),
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
