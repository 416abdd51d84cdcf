//! chemkb Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout chemkb:
//! - Common error types
//! - Chunk and retrieval result models
//! - Configuration management
//! - Structured physical property lookup
//! - The narrow LLM capability trait consumed by agents

pub mod config;
pub mod properties;

pub use config::{
    AppConfig, ConfigError, EmbeddingConfig, EmbeddingProvider, KnowledgeBaseConfig,
    LoggingConfig,
};
pub use properties::{get_property, lookup_property, PropertyEntry};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for knowledge base operations
#[derive(Error, Debug)]
pub enum KbError {
    /// Source document is missing, unreadable, or not a valid document
    #[error("Failed to ingest {path}: {reason}")]
    Ingestion { path: PathBuf, reason: String },

    /// Embedding model unavailable or returned malformed output
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A vector does not have the dimensionality the index expects
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Query issued before any document was ingested
    #[error("Knowledge base is not ready: ingest a document before querying")]
    NotReady,

    /// Structured property lookup miss
    #[error("Unknown property '{property}' for substance '{substance}'")]
    UnknownProperty { substance: String, property: String },

    /// Language model generation failed
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbError {
    /// Build an ingestion error for a path
    pub fn ingestion(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Ingestion {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller can recover by retrying or choosing a fallback
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotReady | Self::UnknownProperty { .. })
    }
}

impl From<ConfigError> for KbError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KbError>;

// ============================================================================
// Chunk Models
// ============================================================================

/// Kind of extracted content a chunk starts in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    /// Markdown rendering of a detected table
    Table,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// Where a chunk came from inside its document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// 1-based page number (if the source is paginated)
    pub page: Option<u32>,

    /// Whether the chunk starts in page text or a table block
    pub kind: ContentKind,
}

impl Provenance {
    /// Provenance for page text
    pub fn page(page: u32) -> Self {
        Self {
            page: Some(page),
            kind: ContentKind::Text,
        }
    }

    /// Mark as table content
    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A contiguous span of extracted document text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable ordinal within the source document
    pub index: u32,

    /// Text content
    pub text: String,

    /// Source document path
    pub source: PathBuf,

    /// Page/table provenance
    pub provenance: Provenance,

    /// Byte offset of the chunk start in the normalized document
    pub start_offset: usize,

    /// Byte offset one past the chunk end
    pub end_offset: usize,
}

impl Chunk {
    /// Character count of the chunk
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

// ============================================================================
// Retrieval Types
// ============================================================================

/// A chunk returned by a knowledge base query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Full chunk text
    pub chunk_text: String,

    /// Euclidean distance to the query embedding (lower is closer)
    pub distance: f32,

    /// Position of the chunk in the knowledge base index
    pub ordinal: usize,

    /// Source document path
    pub source: PathBuf,

    /// Page number (if applicable)
    pub page: Option<u32>,

    /// Text or table origin
    pub kind: ContentKind,
}

// ============================================================================
// Traits
// ============================================================================

/// Narrow capability interface for language model collaborators.
///
/// Agents implement this to turn retrieved context into an answer. The
/// knowledge base never calls it.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion; failures map to [`KbError::Generation`]
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoLlm;

    #[async_trait::async_trait]
    impl LlmClient for EchoLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if prompt.is_empty() {
                return Err(KbError::Generation("empty prompt".to_string()));
            }
            Ok(prompt.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_llm_client_substitute() {
        let llm: Box<dyn LlmClient> = Box::new(EchoLlm);
        assert_eq!(llm.generate("pressure drop").await.unwrap(), "PRESSURE DROP");
        assert!(matches!(
            llm.generate("").await,
            Err(KbError::Generation(_))
        ));
    }

    #[test]
    fn test_error_recoverability() {
        assert!(KbError::NotReady.is_recoverable());
        assert!(KbError::UnknownProperty {
            substance: "unobtainium".to_string(),
            property: "density".to_string(),
        }
        .is_recoverable());
        assert!(!KbError::ingestion("missing.pdf", "not found").is_recoverable());
        assert!(!KbError::Embedding("model unavailable".to_string()).is_recoverable());
    }

    #[test]
    fn test_ingestion_error_message() {
        let err = KbError::ingestion("/data/perry.pdf", "file not found");
        assert_eq!(
            err.to_string(),
            "Failed to ingest /data/perry.pdf: file not found"
        );
    }

    #[test]
    fn test_provenance_builder() {
        let provenance = Provenance::page(3).with_kind(ContentKind::Table);
        assert_eq!(provenance.page, Some(3));
        assert_eq!(provenance.kind, ContentKind::Table);
        assert_eq!(Provenance::default().kind, ContentKind::Text);
    }

    #[test]
    fn test_chunk_serialization_shape() {
        let chunk = Chunk {
            index: 0,
            text: "Reynolds number".to_string(),
            source: PathBuf::from("perry.pdf"),
            provenance: Provenance::page(1),
            start_offset: 0,
            end_offset: 15,
        };

        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["provenance"]["kind"], "text");
        assert_eq!(chunk.char_count(), 15);
    }
}
