//! Embedding clients for generating vector representations
//!
//! Supports a local feature-hashing embedder, the Ollama and OpenAI embedding
//! APIs, and local ONNX models through fastembed behind the
//! `local-embeddings` feature. The configured default is fastembed when that
//! feature is on and the hashing embedder otherwise.
//!
//! Every client is all-or-nothing per batch: either one vector of
//! `dimension()` comes back for every input, or the whole call fails.

use async_trait::async_trait;
use chemkb_core::{EmbeddingConfig, EmbeddingProvider, KbError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| KbError::Embedding("No embedding returned".to_string()))
    }

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    /// Identifier of the model producing the vectors
    ///
    /// Persisted indexes are only reused when this matches.
    fn model_id(&self) -> String;
}

/// Check a provider response against the batch contract
pub fn validate_batch(
    expected_len: usize,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected_len {
        return Err(KbError::Embedding(format!(
            "expected {expected_len} embeddings, got {}",
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(KbError::Embedding(format!(
            "expected {dimension}-dimensional embeddings, got {}",
            bad.len()
        )));
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(KbError::Embedding(
            "embedding contains non-finite values".to_string(),
        ));
    }
    Ok(vectors)
}

fn model_id(provider: EmbeddingProvider, model: &str, dimension: usize) -> String {
    format!("{provider}:{model}:{dimension}")
}

// ============================================================================
// Hashing Embedder
// ============================================================================

/// Default model name of the hashing embedder
pub const HASHING_MODEL: &str = "token-hash-v2";

/// Default dimension of the hashing embedder
pub const HASHING_DIMENSION: usize = 384;

/// Sentence-transformer served by the `fastembed` provider
pub const FASTEMBED_MODEL: &str = "all-MiniLM-L6-v2";

/// Local, deterministic bag-of-words embedder
///
/// Lowercased alphanumeric tokens are hashed into `dimension` signed buckets
/// and the result is L2-normalized. Texts without tokens embed to the zero
/// vector. Needs no model download or network.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed one text synchronously
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = token_hash(&token.to_lowercase());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_DIMENSION)
    }
}

/// First eight bytes of the token's SHA-256, stable across platforms and releases
fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[async_trait]
impl EmbeddingClient for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        model_id(EmbeddingProvider::Hashing, HASHING_MODEL, self.dimension)
    }
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model,
            dimension,
        }
    }

    /// Use an OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the expected dimension
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| KbError::Config("OpenAI API key required".to_string()))?;

        let mut client = Self::new(api_key.clone(), provider_model(config, "text-embedding-3-small"));
        client.client = http_client(config.timeout_secs)?;
        if let Some(base_url) = &config.openai_base_url {
            client = client.with_base_url(base_url.clone());
        }
        if let Some(dimension) = config.dimension {
            client = client.with_dimension(dimension);
        }
        Ok(client)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| KbError::Embedding(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(KbError::Embedding(format!(
                "OpenAI embedding error: {error_text}"
            )));
        }

        let result: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KbError::Embedding(format!("Failed to parse embedding response: {e}")))?;

        // Sort by index and extract embeddings
        let mut embeddings: Vec<_> = result.data.into_iter().collect();
        embeddings.sort_by_key(|e| e.index);

        validate_batch(
            texts.len(),
            self.dimension,
            embeddings.into_iter().map(|e| e.embedding).collect(),
        )
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        model_id(EmbeddingProvider::OpenAI, &self.model, self.dimension)
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 768, // nomic-embed-text and most others
        };

        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            dimension,
        }
    }

    /// Override the expected dimension
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut client = Self::new(
            config.ollama_url.clone(),
            provider_model(config, "nomic-embed-text"),
        );
        client.client = http_client(config.timeout_secs)?;
        if let Some(dimension) = config.dimension {
            client = client.with_dimension(dimension);
        }
        Ok(client)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| KbError::Embedding(format!("Ollama embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(KbError::Embedding(format!(
                "Ollama embedding error: {error_text}"
            )));
        }

        let result: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KbError::Embedding(format!("Failed to parse embedding response: {e}")))?;

        Ok(result.embedding)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Ollama doesn't have native batch embedding, so we process sequentially
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_one(text).await?);
        }
        validate_batch(texts.len(), self.dimension, results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        model_id(EmbeddingProvider::Ollama, &self.model, self.dimension)
    }
}

// ============================================================================
// FastEmbed (local ONNX)
// ============================================================================

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedEmbedding;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Arc;
    use tokio::sync::{Mutex, OnceCell};

    /// Local all-MiniLM-L6-v2 sentence embeddings
    ///
    /// The model is loaded on first use; inference runs on the blocking pool.
    pub struct FastEmbedEmbedding {
        model: OnceCell<Arc<Mutex<TextEmbedding>>>,
    }

    impl FastEmbedEmbedding {
        pub const MODEL: &'static str = FASTEMBED_MODEL;
        pub const DIMENSION: usize = 384;

        pub fn new() -> Self {
            Self {
                model: OnceCell::new(),
            }
        }

        async fn get_model(&self) -> Result<Arc<Mutex<TextEmbedding>>> {
            self.model
                .get_or_try_init(|| async {
                    tokio::task::spawn_blocking(|| {
                        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                            .with_show_download_progress(false);
                        TextEmbedding::try_new(options)
                            .map(|m| Arc::new(Mutex::new(m)))
                            .map_err(|e| {
                                KbError::Embedding(format!("Failed to load embedding model: {e}"))
                            })
                    })
                    .await
                    .map_err(|e| KbError::Embedding(format!("Model load task failed: {e}")))?
                })
                .await
                .map(Arc::clone)
        }
    }

    impl Default for FastEmbedEmbedding {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl EmbeddingClient for FastEmbedEmbedding {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let model = self.get_model().await?;
            let inputs = texts.to_vec();
            let vectors = tokio::task::spawn_blocking(move || {
                let mut model = model.blocking_lock();
                model.embed(inputs, None)
            })
            .await
            .map_err(|e| KbError::Embedding(format!("Embedding task failed: {e}")))?
            .map_err(|e| KbError::Embedding(format!("Embedding failed: {e}")))?;

            validate_batch(texts.len(), Self::DIMENSION, vectors)
        }

        fn dimension(&self) -> usize {
            Self::DIMENSION
        }

        fn model_id(&self) -> String {
            model_id(EmbeddingProvider::FastEmbed, Self::MODEL, Self::DIMENSION)
        }
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Configured model name, or the provider default when a local default
/// was left in place
fn provider_model(config: &EmbeddingConfig, default: &str) -> String {
    if config.model.is_empty() || config.model == HASHING_MODEL || config.model == FASTEMBED_MODEL
    {
        default.to_string()
    } else {
        config.model.clone()
    }
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| KbError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Create an embedding client from config
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    let client: Box<dyn EmbeddingClient> = match config.provider {
        EmbeddingProvider::Hashing => Box::new(HashingEmbedder::new(
            config.dimension.unwrap_or(HASHING_DIMENSION),
        )),
        EmbeddingProvider::OpenAI => Box::new(OpenAiEmbedding::from_config(config)?),
        EmbeddingProvider::Ollama => Box::new(OllamaEmbedding::from_config(config)?),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::FastEmbed => Box::new(FastEmbedEmbedding::new()),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::FastEmbed => {
            return Err(KbError::Config(
                "fastembed provider requires the `local-embeddings` feature".to_string(),
            ))
        }
    };

    debug!(model_id = %client.model_id(), "Created embedding client");
    Ok(client)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn test_hashing_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let texts = vec!["Reynolds number".to_string(), "reynolds NUMBER!".to_string()];

        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), HASHING_DIMENSION);
        assert_eq!(vectors[0], vectors[1]);

        let norm = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_separates_unrelated_text() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("Beta").await.unwrap();
        let same = embedder.embed("Beta. ").await.unwrap();
        let other = embedder.embed("Alpha. ").await.unwrap();

        assert_eq!(distance(&query, &same), 0.0);
        assert!(distance(&query, &other) > 1.0);
    }

    #[test]
    fn test_token_hash_is_stable() {
        // Persisted caches depend on these values never changing
        assert_eq!(token_hash("reynolds"), 0x607f_125f_c57b_c160);
        assert_eq!(token_hash("beta"), 0xf44e_64e7_5f39_48e9);

        let embedder = HashingEmbedder::new(384);
        let vector = embedder.embed_text("Beta");
        assert_eq!(vector[(0xf44e_64e7_5f39_48e9u64 % 384) as usize], -1.0);
    }

    #[test]
    fn test_hashing_without_tokens_is_zero() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_text(" \n\n ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_model_ids() {
        assert_eq!(HashingEmbedder::new(64).model_id(), "hashing:token-hash-v2:64");

        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-large");
        assert_eq!(client.dimension(), 3072);
        assert_eq!(client.model_id(), "openai:text-embedding-3-large:3072");

        let client = OllamaEmbedding::new("http://localhost:11434/", "mxbai-embed-large");
        assert_eq!(client.dimension(), 1024);
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_validate_batch_is_all_or_nothing() {
        assert!(validate_batch(2, 3, vec![vec![0.0; 3], vec![1.0; 3]]).is_ok());
        assert!(matches!(
            validate_batch(2, 3, vec![vec![0.0; 3]]),
            Err(KbError::Embedding(_))
        ));
        assert!(validate_batch(2, 3, vec![vec![0.0; 3], vec![0.0; 2]]).is_err());
        assert!(validate_batch(1, 2, vec![vec![0.0, f32::NAN]]).is_err());
    }

    #[test]
    fn test_factory() {
        let config = EmbeddingConfig::default();
        let client = create_embedding_client(&config).unwrap();
        assert_eq!(client.dimension(), HASHING_DIMENSION);

        let config = EmbeddingConfig {
            provider: EmbeddingProvider::OpenAI,
            ..Default::default()
        };
        assert!(matches!(
            create_embedding_client(&config),
            Err(KbError::Config(_))
        ));

        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Ollama,
            dimension: Some(512),
            ..Default::default()
        };
        let client = create_embedding_client(&config).unwrap();
        assert_eq!(client.model_id(), "ollama:nomic-embed-text:512");
    }
}
