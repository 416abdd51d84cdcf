//! chemkb Vector - Embeddings and similarity search
//!
//! Provides the embedding clients that turn chunk text into dense vectors
//! and the flat L2 index used to retrieve the nearest chunks for a query.

pub mod embedding;
pub mod index;

pub use embedding::{
    create_embedding_client, validate_batch, EmbeddingClient, HashingEmbedder, OllamaEmbedding,
    OpenAiEmbedding, FASTEMBED_MODEL, HASHING_DIMENSION, HASHING_MODEL,
};
#[cfg(feature = "local-embeddings")]
pub use embedding::FastEmbedEmbedding;
pub use index::{FlatL2Index, Neighbor};
