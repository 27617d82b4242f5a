//! Murmur Vector crate - embedding services and namespaced similarity search.
//!
//! Provides the [`EmbeddingService`] trait (query vs. passage embeddings)
//! with an HTTP implementation and a deterministic mock, and the
//! [`VectorNamespaces`] trait with an in-process brute-force index and a
//! Pinecone REST client.

pub mod embedding;
pub mod error;
pub mod index;
pub mod pinecone;

pub use embedding::{
    DynEmbeddingService, EmbedMode, EmbeddingService, HttpEmbeddingService, MockEmbedding,
};
pub use error::VectorError;
pub use index::{InMemoryNamespaces, Metadata, VectorMatch, VectorNamespaces};
pub use pinecone::PineconeNamespaces;
