//! Document chunking, embedding and vector retrieval.
//!
//! `docsift` turns a document's text into overlapping chunks, embeds them,
//! keeps one persisted vector index per document and answers questions with
//! a bounded, ranked context string for downstream answer generation.

pub mod chunking;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod retrieval;
pub mod store;
pub mod types;
pub mod vector;

pub use chunking::{Chunker, ChunkingConfig, SentenceChunker, chunk_text};
pub use config::Settings;
pub use error::{RetrievalError, RetrievalResult};
pub use retrieval::{RetrievalConfig, RetrievalEngine};
pub use store::{DocumentIndex, DocumentIndexStore, StorageConfig};
pub use types::{Chunk, DocumentId, RetrievedContext, SearchResult};
pub use vector::{
    EmbeddingGenerator, IndexConfig, IndexKind, VectorIndex, create_generator,
};
