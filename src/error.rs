//! Error types for the retrieval subsystem
//!
//! This module provides structured error types using thiserror so callers get
//! a stable status code and actionable suggestions for every failure.

use crate::types::DocumentId;
use crate::vector::VectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for chunking, indexing, persistence and retrieval
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Query or input vector does not match the index dimensionality
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Index was built by a different embedding model than the one querying it
    #[error(
        "Document '{doc_id}' was indexed with embedding model '{indexed_with}', cannot query it with '{query_model}'"
    )]
    ModelMismatch {
        doc_id: DocumentId,
        indexed_with: String,
        query_model: String,
    },

    /// Clustered index used before training, or trained with too little data
    #[error("Clustered index is not trained: {reason}")]
    IndexNotTrained { reason: String },

    /// Artifacts exist on disk but cannot be parsed
    #[error("Persisted index at '{path}' is corrupt: {reason}")]
    PersistenceCorrupt { path: PathBuf, reason: String },

    /// Failure reported by the embedding capability
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailure(String),

    #[error("Document '{doc_id}' has no index. Ingest it before querying.")]
    DocumentNotIndexed { doc_id: DocumentId },

    #[error("Invalid document id '{id}': {reason}")]
    InvalidDocumentId { id: String, reason: &'static str },

    #[error("I/O failure on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    /// Vector-level failures without a more specific kind
    #[error("Index operation failed: {0}")]
    Index(String),
}

impl RetrievalError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::ModelMismatch { .. } => "MODEL_MISMATCH",
            Self::IndexNotTrained { .. } => "INDEX_NOT_TRAINED",
            Self::PersistenceCorrupt { .. } => "PERSISTENCE_CORRUPT",
            Self::EmbeddingFailure(_) => "EMBEDDING_FAILURE",
            Self::DocumentNotIndexed { .. } => "DOCUMENT_NOT_INDEXED",
            Self::InvalidDocumentId { .. } => "INVALID_DOCUMENT_ID",
            Self::Io { .. } => "IO_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::TaskFailed(_) => "TASK_FAILED",
            Self::Index(_) => "INDEX_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::DimensionMismatch { .. } => vec![
                "Query with the same embedding model that built the index",
                "Run 'docsift index --force' after changing the embedding model",
            ],
            Self::ModelMismatch { .. } => vec![
                "Set embedding.backend and embedding.model to the ones used at indexing time",
                "Run 'docsift index --force' to re-embed with the current model",
            ],
            Self::IndexNotTrained { .. } => vec![
                "Accumulate at least as many vectors as configured clusters before training",
                "Use index.kind = \"flat\" for small documents",
            ],
            Self::PersistenceCorrupt { .. } => vec![
                "The index will be rebuilt from the source chunks on next ingestion",
                "Run 'docsift index --force' to rebuild it now",
            ],
            Self::EmbeddingFailure(_) => vec![
                "Check that the embedding model downloaded correctly",
                "Try '--embedder hashed' to work offline",
            ],
            Self::DocumentNotIndexed { .. } => vec!["Run 'docsift index <file>' first"],
            Self::Io { .. } => vec![
                "Check disk space and permissions in the index directory",
                "Ensure the file is not locked by another process",
            ],
            Self::Config { .. } => vec!["Run 'docsift config' to inspect the active settings"],
            _ => vec![],
        }
    }
}

impl From<VectorError> for RetrievalError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::NotTrained { clusters } => Self::IndexNotTrained {
                reason: format!("{clusters} clusters have no centroids yet"),
            },
            VectorError::InsufficientTrainingData { required, actual } => Self::IndexNotTrained {
                reason: format!("training needs at least {required} vectors, got {actual}"),
            },
            VectorError::EmbeddingFailed(message) => Self::EmbeddingFailure(message),
            other => Self::Index(other.to_string()),
        }
    }
}

/// Result type alias for retrieval operations
pub type RetrievalResult<T> = Result<T, RetrievalError>;
