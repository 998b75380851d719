//! Vector embedding, indexing and index persistence.
//!
//! # Architecture
//! Chunk texts are embedded into unit-length vectors by an
//! [`EmbeddingGenerator`], appended to a [`VectorIndex`] (exhaustive flat
//! scan, or IVF partitioning trained with seeded k-means) and written to
//! disk through the binary codec in [`storage`].
//!
//! Indexes rank by raw inner product; score normalization happens in the
//! retrieval layer via [`Score::from_inner_product`].

mod clustering;
mod embedding;
mod index;
pub mod storage;
mod types;

pub use clustering::{
    ClusteringError, KMeansResult, assign_to_nearest_centroid, cosine_similarity, inner_product,
    kmeans_clustering, normalize_vector, normalize_vector_copy,
};
pub use embedding::{
    EmbeddingBackend, EmbeddingConfig, EmbeddingGenerator, FastEmbedGenerator,
    HashedNgramEmbedder, create_generator, embed_in_batches, models_dir, parse_embedding_model,
};
pub use index::{Candidate, ClusteredIndex, FlatIndex, IndexConfig, IndexKind, VectorIndex};
pub use storage::{DecodedIndex, VectorStorageError};
pub use types::{ClusterId, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError};
