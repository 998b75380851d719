//! Embedding generation for chunk and query text.
//!
//! Two backends implement [`EmbeddingGenerator`]:
//! - [`FastEmbedGenerator`]: local ONNX sentence-transformer models via fastembed
//! - [`HashedNgramEmbedder`]: deterministic character-trigram feature hashing,
//!   usable offline and in tests
//!
//! Every backend returns L2-normalized vectors, so inner product equals
//! cosine similarity downstream.

use crate::vector::clustering::normalize_vector;
use crate::vector::{VectorDimension, VectorError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Trait for generating embeddings from text.
///
/// Implementations of this trait should be thread-safe and
/// capable of handling batch processing efficiently.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts.
    ///
    /// # Returns
    /// A vector of unit-length embeddings, one for each input text, in input order
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Identifier of the underlying model, reported when an index is built.
    fn model_name(&self) -> String;
}

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Fastembed,
    Hashed,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fastembed" => Ok(Self::Fastembed),
            "hashed" => Ok(Self::Hashed),
            other => Err(VectorError::InvalidConfig(format!(
                "unknown embedding backend '{other}' (expected 'fastembed' or 'hashed')"
            ))),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend used to embed chunks and queries
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Model to use for embeddings (fastembed backend)
    #[serde(default = "default_model")]
    pub model: String,

    /// Texts sent to the model per call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Output dimension of the hashed backend
    #[serde(default = "default_hashed_dimension")]
    pub dimension: usize,

    /// Show a progress bar while a model downloads
    #[serde(default)]
    pub show_download_progress: bool,
}

fn default_model() -> String {
    "AllMiniLML6V2".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_hashed_dimension() -> usize {
    crate::vector::VECTOR_DIMENSION_384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model: default_model(),
            batch_size: default_batch_size(),
            dimension: default_hashed_dimension(),
            show_download_progress: false,
        }
    }
}

/// Directory where fastembed caches downloaded models.
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("docsift")
        .join("models")
}

/// Build the generator selected by `config`.
pub fn create_generator(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingGenerator>, VectorError> {
    match config.backend {
        EmbeddingBackend::Fastembed => {
            let model = parse_embedding_model(&config.model)?;
            Ok(Arc::new(FastEmbedGenerator::with_model(
                model,
                config.show_download_progress,
            )?))
        }
        EmbeddingBackend::Hashed => Ok(Arc::new(HashedNgramEmbedder::new(
            VectorDimension::new(config.dimension)?,
        ))),
    }
}

/// Parse a model name from configuration into a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "BGELargeENV15" => Ok(EmbeddingModel::BGELargeENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        "NomicEmbedTextV15" => Ok(EmbeddingModel::NomicEmbedTextV15),
        other => Err(VectorError::InvalidConfig(format!(
            "unknown embedding model '{other}'. Supported: AllMiniLML6V2, AllMiniLML12V2, \
             BGESmallENV15, BGEBaseENV15, BGELargeENV15, MultilingualE5Small, NomicEmbedTextV15"
        ))),
    }
}

/// FastEmbed implementation backed by a local ONNX model.
///
/// The default AllMiniLML6V2 model produces 384-dimensional embeddings.
/// The model is not safe to call concurrently, so calls are serialized
/// behind a mutex.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    name: String,
}

impl FastEmbedGenerator {
    /// Create a new FastEmbed generator with the AllMiniLML6V2 model.
    ///
    /// # Errors
    /// Returns an error if the model fails to initialize or download.
    pub fn new() -> Result<Self, VectorError> {
        Self::with_model(EmbeddingModel::AllMiniLML6V2, false)
    }

    /// Create a generator for a specific model.
    ///
    /// The output dimension is discovered by embedding a probe string.
    pub fn with_model(model: EmbeddingModel, show_progress: bool) -> Result<Self, VectorError> {
        let name = format!("{model:?}");
        let cache_dir = models_dir();

        tracing::info!(
            target: "embedding",
            "loading embedding model {name} from {}",
            cache_dir.display()
        );

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to probe model: {e}")))?;
        let dimension = probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| VectorError::EmbeddingFailed("model returned no embedding".into()))?;

        Ok(Self {
            model: Mutex::new(text_model),
            dimension: VectorDimension::new(dimension)?,
            name,
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(texts.to_vec(), None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in embeddings.iter_mut() {
            self.dimension.validate_vector(embedding)?;
            normalize_vector(embedding);
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        self.name.clone()
    }
}

/// Deterministic embedder using hashed character trigrams.
///
/// Each lowercased word is padded with spaces and split into trigrams, and
/// every trigram is hashed (FNV-1a) into a signed bucket. Texts that share
/// word fragments land close together, which is enough for lexical
/// retrieval without a model download.
#[derive(Debug, Clone, Copy)]
pub struct HashedNgramEmbedder {
    dimension: VectorDimension,
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self::new(VectorDimension::dimension_384())
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

impl HashedNgramEmbedder {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];
        let mut gram = String::with_capacity(12);

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let padded: Vec<char> = std::iter::once(' ')
                .chain(word.chars().flat_map(char::to_lowercase))
                .chain(std::iter::once(' '))
                .collect();

            for window in padded.windows(3) {
                gram.clear();
                gram.extend(window);
                let hash = fnv1a(gram.as_bytes());
                let bucket = (hash % dim as u64) as usize;
                let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
                embedding[bucket] += sign;
            }
        }

        normalize_vector(&mut embedding);
        embedding
    }
}

impl EmbeddingGenerator for HashedNgramEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        format!("hashed-trigram-{}", self.dimension.get())
    }
}

/// Embed `texts` in batches of `batch_size`, preserving input order.
///
/// Fails if the generator returns a different number of vectors than texts
/// or a vector of the wrong dimension.
pub fn embed_in_batches(
    generator: &dyn EmbeddingGenerator,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, VectorError> {
    let batch_size = batch_size.max(1);
    let dimension = generator.dimension();
    let mut embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size) {
        let vectors = generator.generate_embeddings(batch)?;
        if vectors.len() != batch.len() {
            return Err(VectorError::EmbeddingFailed(format!(
                "expected {} embeddings, generator returned {}",
                batch.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            dimension.validate_vector(vector)?;
        }
        embeddings.extend(vectors);
    }

    Ok(embeddings)
}
