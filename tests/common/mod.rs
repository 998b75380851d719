//! Shared helpers for integration tests

#![allow(dead_code)]

use docsift::vector::{EmbeddingGenerator, HashedNgramEmbedder, VectorDimension, VectorError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Chunks of the insurance policy used across scenarios
pub fn policy_chunks() -> Vec<String> {
    vec![
        "The policy covers theft.".to_string(),
        "It excludes flood damage.".to_string(),
        "Claims must be filed within 30 days.".to_string(),
    ]
}

/// Longer document with enough chunks to train a clustered index
pub fn handbook_chunks() -> Vec<String> {
    [
        "Employees accrue vacation days monthly.",
        "Unused vacation carries over for one year.",
        "Remote work requires manager approval.",
        "Laptops are issued on the first day.",
        "Security badges must be worn on site.",
        "Expense reports are due by the fifth of each month.",
        "Travel must be booked through the internal portal.",
        "Health insurance enrollment opens in November.",
        "Parental leave lasts sixteen weeks.",
        "Performance reviews happen twice a year.",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Hashed embedder that counts calls and can stall to widen race windows
pub struct CountingEmbedder {
    inner: HashedNgramEmbedder,
    calls: AtomicUsize,
    texts: AtomicUsize,
    delay: Duration,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            inner: HashedNgramEmbedder::new(VectorDimension::new(128).unwrap()),
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embedded_texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

impl EmbeddingGenerator for CountingEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.generate_embeddings(texts)
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn model_name(&self) -> String {
        "counting-hashed".to_string()
    }
}

/// 384-dimensional like the default hashed embedder, but a different model
pub struct SignFlippedEmbedder(HashedNgramEmbedder);

impl SignFlippedEmbedder {
    pub fn new() -> Self {
        Self(HashedNgramEmbedder::default())
    }
}

impl EmbeddingGenerator for SignFlippedEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let mut vectors = self.0.generate_embeddings(texts)?;
        for vector in &mut vectors {
            vector.iter_mut().step_by(2).for_each(|x| *x = -*x);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> VectorDimension {
        self.0.dimension()
    }

    fn model_name(&self) -> String {
        "sign-flipped-384".to_string()
    }
}

/// Embedder that always fails
pub struct FailingEmbedder;

impl EmbeddingGenerator for FailingEmbedder {
    fn generate_embeddings(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Err(VectorError::EmbeddingFailed("model unavailable".to_string()))
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::dimension_384()
    }

    fn model_name(&self) -> String {
        "failing".to_string()
    }
}

/// Files in `dir`, sorted by name
pub fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
