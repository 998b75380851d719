//! Per-document index store.
//!
//! Maps a [`DocumentId`] to a live [`VectorIndex`] with its aligned chunk
//! texts, persisting every build so later queries skip re-embedding.
//!
//! # Concurrency
//! Built indexes are cached behind `Arc` and shared read-only. Mutation for
//! one document (build, persist, cache insert, removal) runs under that
//! document's own mutex, so concurrent first requests for the same document
//! produce exactly one build while unrelated documents proceed in parallel.
//!
//! Cached indexes are never evicted. A document's lock entry is dropped by
//! [`DocumentIndexStore::remove`] and after a failed open or load, as long as no
//! other caller is waiting on it.

mod artifacts;

pub use artifacts::{
    ArtifactPaths, CHUNK_DELIMITER, ChunkFile, ChunkFormat, decode_chunks, encode_chunks,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::chunking::{ChunkingConfig, chunk_text};
use crate::config::Settings;
use crate::error::{RetrievalError, RetrievalResult};
use crate::types::DocumentId;
use crate::vector::storage::{encode_index, read_index_file};
use crate::vector::{EmbeddingGenerator, IndexConfig, VectorIndex, embed_in_batches};

/// Persistence settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Encoding used when writing chunk texts. Both encodings are readable.
    #[serde(default)]
    pub chunk_format: ChunkFormat,
}

/// One document's index with the stamp of the artifact pair it matches.
#[derive(Debug)]
pub struct DocumentIndex {
    id: DocumentId,
    index: VectorIndex,
    generation: u64,
    model: String,
}

impl DocumentIndex {
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Embedding model the vectors were produced with
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Chunk texts in position order
    pub fn chunks(&self) -> &[String] {
        self.index.texts()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Owns the cached indexes and artifacts under one directory.
///
/// Construct once and share by `Arc`; independent stores over different
/// directories do not interact.
#[derive(Debug)]
pub struct DocumentIndexStore {
    root: PathBuf,
    index_config: IndexConfig,
    chunking: ChunkingConfig,
    chunk_format: ChunkFormat,
    batch_size: usize,
    cache: DashMap<DocumentId, Arc<DocumentIndex>>,
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
}

impl DocumentIndexStore {
    pub fn new(root: impl Into<PathBuf>, index_config: IndexConfig) -> Self {
        Self {
            root: root.into(),
            index_config,
            chunking: ChunkingConfig::default(),
            chunk_format: ChunkFormat::default(),
            batch_size: 32,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Store configured from the `[index]`, `[chunking]`, `[storage]` and
    /// `[embedding]` sections, rooted at the resolved index directory.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.index_dir(), settings.index)
            .with_chunking(settings.chunking)
            .with_chunk_format(settings.storage.chunk_format)
            .with_batch_size(settings.embedding.batch_size)
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_chunk_format(mut self, chunk_format: ChunkFormat) -> Self {
        self.chunk_format = chunk_format;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_config(&self) -> &IndexConfig {
        &self.index_config
    }

    pub fn paths(&self, doc_id: &DocumentId) -> ArtifactPaths {
        ArtifactPaths::new(&self.root, doc_id)
    }

    /// Cached index for `doc_id`, without touching disk.
    pub fn get(&self, doc_id: &DocumentId) -> Option<Arc<DocumentIndex>> {
        self.cache.get(doc_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, doc_id: &DocumentId) -> bool {
        self.cache.contains_key(doc_id)
    }

    /// Identities currently held in memory, sorted.
    pub fn cached_documents(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.cache.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Try to load the persisted pair for `doc_id` into the cache.
    ///
    /// Returns `false` when either artifact is missing or unreadable; a
    /// corrupt pair is logged and left for the next build to replace.
    pub fn load(&self, doc_id: &DocumentId) -> bool {
        let lock = self.lock_for(doc_id);
        let _guard = lock.lock();
        let loaded = self.load_locked(doc_id).is_some();
        if !loaded {
            self.release_lock(doc_id, &lock);
        }
        loaded
    }

    /// Persist the cached index for `doc_id`, replacing any previous pair.
    pub fn save(&self, doc_id: &DocumentId) -> RetrievalResult<()> {
        let lock = self.lock_for(doc_id);
        let _guard = lock.lock();

        let current = self
            .get(doc_id)
            .ok_or_else(|| RetrievalError::DocumentNotIndexed {
                doc_id: doc_id.clone(),
            })?;
        let saved = self.persist(doc_id, current.index.clone(), current.model.clone())?;
        self.cache.insert(doc_id.clone(), saved);
        Ok(())
    }

    /// Cached index if present, else the persisted one, else a fresh build
    /// from `chunks` that is persisted before it is returned.
    ///
    /// Concurrent callers for the same unseen document share one build.
    pub fn get_or_build(
        &self,
        doc_id: &DocumentId,
        chunks: &[String],
        embedder: &dyn EmbeddingGenerator,
    ) -> RetrievalResult<Arc<DocumentIndex>> {
        if let Some(hit) = self.get(doc_id) {
            tracing::debug!(target: "store", "cache hit for {doc_id}");
            return Ok(hit);
        }

        let lock = self.lock_for(doc_id);
        let _guard = lock.lock();

        // Another caller may have finished while we waited
        if let Some(hit) = self.get(doc_id) {
            tracing::debug!(target: "store", "reusing concurrent build for {doc_id}");
            return Ok(hit);
        }
        if let Some(loaded) = self.load_locked(doc_id) {
            return Ok(loaded);
        }

        self.build_locked(doc_id, chunks, embedder)
    }

    /// Chunk raw `text` with the configured chunker, then [`Self::get_or_build`].
    pub fn ingest_text(
        &self,
        doc_id: &DocumentId,
        text: &str,
        embedder: &dyn EmbeddingGenerator,
    ) -> RetrievalResult<Arc<DocumentIndex>> {
        if let Some(hit) = self.get(doc_id) {
            return Ok(hit);
        }
        let chunks = chunk_text(text, self.chunking.chunk_size, self.chunking.overlap);
        self.get_or_build(doc_id, &chunks, embedder)
    }

    /// Build from `chunks` unconditionally, replacing the cached index and
    /// the persisted pair.
    pub fn rebuild(
        &self,
        doc_id: &DocumentId,
        chunks: &[String],
        embedder: &dyn EmbeddingGenerator,
    ) -> RetrievalResult<Arc<DocumentIndex>> {
        let lock = self.lock_for(doc_id);
        let _guard = lock.lock();
        self.build_locked(doc_id, chunks, embedder)
    }

    /// Cached index, or the persisted one. Never builds.
    pub fn open(&self, doc_id: &DocumentId) -> RetrievalResult<Arc<DocumentIndex>> {
        if let Some(hit) = self.get(doc_id) {
            return Ok(hit);
        }

        let lock = self.lock_for(doc_id);
        let _guard = lock.lock();
        if let Some(hit) = self.get(doc_id) {
            return Ok(hit);
        }
        match self.load_locked(doc_id) {
            Some(loaded) => Ok(loaded),
            None => {
                self.release_lock(doc_id, &lock);
                Err(RetrievalError::DocumentNotIndexed {
                    doc_id: doc_id.clone(),
                })
            }
        }
    }

    /// Drop `doc_id` from memory and delete its artifacts.
    ///
    /// Returns whether anything was removed.
    pub fn remove(&self, doc_id: &DocumentId) -> RetrievalResult<bool> {
        let lock = self.lock_for(doc_id);
        let _guard = lock.lock();

        let cached = self.cache.remove(doc_id).is_some();
        let paths = self.paths(doc_id);
        let index_removed = artifacts::remove_if_exists(&paths.index)?;
        let chunks_removed = artifacts::remove_if_exists(&paths.chunks)?;
        self.release_lock(doc_id, &lock);

        if cached || index_removed || chunks_removed {
            tracing::info!(target: "store", "removed {doc_id}");
        }
        Ok(cached || index_removed || chunks_removed)
    }

    /// Read the persisted pair for `doc_id` without caching it.
    ///
    /// `Ok(None)` when either file is missing, `PersistenceCorrupt` when the
    /// files exist but do not form a valid pair.
    pub fn read_artifacts(&self, doc_id: &DocumentId) -> RetrievalResult<Option<DocumentIndex>> {
        let paths = self.paths(doc_id);
        match (paths.index_exists(), paths.chunks_exist()) {
            (true, true) => {}
            (false, false) => return Ok(None),
            (index, chunks) => {
                tracing::warn!(
                    target: "store",
                    "incomplete artifact pair for {doc_id} (index: {index}, chunks: {chunks})"
                );
                return Ok(None);
            }
        }

        let corrupt = |path: &Path, reason: String| RetrievalError::PersistenceCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let chunk_bytes = std::fs::read(&paths.chunks).map_err(|source| RetrievalError::Io {
            path: paths.chunks.clone(),
            source,
        })?;
        let chunk_file = decode_chunks(&chunk_bytes).map_err(|reason| corrupt(&paths.chunks, reason))?;

        let decoded = read_index_file(&paths.index, chunk_file.texts)
            .map_err(|e| corrupt(&paths.index, e.to_string()))?;

        match chunk_file.generation {
            Some(generation) if generation != decoded.generation => {
                return Err(corrupt(
                    &paths.index,
                    format!(
                        "generation {:016x} does not match chunk file generation {generation:016x}",
                        decoded.generation
                    ),
                ));
            }
            Some(_) => {}
            None => tracing::debug!(
                target: "store",
                "chunk file for {doc_id} has no generation stamp, pairing by count only"
            ),
        }

        Ok(Some(DocumentIndex {
            id: doc_id.clone(),
            index: decoded.index,
            generation: decoded.generation,
            model: decoded.model,
        }))
    }

    fn lock_for(&self, doc_id: &DocumentId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(doc_id.clone()).or_default().value())
    }

    /// Drop the lock entry for `doc_id` unless another caller holds a clone.
    /// `held` is the caller's own clone, so the map plus the caller make two.
    fn release_lock(&self, doc_id: &DocumentId, held: &Arc<Mutex<()>>) {
        self.locks
            .remove_if(doc_id, |_, lock| Arc::ptr_eq(lock, held) && Arc::strong_count(lock) == 2);
    }

    /// Caller must hold the document lock.
    fn load_locked(&self, doc_id: &DocumentId) -> Option<Arc<DocumentIndex>> {
        let start = Instant::now();
        match self.read_artifacts(doc_id) {
            Ok(Some(loaded)) => {
                tracing::info!(
                    target: "store",
                    "loaded {doc_id}: {} chunks ({} index) in {:?}",
                    loaded.len(),
                    loaded.index.kind().as_str(),
                    start.elapsed()
                );
                let loaded = Arc::new(loaded);
                self.cache.insert(doc_id.clone(), Arc::clone(&loaded));
                Some(loaded)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(target: "store", "ignoring persisted index for {doc_id}: {e}");
                None
            }
        }
    }

    /// Caller must hold the document lock.
    fn build_locked(
        &self,
        doc_id: &DocumentId,
        chunks: &[String],
        embedder: &dyn EmbeddingGenerator,
    ) -> RetrievalResult<Arc<DocumentIndex>> {
        let start = Instant::now();
        let texts: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let vectors = embed_in_batches(embedder, &texts, self.batch_size)?;
        let index = VectorIndex::build(&self.index_config, embedder.dimension(), &vectors, chunks)?;

        tracing::info!(
            target: "store",
            "built {} index for {doc_id}: {} chunks with {} in {:?}",
            index.kind().as_str(),
            index.len(),
            embedder.model_name(),
            start.elapsed()
        );

        let built = self.persist(doc_id, index, embedder.model_name())?;
        self.cache.insert(doc_id.clone(), Arc::clone(&built));
        Ok(built)
    }

    /// Write the pair under a fresh generation stamp. Caller must hold the
    /// document lock.
    fn persist(
        &self,
        doc_id: &DocumentId,
        index: VectorIndex,
        model: String,
    ) -> RetrievalResult<Arc<DocumentIndex>> {
        std::fs::create_dir_all(&self.root).map_err(|source| RetrievalError::Io {
            path: self.root.clone(),
            source,
        })?;

        let generation: u64 = rand::random();
        let paths = self.paths(doc_id);

        artifacts::write_atomic(
            &paths.chunks,
            &encode_chunks(index.texts(), self.chunk_format, generation),
        )?;
        artifacts::write_atomic(&paths.index, &encode_index(&index, generation, &model))?;

        tracing::debug!(
            target: "store",
            "saved {doc_id} generation {generation:016x} to {}",
            self.root.display()
        );

        Ok(Arc::new(DocumentIndex {
            id: doc_id.clone(),
            index,
            generation,
            model,
        }))
    }
}
