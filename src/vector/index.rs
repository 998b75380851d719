//! In-memory nearest-neighbour indexes over unit-length vectors.
//!
//! Two variants share one contract: vectors and their chunk texts are
//! appended together, positions are assigned in insertion order, and
//! search ranks by raw inner product (higher is better).
//!
//! - [`FlatIndex`]: exhaustive scan, no training step
//! - [`ClusteredIndex`]: IVF partitioning into `clusters` inverted lists,
//!   scanning the `probes` nearest lists per query. Must be trained before
//!   vectors are added.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::vector::clustering::{assign_to_nearest_centroid, inner_product, kmeans_clustering};
use crate::vector::{ClusterId, VectorDimension, VectorError};

/// Flat indexes are scanned in parallel above this many vectors.
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

/// Index variant selected at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Flat,
    Clustered,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Clustered => "clustered",
        }
    }
}

impl std::str::FromStr for IndexKind {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "clustered" | "ivf" => Ok(Self::Clustered),
            other => Err(VectorError::InvalidConfig(format!(
                "unknown index kind '{other}' (expected 'flat' or 'clustered')"
            ))),
        }
    }
}

/// Index construction settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub kind: IndexKind,

    /// Number of partitions for the clustered index
    #[serde(default = "default_clusters")]
    pub clusters: usize,

    /// Partitions scanned per query
    #[serde(default = "default_probes")]
    pub probes: usize,

    /// Seed for k-means initialization
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_clusters() -> usize {
    4
}

fn default_probes() -> usize {
    2
}

fn default_seed() -> u64 {
    42
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::default(),
            clusters: default_clusters(),
            probes: default_probes(),
            seed: default_seed(),
        }
    }
}

/// A search hit before score normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Insertion position, which is also the chunk ordinal
    pub position: usize,
    pub inner_product: f32,
}

/// Row-major vector storage with one text per row.
#[derive(Debug, Clone)]
struct VectorTable {
    dimension: VectorDimension,
    data: Vec<f32>,
    texts: Vec<String>,
}

impl VectorTable {
    fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            data: Vec::new(),
            texts: Vec::new(),
        }
    }

    fn from_parts(
        dimension: VectorDimension,
        data: Vec<f32>,
        texts: Vec<String>,
    ) -> Result<Self, VectorError> {
        let vectors = data.len() / dimension.get();
        if data.len() % dimension.get() != 0 {
            return Err(VectorError::Serialization(format!(
                "{} floats do not divide into {}-dimensional vectors",
                data.len(),
                dimension.get()
            )));
        }
        if vectors != texts.len() {
            return Err(VectorError::AlignmentMismatch {
                vectors,
                texts: texts.len(),
            });
        }
        Ok(Self {
            dimension,
            data,
            texts,
        })
    }

    fn len(&self) -> usize {
        self.texts.len()
    }

    fn vector(&self, position: usize) -> &[f32] {
        let dim = self.dimension.get();
        &self.data[position * dim..(position + 1) * dim]
    }

    /// Validate a whole batch before touching storage, so a failed add leaves
    /// the table unchanged.
    fn validate_batch(&self, vectors: &[Vec<f32>], texts: &[String]) -> Result<(), VectorError> {
        if vectors.len() != texts.len() {
            return Err(VectorError::AlignmentMismatch {
                vectors: vectors.len(),
                texts: texts.len(),
            });
        }
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }
        Ok(())
    }

    fn push_batch(&mut self, vectors: &[Vec<f32>], texts: &[String]) {
        self.data.reserve(vectors.len() * self.dimension.get());
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        self.texts.extend_from_slice(texts);
    }
}

/// Keep the `k` best candidates, highest inner product first.
///
/// Ties keep insertion order so results are deterministic.
fn rank(mut candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.inner_product
            .total_cmp(&a.inner_product)
            .then(a.position.cmp(&b.position))
    });
    candidates.truncate(k);
    candidates
}

/// Exhaustive inner-product index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    table: VectorTable,
}

impl FlatIndex {
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            table: VectorTable::new(dimension),
        }
    }

    pub(crate) fn from_parts(
        dimension: VectorDimension,
        data: Vec<f32>,
        texts: Vec<String>,
    ) -> Result<Self, VectorError> {
        Ok(Self {
            table: VectorTable::from_parts(dimension, data, texts)?,
        })
    }

    pub fn add(&mut self, vectors: &[Vec<f32>], texts: &[String]) -> Result<(), VectorError> {
        self.table.validate_batch(vectors, texts)?;
        self.table.push_batch(vectors, texts);
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>, VectorError> {
        self.table.dimension.validate_vector(query)?;
        if k == 0 || self.table.len() == 0 {
            return Ok(Vec::new());
        }

        let score = |position: usize| Candidate {
            position,
            inner_product: inner_product(query, self.table.vector(position)),
        };
        let candidates: Vec<Candidate> = if self.table.len() >= PARALLEL_SCAN_THRESHOLD {
            (0..self.table.len()).into_par_iter().map(score).collect()
        } else {
            (0..self.table.len()).map(score).collect()
        };

        Ok(rank(candidates, k))
    }
}

/// Inverted-file index partitioned by k-means centroids.
#[derive(Debug, Clone)]
pub struct ClusteredIndex {
    table: VectorTable,
    clusters: usize,
    probes: usize,
    seed: u64,
    centroids: Vec<Vec<f32>>,
    assignments: Vec<ClusterId>,
    /// Positions per centroid, in insertion order
    lists: Vec<Vec<usize>>,
}

impl ClusteredIndex {
    pub fn new(
        dimension: VectorDimension,
        clusters: usize,
        probes: usize,
        seed: u64,
    ) -> Result<Self, VectorError> {
        if clusters == 0 {
            return Err(VectorError::InvalidConfig(
                "clustered index needs at least one cluster".to_string(),
            ));
        }
        if probes == 0 {
            return Err(VectorError::InvalidConfig(
                "clustered index needs at least one probe".to_string(),
            ));
        }

        Ok(Self {
            table: VectorTable::new(dimension),
            clusters,
            probes,
            seed,
            centroids: Vec::new(),
            assignments: Vec::new(),
            lists: Vec::new(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        dimension: VectorDimension,
        clusters: usize,
        probes: usize,
        seed: u64,
        centroids: Vec<Vec<f32>>,
        assignments: Vec<ClusterId>,
        data: Vec<f32>,
        texts: Vec<String>,
    ) -> Result<Self, VectorError> {
        let mut index = Self::new(dimension, clusters, probes, seed)?;
        index.table = VectorTable::from_parts(dimension, data, texts)?;

        if !centroids.is_empty() && centroids.len() != clusters {
            return Err(VectorError::Serialization(format!(
                "expected {clusters} centroids, found {}",
                centroids.len()
            )));
        }
        for centroid in &centroids {
            dimension.validate_vector(centroid)?;
        }
        if assignments.len() != index.table.len() {
            return Err(VectorError::Serialization(format!(
                "{} assignments for {} vectors",
                assignments.len(),
                index.table.len()
            )));
        }
        if centroids.is_empty() && !assignments.is_empty() {
            return Err(VectorError::NotTrained { clusters });
        }
        if let Some(bad) = assignments.iter().find(|id| id.index() >= clusters) {
            return Err(VectorError::Serialization(format!(
                "assignment to cluster {} out of {clusters}",
                bad.get()
            )));
        }

        index.centroids = centroids;
        index.assignments = assignments;
        index.rebuild_lists();
        Ok(index)
    }

    pub fn clusters(&self) -> usize {
        self.clusters
    }

    pub fn probes(&self) -> usize {
        self.probes
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    pub fn assignments(&self) -> &[ClusterId] {
        &self.assignments
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Learn centroids from `vectors`.
    ///
    /// Needs at least as many vectors as clusters. Vectors already stored
    /// are reassigned to the new centroids.
    pub fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        if vectors.len() < self.clusters {
            return Err(VectorError::InsufficientTrainingData {
                required: self.clusters,
                actual: vectors.len(),
            });
        }
        for vector in vectors {
            self.table.dimension.validate_vector(vector)?;
        }

        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let result = kmeans_clustering(&refs, self.clusters, self.seed)
            .map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;

        tracing::debug!(
            target: "vector",
            "trained {} centroids from {} vectors in {} iterations",
            self.clusters,
            vectors.len(),
            result.iterations
        );

        self.centroids = result.centroids;
        self.assignments = (0..self.table.len())
            .map(|position| self.nearest_centroid(self.table.vector(position)))
            .collect();
        self.rebuild_lists();
        Ok(())
    }

    pub fn add(&mut self, vectors: &[Vec<f32>], texts: &[String]) -> Result<(), VectorError> {
        if !self.is_trained() {
            return Err(VectorError::NotTrained {
                clusters: self.clusters,
            });
        }
        self.table.validate_batch(vectors, texts)?;

        let start = self.table.len();
        let assigned: Vec<ClusterId> = vectors
            .iter()
            .map(|vector| self.nearest_centroid(vector))
            .collect();

        self.table.push_batch(vectors, texts);
        for (offset, cluster) in assigned.into_iter().enumerate() {
            self.lists[cluster.index()].push(start + offset);
            self.assignments.push(cluster);
        }
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>, VectorError> {
        self.table.dimension.validate_vector(query)?;
        if !self.is_trained() {
            return Err(VectorError::NotTrained {
                clusters: self.clusters,
            });
        }
        if k == 0 || self.table.len() == 0 {
            return Ok(Vec::new());
        }

        let mut ranked_lists: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, centroid)| (i, inner_product(query, centroid)))
            .collect();
        ranked_lists.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let candidates = ranked_lists
            .iter()
            .take(self.probes.min(self.clusters))
            .flat_map(|(list, _)| self.lists[*list].iter().copied())
            .map(|position| Candidate {
                position,
                inner_product: inner_product(query, self.table.vector(position)),
            })
            .collect();

        Ok(rank(candidates, k))
    }

    fn nearest_centroid(&self, vector: &[f32]) -> ClusterId {
        let centroid_refs: Vec<&[f32]> = self.centroids.iter().map(Vec::as_slice).collect();
        assign_to_nearest_centroid(vector, &centroid_refs)
    }

    fn rebuild_lists(&mut self) {
        self.lists = vec![Vec::new(); self.centroids.len()];
        for (position, cluster) in self.assignments.iter().enumerate() {
            self.lists[cluster.index()].push(position);
        }
    }
}

/// A document's vector index, in either variant.
#[derive(Debug, Clone)]
pub enum VectorIndex {
    Flat(FlatIndex),
    Clustered(ClusteredIndex),
}

impl VectorIndex {
    /// Create an empty index as described by `config`.
    pub fn new(config: &IndexConfig, dimension: VectorDimension) -> Result<Self, VectorError> {
        match config.kind {
            IndexKind::Flat => Ok(Self::Flat(FlatIndex::new(dimension))),
            IndexKind::Clustered => Ok(Self::Clustered(ClusteredIndex::new(
                dimension,
                config.clusters,
                config.probes,
                config.seed,
            )?)),
        }
    }

    /// Create, train if needed, and fill an index in one step.
    ///
    /// A clustered index with fewer vectors than clusters cannot be trained;
    /// a flat index is built instead.
    pub fn build(
        config: &IndexConfig,
        dimension: VectorDimension,
        vectors: &[Vec<f32>],
        texts: &[String],
    ) -> Result<Self, VectorError> {
        let mut config = *config;
        if config.kind == IndexKind::Clustered && vectors.len() < config.clusters {
            tracing::warn!(
                target: "vector",
                "only {} vectors for {} clusters, building a flat index instead",
                vectors.len(),
                config.clusters
            );
            config.kind = IndexKind::Flat;
        }

        let mut index = Self::new(&config, dimension)?;
        if index.needs_training() {
            index.train(vectors)?;
        }
        index.add(vectors, texts)?;
        Ok(index)
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Flat(_) => IndexKind::Flat,
            Self::Clustered(_) => IndexKind::Clustered,
        }
    }

    pub fn dimension(&self) -> VectorDimension {
        self.table().dimension
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True until a clustered index has centroids. Flat indexes never need training.
    pub fn needs_training(&self) -> bool {
        match self {
            Self::Flat(_) => false,
            Self::Clustered(index) => !index.is_trained(),
        }
    }

    /// Train the index. A no-op for flat indexes.
    pub fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        match self {
            Self::Flat(_) => Ok(()),
            Self::Clustered(index) => index.train(vectors),
        }
    }

    /// Append vectors with their texts. Positions continue from `len()`.
    pub fn add(&mut self, vectors: &[Vec<f32>], texts: &[String]) -> Result<(), VectorError> {
        match self {
            Self::Flat(index) => index.add(vectors, texts),
            Self::Clustered(index) => index.add(vectors, texts),
        }
    }

    /// Up to `k` candidates ranked by inner product with `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>, VectorError> {
        match self {
            Self::Flat(index) => index.search(query, k),
            Self::Clustered(index) => index.search(query, k),
        }
    }

    pub fn text(&self, position: usize) -> Option<&str> {
        self.table().texts.get(position).map(String::as_str)
    }

    pub fn texts(&self) -> &[String] {
        &self.table().texts
    }

    /// All stored vectors, row-major.
    pub fn raw_vectors(&self) -> &[f32] {
        &self.table().data
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        (position < self.len()).then(|| self.table().vector(position))
    }

    fn table(&self) -> &VectorTable {
        match self {
            Self::Flat(index) => &index.table,
            Self::Clustered(index) => &index.table,
        }
    }
}
