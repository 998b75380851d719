//! K-means clustering used to train the clustered (IVF) index.
//!
//! Centroids are kept at unit length and compared with cosine similarity,
//! which equals the inner product the index ranks by once inputs are
//! normalized. Seeding uses K-means++ driven by a caller-supplied seed so
//! that training the same vectors twice produces the same partition.
//!
//! # Algorithm Details
//! - Distance metric: Cosine similarity (not Euclidean)
//! - Initialization: K-means++ with a seeded RNG
//! - Max iterations: 100
//! - Convergence tolerance: 1e-4
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - Assignment step runs on the rayon pool

use crate::vector::types::ClusterId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

/// Maximum number of iterations for K-means clustering.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Unit-length cluster centroids.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are generated before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,
}

/// Performs seeded K-means clustering on a set of vectors using cosine similarity.
///
/// # Arguments
/// * `vectors` - Input vectors to cluster (must be non-empty and same dimension)
/// * `k` - Number of clusters (must be >= 1 and <= number of vectors)
/// * `seed` - RNG seed for initialization and empty-cluster reseeding
///
/// # Algorithm
/// 1. Initialize centroids using K-means++
/// 2. Iterate until convergence or max iterations:
///    - Assign each vector to nearest centroid (by cosine similarity)
///    - Update centroids as the normalized mean of assigned vectors
///    - Check convergence based on centroid movement
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    k: usize,
    seed: u64,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k, &mut rng);
    let mut assignments = vec![ClusterId::from_index(0); vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments = assign_all(vectors, &centroids);

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= MAX_ITERATIONS {
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, k, &mut rng);

        let centroid_movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if centroid_movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        tracing::warn!(
            target: "vector",
            "k-means did not fully converge after {MAX_ITERATIONS} iterations"
        );
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

fn assign_all(vectors: &[&[f32]], centroids: &[Vec<f32>]) -> Vec<ClusterId> {
    let centroid_refs: Vec<&[f32]> = centroids.iter().map(|c| c.as_slice()).collect();
    vectors
        .par_iter()
        .map(|vector| assign_to_nearest_centroid(vector, &centroid_refs))
        .collect()
}

/// Assigns a vector to the nearest centroid based on cosine similarity.
///
/// Ties resolve to the lowest centroid position.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[&[f32]]) -> ClusterId {
    let mut best_similarity = f32::NEG_INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = cosine_similarity(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best_cluster = i;
        }
    }

    ClusterId::from_index(best_cluster)
}

/// Updates centroids as the normalized mean of their assigned vectors.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[ClusterId],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster_id) in vectors.iter().zip(assignments.iter()) {
        let cluster_idx = cluster_id.index();
        for (sum, &value) in new_centroids[cluster_idx].iter_mut().zip(vector.iter()) {
            *sum += value;
        }
        cluster_sizes[cluster_idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random input vector
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = normalize_vector_copy(vectors[random_idx]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            normalize_vector(centroid);
        }
    }

    new_centroids
}

/// Computes cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]; zero vectors have similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product = inner_product(a, b);
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Plain dot product. Equals cosine similarity for unit vectors.
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Initializes centroids using the K-means++ algorithm.
///
/// When every remaining vector coincides with a chosen centroid the rest of
/// the slots are filled with input vectors in order, so exactly `k`
/// centroids are always returned. Duplicate centroids simply stay empty.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(normalize_vector_copy(vectors[first_idx]));

    while centroids.len() < k {
        let distances: Vec<f32> = vectors
            .iter()
            .map(|vector| {
                let min_distance = centroids
                    .iter()
                    .map(|centroid| 1.0 - cosine_similarity(vector, centroid))
                    .fold(f32::MAX, f32::min);
                min_distance * min_distance
            })
            .collect();
        let total_distance: f32 = distances.iter().sum();

        if total_distance < EPSILON {
            let mut filler = vectors.iter().cycle();
            while centroids.len() < k {
                if let Some(vector) = filler.next() {
                    centroids.push(normalize_vector_copy(vector));
                }
            }
            break;
        }

        // Choose next centroid with probability proportional to squared distance
        let target = rng.random::<f32>() * total_distance;
        let mut cumulative = 0.0;
        let chosen = distances
            .iter()
            .position(|&distance| {
                cumulative += distance;
                cumulative >= target
            })
            .unwrap_or(vectors.len() - 1);

        centroids.push(normalize_vector_copy(vectors[chosen]));
    }

    centroids
}

/// Calculates the mean cosine distance moved by centroids between iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| 1.0 - cosine_similarity(old_c, new_c))
        .sum::<f32>()
        / old.len() as f32
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with a norm too small to divide by are left unchanged.
pub fn normalize_vector(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Creates a normalized copy of a vector.
pub fn normalize_vector_copy(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    normalize_vector(&mut normalized);
    normalized
}
