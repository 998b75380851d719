//! Training lifecycle of the clustered index

use crate::common::handbook_chunks;
use docsift::vector::{
    ClusteredIndex, EmbeddingGenerator, HashedNgramEmbedder, VectorDimension, VectorError,
};
use docsift::{IndexConfig, IndexKind, RetrievalError, VectorIndex};

fn embed(texts: &[String]) -> Vec<Vec<f32>> {
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    HashedNgramEmbedder::new(VectorDimension::new(96).unwrap())
        .generate_embeddings(&refs)
        .unwrap()
}

#[test]
fn test_four_clusters_need_four_training_vectors() {
    let texts = handbook_chunks();
    let vectors = embed(&texts);
    let mut index = ClusteredIndex::new(VectorDimension::new(96).unwrap(), 4, 2, 42).unwrap();

    // Too little data to train, and add is rejected while untrained
    let err = index.train(&vectors[..3]).unwrap_err();
    assert!(matches!(
        err,
        VectorError::InsufficientTrainingData {
            required: 4,
            actual: 3
        }
    ));
    assert!(!index.is_trained());
    assert!(matches!(
        index.add(&vectors[..3], &texts[..3]),
        Err(VectorError::NotTrained { clusters: 4 })
    ));
    assert!(matches!(
        RetrievalError::from(index.add(&vectors[..1], &texts[..1]).unwrap_err()),
        RetrievalError::IndexNotTrained { .. }
    ));

    // Four vectors are enough; add works immediately after
    index.train(&vectors[..4]).unwrap();
    assert!(index.is_trained());
    assert_eq!(index.centroids().len(), 4);
    index.add(&vectors[..4], &texts[..4]).unwrap();
    assert_eq!(index.assignments().len(), 4);
}

#[test]
fn test_search_before_training_is_rejected() {
    let index = ClusteredIndex::new(VectorDimension::new(96).unwrap(), 4, 2, 42).unwrap();
    let query = embed(&["anything".to_string()]).remove(0);
    assert!(matches!(
        index.search(&query, 3),
        Err(VectorError::NotTrained { .. })
    ));
}

#[test]
fn test_training_with_same_seed_is_reproducible() {
    let texts = handbook_chunks();
    let vectors = embed(&texts);
    let config = IndexConfig {
        kind: IndexKind::Clustered,
        clusters: 3,
        probes: 1,
        seed: 9,
    };
    let dimension = VectorDimension::new(96).unwrap();

    let a = VectorIndex::build(&config, dimension, &vectors, &texts).unwrap();
    let b = VectorIndex::build(&config, dimension, &vectors, &texts).unwrap();
    match (a, b) {
        (VectorIndex::Clustered(a), VectorIndex::Clustered(b)) => {
            assert_eq!(a.assignments(), b.assignments());
            assert_eq!(a.centroids(), b.centroids());
        }
        _ => panic!("expected clustered indexes"),
    }
}

#[test]
fn test_mismatched_batch_is_rejected_atomically() {
    let texts = handbook_chunks();
    let vectors = embed(&texts);
    let mut index = VectorIndex::new(&IndexConfig::default(), VectorDimension::new(96).unwrap())
        .unwrap();

    assert!(matches!(
        index.add(&vectors[..3], &texts[..2]),
        Err(VectorError::AlignmentMismatch {
            vectors: 3,
            texts: 2
        })
    ));
    assert!(index.is_empty());

    let mut bad = vectors[..2].to_vec();
    bad.push(vec![0.0; 12]);
    assert!(index.add(&bad, &texts[..3]).is_err());
    assert!(index.is_empty());
}
