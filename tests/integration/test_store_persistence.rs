//! Build, persist and reload per-document indexes

use crate::common::{CountingEmbedder, FailingEmbedder, file_names, handbook_chunks, policy_chunks};
use docsift::store::ChunkFormat;
use docsift::vector::inner_product;
use docsift::{
    DocumentId, DocumentIndexStore, EmbeddingGenerator, IndexConfig, IndexKind, RetrievalError,
};
use tempfile::TempDir;

fn doc(id: &str) -> DocumentId {
    DocumentId::new(id).unwrap()
}

fn clustered() -> IndexConfig {
    IndexConfig {
        kind: IndexKind::Clustered,
        clusters: 3,
        probes: 3,
        seed: 7,
    }
}

#[test]
fn test_reload_gives_identical_search_results() {
    for config in [IndexConfig::default(), clustered()] {
        let temp_dir = TempDir::new().unwrap();
        let embedder = CountingEmbedder::new();
        let id = doc("handbook");

        let built = DocumentIndexStore::new(temp_dir.path(), config)
            .get_or_build(&id, &handbook_chunks(), &embedder)
            .unwrap();
        assert_eq!(built.index().kind(), config.kind);

        let fresh = DocumentIndexStore::new(temp_dir.path(), config);
        assert!(fresh.load(&id));
        let loaded = fresh.get(&id).unwrap();

        let query = embedder
            .generate_embeddings(&["When are expense reports due?"])
            .unwrap()
            .remove(0);
        let before = built.index().search(&query, 5).unwrap();
        let after = loaded.index().search(&query, 5).unwrap();

        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.position, b.position);
            assert!((a.inner_product - b.inner_product).abs() < 1e-6);
        }
    }
}

#[test]
fn test_vectors_and_texts_stay_aligned_through_save_and_load() {
    let temp_dir = TempDir::new().unwrap();
    let embedder = CountingEmbedder::new();
    let store = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    let id = doc("handbook");

    store.get_or_build(&id, &handbook_chunks(), &embedder).unwrap();
    store.save(&id).unwrap();

    let fresh = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    assert!(fresh.load(&id));
    let loaded = fresh.get(&id).unwrap();
    let index = loaded.index();

    assert_eq!(index.len(), handbook_chunks().len());
    assert_eq!(
        index.raw_vectors().len(),
        index.len() * index.dimension().get()
    );
    // Each stored vector is still the embedding of the text at its position
    for (position, text) in handbook_chunks().iter().enumerate() {
        let expected = embedder
            .generate_embeddings(&[text.as_str()])
            .unwrap()
            .remove(0);
        let stored = index.vector(position).unwrap();
        assert!(inner_product(&expected, stored) > 0.999);
        assert_eq!(index.text(position), Some(text.as_str()));
    }
}

#[test]
fn test_second_store_reuses_artifacts_without_embedding() {
    let temp_dir = TempDir::new().unwrap();
    let id = doc("policy");

    let first = CountingEmbedder::new();
    DocumentIndexStore::new(temp_dir.path(), IndexConfig::default())
        .get_or_build(&id, &policy_chunks(), &first)
        .unwrap();
    assert_eq!(first.embedded_texts(), 3);

    let second = CountingEmbedder::new();
    let index = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default())
        .get_or_build(&id, &policy_chunks(), &second)
        .unwrap();
    assert_eq!(second.calls(), 0);
    assert_eq!(index.chunks(), policy_chunks().as_slice());
}

#[test]
fn test_partial_pair_is_a_load_failure_and_rebuilds() {
    let temp_dir = TempDir::new().unwrap();
    let id = doc("policy");
    let store = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    store
        .get_or_build(&id, &policy_chunks(), &CountingEmbedder::new())
        .unwrap();
    std::fs::remove_file(store.paths(&id).chunks).unwrap();

    let fresh = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    assert!(!fresh.load(&id));

    let embedder = CountingEmbedder::new();
    let rebuilt = fresh.get_or_build(&id, &policy_chunks(), &embedder).unwrap();
    assert_eq!(embedder.embedded_texts(), 3);
    assert_eq!(rebuilt.len(), 3);
    assert!(fresh.paths(&id).chunks_exist());
}

#[test]
fn test_corrupt_index_is_treated_as_cache_miss() {
    let temp_dir = TempDir::new().unwrap();
    let id = doc("policy");
    let store = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    store
        .get_or_build(&id, &policy_chunks(), &CountingEmbedder::new())
        .unwrap();

    let index_path = store.paths(&id).index;
    let bytes = std::fs::read(&index_path).unwrap();
    std::fs::write(&index_path, &bytes[..bytes.len() / 2]).unwrap();

    let fresh = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    assert!(matches!(
        fresh.read_artifacts(&id),
        Err(RetrievalError::PersistenceCorrupt { .. })
    ));
    assert!(!fresh.load(&id));

    let embedder = CountingEmbedder::new();
    fresh.get_or_build(&id, &policy_chunks(), &embedder).unwrap();
    assert_eq!(embedder.embedded_texts(), 3);

    let again = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    assert!(again.load(&id));
}

#[test]
fn test_chunk_count_disagreement_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    let id = doc("policy");
    let store = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default())
        .with_chunk_format(ChunkFormat::Delimited);
    store
        .get_or_build(&id, &policy_chunks(), &CountingEmbedder::new())
        .unwrap();

    // Drop the last chunk from the delimited text file
    let chunks_path = store.paths(&id).chunks;
    let content = std::fs::read_to_string(&chunks_path).unwrap();
    let truncated: String = content
        .split_inclusive("\n<<<END>>>\n")
        .take(2)
        .collect();
    std::fs::write(&chunks_path, truncated).unwrap();

    let fresh = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    assert!(matches!(
        fresh.read_artifacts(&id),
        Err(RetrievalError::PersistenceCorrupt { .. })
    ));
}

#[test]
fn test_embedding_failure_propagates_and_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let store = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    let id = doc("policy");

    let err = store
        .get_or_build(&id, &policy_chunks(), &FailingEmbedder)
        .unwrap_err();
    assert!(matches!(err, RetrievalError::EmbeddingFailure(_)));
    assert!(!store.contains(&id));
    assert!(!store.paths(&id).index_exists());
}

#[test]
fn test_artifact_pair_naming() {
    let temp_dir = TempDir::new().unwrap();
    let store = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    store
        .get_or_build(&doc("policy"), &policy_chunks(), &CountingEmbedder::new())
        .unwrap();
    assert_eq!(
        file_names(temp_dir.path()),
        vec!["policy.chunks".to_string(), "policy.index".to_string()]
    );
}

#[test]
fn test_empty_document_indexes_and_reloads() {
    let temp_dir = TempDir::new().unwrap();
    let store = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    let id = doc("blank");

    let index = store
        .get_or_build(&id, &[], &CountingEmbedder::new())
        .unwrap();
    assert!(index.is_empty());

    let fresh = DocumentIndexStore::new(temp_dir.path(), IndexConfig::default());
    assert!(fresh.load(&id));
    assert!(fresh.get(&id).unwrap().is_empty());
}
