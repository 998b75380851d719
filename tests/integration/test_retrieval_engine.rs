//! End-to-end context retrieval

use crate::common::{CountingEmbedder, SignFlippedEmbedder, handbook_chunks, policy_chunks};
use docsift::vector::HashedNgramEmbedder;
use docsift::{
    DocumentId, DocumentIndexStore, IndexConfig, IndexKind, RetrievalConfig, RetrievalEngine,
    RetrievalError,
};
use std::sync::Arc;
use tempfile::TempDir;

fn engine(temp_dir: &TempDir, index: IndexConfig, config: RetrievalConfig) -> RetrievalEngine {
    let store = Arc::new(DocumentIndexStore::new(temp_dir.path(), index));
    RetrievalEngine::new(store, Arc::new(HashedNgramEmbedder::default()), config)
}

#[test]
fn test_flood_exclusion_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir, IndexConfig::default(), RetrievalConfig::default());
    let id = DocumentId::new("policy").unwrap();

    let context = engine
        .get_relevant_context_for_chunks(&id, &policy_chunks(), "What is excluded?")
        .unwrap();
    assert!(context.context.starts_with("It excludes flood damage."));

    let results = engine.search(&id, "What is excluded?").unwrap();
    assert_eq!(results[0].text, "It excludes flood damage.");

    // Still included when the threshold sits exactly at its score
    let exact = RetrievalConfig {
        min_score: results[0].score,
        ..RetrievalConfig::default()
    };
    let context = engine
        .get_relevant_context_with(&id, "What is excluded?", &exact)
        .unwrap();
    assert!(context.context.contains("It excludes flood damage."));
    assert!((context.average_score - results[0].score).abs() < 1e-6);
}

#[test]
fn test_context_never_exceeds_max_length() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir, IndexConfig::default(), RetrievalConfig::default());
    let id = DocumentId::new("handbook").unwrap();
    engine
        .store()
        .get_or_build(&id, &handbook_chunks(), engine.embedder().as_ref())
        .unwrap();

    for max_length in [0, 10, 39, 40, 80, 120, 500, 2000] {
        let config = RetrievalConfig {
            top_k: 10,
            max_length,
            min_score: 0.0,
            ..RetrievalConfig::default()
        };
        let context = engine
            .get_relevant_context_with(&id, "vacation and leave policy", &config)
            .unwrap();
        assert!(
            context.context.chars().count() <= max_length,
            "budget {max_length} exceeded: {}",
            context.context.chars().count()
        );
        if context.is_empty() {
            assert_eq!(context.average_score, 0.0);
        }
    }
}

#[test]
fn test_all_below_threshold_returns_empty_and_zero() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(
        &temp_dir,
        IndexConfig::default(),
        RetrievalConfig {
            min_score: 0.999,
            ..RetrievalConfig::default()
        },
    );
    let id = DocumentId::new("policy").unwrap();

    let (context, score) = engine
        .get_relevant_context_for_chunks(&id, &policy_chunks(), "quarterly revenue forecast")
        .unwrap()
        .into_parts();
    assert_eq!(context, "");
    assert_eq!(score, 0.0);
}

#[test]
fn test_results_are_bounded_sorted_and_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(
        &temp_dir,
        IndexConfig::default(),
        RetrievalConfig {
            top_k: 3,
            min_score: 0.0,
            ..RetrievalConfig::default()
        },
    );
    let id = DocumentId::new("handbook").unwrap();
    engine
        .get_relevant_context_for_chunks(&id, &handbook_chunks(), "insurance")
        .unwrap();

    let results = engine.search(&id, "When does insurance enrollment open?").unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.score > 0.0 && r.score <= 1.0));
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(results[0].text, "Health insurance enrollment opens in November.");
}

#[test]
fn test_clustered_index_answers_like_flat_when_probing_all_clusters() {
    let flat_dir = TempDir::new().unwrap();
    let clustered_dir = TempDir::new().unwrap();
    let config = RetrievalConfig {
        min_score: 0.0,
        ..RetrievalConfig::default()
    };
    let flat = engine(&flat_dir, IndexConfig::default(), config.clone());
    let clustered = engine(
        &clustered_dir,
        IndexConfig {
            kind: IndexKind::Clustered,
            clusters: 4,
            probes: 4,
            seed: 42,
        },
        config,
    );
    let id = DocumentId::new("handbook").unwrap();

    let question = "How long is parental leave?";
    let a = flat
        .get_relevant_context_for_chunks(&id, &handbook_chunks(), question)
        .unwrap();
    let b = clustered
        .get_relevant_context_for_chunks(&id, &handbook_chunks(), question)
        .unwrap();
    assert_eq!(a.context, b.context);
    assert_eq!(a.sources, b.sources);
}

#[test]
fn test_query_dimension_mismatch_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(DocumentIndexStore::new(
        temp_dir.path(),
        IndexConfig::default(),
    ));
    let id = DocumentId::new("policy").unwrap();

    // Built with 128-dimensional vectors, queried with 384
    store
        .get_or_build(&id, &policy_chunks(), &CountingEmbedder::new())
        .unwrap();
    let engine = RetrievalEngine::new(
        store,
        Arc::new(HashedNgramEmbedder::default()),
        RetrievalConfig::default(),
    );

    let err = engine.get_relevant_context(&id, "What is excluded?").unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::DimensionMismatch {
            expected: 128,
            actual: 384
        }
    ));
}

#[test]
fn test_index_built_by_another_model_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let id = DocumentId::new("policy").unwrap();

    // Indexed with one 384-dimensional model
    DocumentIndexStore::new(temp_dir.path(), IndexConfig::default())
        .get_or_build(&id, &policy_chunks(), &HashedNgramEmbedder::default())
        .unwrap();

    // Queried later, from a fresh store, with another
    let other = RetrievalEngine::new(
        Arc::new(DocumentIndexStore::new(
            temp_dir.path(),
            IndexConfig::default(),
        )),
        Arc::new(SignFlippedEmbedder::new()),
        RetrievalConfig::default(),
    );
    let err = other.get_relevant_context(&id, "What is excluded?").unwrap_err();
    assert!(matches!(err, RetrievalError::ModelMismatch { .. }));
    assert_eq!(err.status_code(), "MODEL_MISMATCH");

    // The building model still reads it
    let same = engine(&temp_dir, IndexConfig::default(), RetrievalConfig::default());
    let context = same.get_relevant_context(&id, "What is excluded?").unwrap();
    assert!(context.context.starts_with("It excludes flood damage."));
}

#[tokio::test]
async fn test_async_retrieval_from_many_tasks() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir, IndexConfig::default(), RetrievalConfig::default());
    let id = DocumentId::new("policy").unwrap();

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move {
                engine
                    .get_relevant_context_for_chunks_async(
                        id,
                        policy_chunks(),
                        "What is excluded?".to_string(),
                    )
                    .await
            })
        })
        .collect();

    for task in tasks {
        let context = task.await.unwrap().unwrap();
        assert!(context.context.starts_with("It excludes flood damage."));
    }
    assert_eq!(engine.store().cached_documents(), vec![id]);
}
