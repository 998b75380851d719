//! Single-flight builds under concurrent first requests

use crate::common::{CountingEmbedder, file_names, handbook_chunks, policy_chunks};
use docsift::{DocumentId, DocumentIndexStore, IndexConfig};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_concurrent_first_requests_build_once() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(DocumentIndexStore::new(
        temp_dir.path(),
        IndexConfig::default(),
    ));
    // Slow embedding keeps the first build in flight while the others arrive
    let embedder = Arc::new(CountingEmbedder::with_delay(Duration::from_millis(100)));
    let id = DocumentId::new("policy").unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let embedder = Arc::clone(&embedder);
            let barrier = Arc::clone(&barrier);
            let id = id.clone();
            thread::spawn(move || {
                barrier.wait();
                store
                    .get_or_build(&id, &policy_chunks(), embedder.as_ref())
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // One embedding pass over the three chunks
    assert_eq!(embedder.calls(), 1);
    assert_eq!(embedder.embedded_texts(), 3);

    // Everyone received the winner's index
    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }

    // One artifact pair and no stray temp files
    assert_eq!(
        file_names(temp_dir.path()),
        vec!["policy.chunks".to_string(), "policy.index".to_string()]
    );
}

#[test]
fn test_different_documents_build_independently() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(DocumentIndexStore::new(
        temp_dir.path(),
        IndexConfig::default(),
    ));
    let embedder = Arc::new(CountingEmbedder::with_delay(Duration::from_millis(20)));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = Arc::clone(&store);
            let embedder = Arc::clone(&embedder);
            thread::spawn(move || {
                let id = DocumentId::from_u64(i);
                store
                    .get_or_build(&id, &handbook_chunks(), embedder.as_ref())
                    .unwrap()
                    .len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), handbook_chunks().len());
    }
    assert_eq!(embedder.calls(), 4);
    assert_eq!(store.cached_documents().len(), 4);
    assert_eq!(file_names(temp_dir.path()).len(), 8);
}
