//! Chunker properties over a realistic multi-sentence document

use docsift::chunking::split_sentences;
use docsift::{Chunker, ChunkingConfig, SentenceChunker, chunk_text};

fn numbered_document(count: usize) -> String {
    (1..=count)
        .map(|i| format!("Clause {i} applies to every policy holder."))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn test_chunking_is_deterministic() {
    let text = numbered_document(60);
    let first = chunk_text(&text, 300, 80);
    let second = chunk_text(&text, 300, 80);
    assert_eq!(first, second);
    assert!(first.len() > 1);
}

#[test]
fn test_no_sentence_dropped_or_reordered() {
    let text = numbered_document(60);
    let chunks = chunk_text(&text, 300, 80);

    let mut seen: Vec<&str> = Vec::new();
    for chunk in &chunks {
        for sentence in split_sentences(chunk) {
            if !seen.contains(&sentence) {
                seen.push(sentence);
            }
        }
    }
    assert_eq!(seen, split_sentences(&text));
}

#[test]
fn test_consecutive_chunks_overlap_by_at_least_overlap_chars() {
    let overlap = 80;
    let text = numbered_document(60);
    let chunks = chunk_text(&text, 300, overlap);

    for pair in chunks.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        let sentences = split_sentences(current);

        let carried = (1..=sentences.len())
            .rev()
            .map(|n| sentences[..n].join(" "))
            .find(|prefix| previous.ends_with(prefix.as_str()))
            .unwrap_or_default();
        assert!(
            carried.chars().count() >= overlap,
            "chunk {current:?} carries only {carried:?} from {previous:?}"
        );
    }
}

#[test]
fn test_chunker_trait_uses_its_config() {
    let config = ChunkingConfig {
        chunk_size: 300,
        overlap: 80,
    };
    let chunker = SentenceChunker::new(config);
    let text = numbered_document(20);

    let chunks = chunker.chunk_document(&text);
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    assert_eq!(texts, chunk_text(&text, 300, 80));
    assert_eq!(chunks.last().unwrap().ordinal as usize, chunks.len() - 1);
}
