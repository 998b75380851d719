//! Sentence-respecting document chunking.
//!
//! Splits raw text into overlapping segments suitable for embedding.
//!
//! # Algorithm
//! 1. Split into sentences at `.`, `?` or `!` followed by whitespace
//! 2. Greedily accumulate sentences until the next one would exceed `chunk_size`
//! 3. Seed each new chunk with trailing sentences of the previous one until at
//!    least `overlap` characters are carried over
//! 4. Sentences longer than `chunk_size` are flushed on their own and hard-split
//!    into `chunk_size` slices, without overlap
//!
//! All sizes are measured in characters, not bytes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::types::Chunk;

/// Sentence boundary: terminal punctuation followed by whitespace.
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.?!]\s+").expect("sentence boundary pattern is valid"));

/// Configuration for chunk sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters accumulated before a chunk is closed
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Minimum characters carried over from the previous chunk
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_chunk_size() -> usize {
    1600
}

fn default_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

/// Trait for document chunking strategies.
pub trait Chunker: Send + Sync {
    /// Split document text into chunk strings, in document order.
    fn chunk(&self, text: &str) -> Vec<String>;

    /// Split document text into chunks with ordinals assigned.
    fn chunk_document(&self, text: &str) -> Vec<Chunk> {
        Chunk::from_texts(self.chunk(text))
    }
}

/// Greedy sentence accumulator with sentence-granular overlap.
#[derive(Debug, Clone, Default)]
pub struct SentenceChunker {
    config: ChunkingConfig,
}

impl SentenceChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.config.chunk_size, self.config.overlap)
    }
}

/// Split text into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        // Punctuation is a single ASCII byte, so +1 stays on a char boundary
        let end = boundary.start() + 1;
        push_trimmed(&mut sentences, &text[start..end]);
        start = boundary.end();
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed<'a>(sentences: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        sentences.push(piece);
    }
}

/// Split text into overlapping chunks of roughly `chunk_size` characters.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Vec<(&str, usize)> = Vec::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();

        if sentence_len > chunk_size {
            if !current.is_empty() {
                chunks.push(join(&current));
                current.clear();
                current_len = 0;
            }
            chunks.extend(hard_split(sentence, chunk_size));
            continue;
        }

        if current_len + sentence_len > chunk_size {
            if !current.is_empty() {
                chunks.push(join(&current));
            }
            current = overlap_suffix(&current, overlap);
            current_len = current.iter().map(|(_, len)| len).sum();
        }

        current.push((sentence, sentence_len));
        current_len += sentence_len;
    }

    if !current.is_empty() {
        chunks.push(join(&current));
    }

    chunks
}

/// Trailing sentences whose cumulative length first reaches `overlap`.
fn overlap_suffix<'a>(sentences: &[(&'a str, usize)], overlap: usize) -> Vec<(&'a str, usize)> {
    if overlap == 0 {
        return Vec::new();
    }

    let mut total = 0;
    let mut start = sentences.len();
    for (i, (_, len)) in sentences.iter().enumerate().rev() {
        total += len;
        start = i;
        if total >= overlap {
            break;
        }
    }

    sentences[start..].to_vec()
}

fn join(sentences: &[(&str, usize)]) -> String {
    sentences
        .iter()
        .map(|(sentence, _)| *sentence)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fixed-size character slices of an oversized sentence.
fn hard_split(sentence: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|slice| slice.iter().collect::<String>())
        .filter(|slice| !slice.trim().is_empty())
        .collect()
}
