//! On-disk artifact pair for one document.
//!
//! `{id}.index` holds the encoded vector index and `{id}.chunks` the chunk
//! texts in position order. Both are replaced by write-to-temp then rename,
//! and both carry the same generation stamp so a reader can tell when it is
//! looking at halves of two different saves.
//!
//! Chunk texts use one of two encodings, detected on read:
//! - records: magic, version, generation, count, then `u32` length + UTF-8
//!   bytes per chunk. Lossless.
//! - delimited: a `<<<GEN {hex}>>>` line, then each chunk with newlines
//!   flattened to spaces and followed by a `<<<END>>>` line. Files without
//!   the generation line are still read, unstamped.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{RetrievalError, RetrievalResult};
use crate::types::DocumentId;

const RECORDS_MAGIC: &[u8; 4] = b"DSCT";
const RECORDS_VERSION: u32 = 1;
const RECORDS_HEADER_SIZE: usize = 20;

/// Separator between chunks in the delimited encoding.
pub const CHUNK_DELIMITER: &str = "\n<<<END>>>\n";

const GENERATION_PREFIX: &str = "<<<GEN ";
const GENERATION_SUFFIX: &str = ">>>\n";

/// Encoding for the chunk-text artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFormat {
    #[default]
    Records,
    Delimited,
}

/// Paths of the artifact pair for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub index: PathBuf,
    pub chunks: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: &Path, doc_id: &DocumentId) -> Self {
        Self {
            index: root.join(format!("{doc_id}.index")),
            chunks: root.join(format!("{doc_id}.chunks")),
        }
    }

    pub fn index_exists(&self) -> bool {
        self.index.is_file()
    }

    pub fn chunks_exist(&self) -> bool {
        self.chunks.is_file()
    }
}

/// Chunk texts read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub texts: Vec<String>,
    /// Absent for delimited files written without a generation line
    pub generation: Option<u64>,
}

pub fn encode_chunks(texts: &[String], format: ChunkFormat, generation: u64) -> Vec<u8> {
    match format {
        ChunkFormat::Records => {
            let body: usize = texts.iter().map(|t| 4 + t.len()).sum();
            let mut out = Vec::with_capacity(RECORDS_HEADER_SIZE + body);
            out.extend_from_slice(RECORDS_MAGIC);
            out.extend_from_slice(&RECORDS_VERSION.to_le_bytes());
            out.extend_from_slice(&generation.to_le_bytes());
            out.extend_from_slice(&(texts.len() as u32).to_le_bytes());
            for text in texts {
                out.extend_from_slice(&(text.len() as u32).to_le_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            out
        }
        ChunkFormat::Delimited => {
            let mut out = format!("{GENERATION_PREFIX}{generation:016x}{GENERATION_SUFFIX}");
            for text in texts {
                out.push_str(&text.replace(['\r', '\n'], " "));
                out.push_str(CHUNK_DELIMITER);
            }
            out.into_bytes()
        }
    }
}

/// Decode a chunk artifact in either encoding.
///
/// Errors carry a human-readable reason; the caller attaches the path.
pub fn decode_chunks(bytes: &[u8]) -> Result<ChunkFile, String> {
    if bytes.starts_with(RECORDS_MAGIC) {
        decode_records(bytes)
    } else {
        decode_delimited(bytes)
    }
}

fn decode_records(bytes: &[u8]) -> Result<ChunkFile, String> {
    if bytes.len() < RECORDS_HEADER_SIZE {
        return Err("chunk file too small to contain header".to_string());
    }

    let read_u32 = |at: usize| -> Result<u32, String> {
        bytes
            .get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| format!("truncated chunk file at offset {at}"))
    };

    let version = read_u32(4)?;
    if version != RECORDS_VERSION {
        return Err(format!(
            "unsupported chunk file version {version}, expected {RECORDS_VERSION}"
        ));
    }

    let mut generation = [0u8; 8];
    generation.copy_from_slice(&bytes[8..16]);
    let generation = u64::from_le_bytes(generation);
    let count = read_u32(16)? as usize;

    let mut texts = Vec::with_capacity(count.min(bytes.len() / 4));
    let mut offset = RECORDS_HEADER_SIZE;
    for i in 0..count {
        let len = read_u32(offset)? as usize;
        offset += 4;
        let raw = bytes
            .get(offset..offset.saturating_add(len))
            .ok_or_else(|| format!("chunk {i} runs past end of file"))?;
        let text = std::str::from_utf8(raw).map_err(|e| format!("chunk {i} is not UTF-8: {e}"))?;
        texts.push(text.to_string());
        offset += len;
    }

    if offset != bytes.len() {
        return Err(format!(
            "{} trailing bytes after {count} chunks",
            bytes.len() - offset
        ));
    }

    Ok(ChunkFile {
        texts,
        generation: Some(generation),
    })
}

fn decode_delimited(bytes: &[u8]) -> Result<ChunkFile, String> {
    let content = std::str::from_utf8(bytes).map_err(|e| format!("chunk file is not UTF-8: {e}"))?;

    let (generation, content) = match content.strip_prefix(GENERATION_PREFIX) {
        Some(rest) => {
            let (stamp, body) = rest
                .split_once(GENERATION_SUFFIX)
                .ok_or_else(|| "unterminated generation line".to_string())?;
            let generation = u64::from_str_radix(stamp, 16)
                .map_err(|e| format!("invalid generation stamp '{stamp}': {e}"))?;
            (Some(generation), body)
        }
        None => (None, content),
    };

    let texts = content
        .split(CHUNK_DELIMITER)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    Ok(ChunkFile { texts, generation })
}

/// Replace `path` with `bytes` so readers see either the old or the new file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> RetrievalResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let io_err = |source: io::Error| RetrievalError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.write_all(bytes).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Delete `path`, treating a missing file as success. Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> RetrievalResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(RetrievalError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
