//! Binary persistence for vector indexes.
//!
//! Index files hold vectors and clustering state only; chunk texts live in a
//! sibling artifact and are re-attached on load. Files are read through a
//! memory map and fully validated before an index is reconstructed, so a
//! truncated or foreign file surfaces as an error rather than a bad index.
//!
//! # Storage Format
//!
//! All integers and floats are little-endian.
//! - Header (28 bytes): magic, version, kind (1 byte + 3 reserved),
//!   dimension, vector count, generation stamp (u64)
//! - Embedding model name: `u32` length + UTF-8 bytes
//! - Clustered only: cluster count, probe count, seed (u64), trained flag
//!   (1 byte + 3 reserved), centroids when trained, one cluster id per vector
//! - Vectors: contiguous f32 rows

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::MmapOptions;
use thiserror::Error;

use crate::vector::index::{ClusteredIndex, FlatIndex, VectorIndex};
use crate::vector::types::{ClusterId, VectorDimension, VectorError};

/// Current storage format version.
const STORAGE_VERSION: u32 = 2;

/// Size of the fixed storage header in bytes.
const HEADER_SIZE: usize = 28;

/// Magic bytes to identify index files.
const MAGIC_BYTES: &[u8; 4] = b"DSVX";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

const KIND_FLAT: u8 = 0;
const KIND_CLUSTERED: u8 = 1;

/// Errors specific to index persistence.
#[derive(Error, Debug)]
pub enum VectorStorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Prefix of every index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u32,
    pub kind: u8,
    pub dimension: VectorDimension,
    pub count: usize,
    pub generation: u64,
    /// Embedding model the vectors were produced with
    pub model: String,
}

/// An index read back from disk along with the stamp and model it was
/// written with.
#[derive(Debug)]
pub struct DecodedIndex {
    pub index: VectorIndex,
    pub generation: u64,
    pub model: String,
}

/// Serialize `index` with the given generation stamp and embedding model.
pub fn encode_index(index: &VectorIndex, generation: u64, model: &str) -> Vec<u8> {
    let dim = index.dimension().get();
    let mut out = Vec::with_capacity(
        HEADER_SIZE + 4 + model.len() + index.raw_vectors().len() * BYTES_PER_F32,
    );

    out.extend_from_slice(MAGIC_BYTES);
    out.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
    let kind = match index {
        VectorIndex::Flat(_) => KIND_FLAT,
        VectorIndex::Clustered(_) => KIND_CLUSTERED,
    };
    out.extend_from_slice(&[kind, 0, 0, 0]);
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    out.extend_from_slice(&(index.len() as u32).to_le_bytes());
    out.extend_from_slice(&generation.to_le_bytes());
    out.extend_from_slice(&(model.len() as u32).to_le_bytes());
    out.extend_from_slice(model.as_bytes());

    if let VectorIndex::Clustered(clustered) = index {
        out.extend_from_slice(&(clustered.clusters() as u32).to_le_bytes());
        out.extend_from_slice(&(clustered.probes() as u32).to_le_bytes());
        out.extend_from_slice(&clustered.seed().to_le_bytes());
        out.extend_from_slice(&[u8::from(clustered.is_trained()), 0, 0, 0]);
        for centroid in clustered.centroids() {
            write_f32s(&mut out, centroid);
        }
        for cluster in clustered.assignments() {
            out.extend_from_slice(&cluster.to_bytes());
        }
    }

    write_f32s(&mut out, index.raw_vectors());
    out
}

fn write_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Parse and validate the header, including the model name.
pub fn read_header(bytes: &[u8]) -> Result<IndexHeader, VectorStorageError> {
    parse_header(&mut ByteReader::new(bytes))
}

fn parse_header(reader: &mut ByteReader<'_>) -> Result<IndexHeader, VectorStorageError> {
    if reader.remaining() < HEADER_SIZE {
        return Err(VectorStorageError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }

    if reader.take(4)? != MAGIC_BYTES {
        return Err(VectorStorageError::InvalidFormat(
            "Invalid magic bytes".to_string(),
        ));
    }

    let version = reader.u32()?;
    if version != STORAGE_VERSION {
        return Err(VectorError::VersionMismatch {
            expected: STORAGE_VERSION,
            actual: version,
        }
        .into());
    }

    let kind = reader.take(4)?[0];
    let dimension = VectorDimension::new(reader.u32()? as usize)?;
    let count = reader.u32()? as usize;
    let generation = reader.u64()?;
    let model = reader.string()?;

    Ok(IndexHeader {
        version,
        kind,
        dimension,
        count,
        generation,
        model,
    })
}

/// Reconstruct an index from `bytes`, attaching `texts` by position.
///
/// Fails when the file is malformed or the text count differs from the
/// stored vector count.
pub fn decode_index(bytes: &[u8], texts: Vec<String>) -> Result<DecodedIndex, VectorStorageError> {
    let mut reader = ByteReader::new(bytes);
    let header = parse_header(&mut reader)?;
    let dim = header.dimension.get();

    if header.count != texts.len() {
        return Err(VectorError::AlignmentMismatch {
            vectors: header.count,
            texts: texts.len(),
        }
        .into());
    }

    let index = match header.kind {
        KIND_FLAT => {
            let data = reader.f32s(header.count, dim)?;
            VectorIndex::Flat(FlatIndex::from_parts(header.dimension, data, texts)?)
        }
        KIND_CLUSTERED => {
            let clusters = reader.u32()? as usize;
            let probes = reader.u32()? as usize;
            let seed = reader.u64()?;
            let trained = reader.take(4)?[0] != 0;

            let centroids = if trained {
                (0..clusters)
                    .map(|_| reader.f32s(1, dim))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                Vec::new()
            };

            let assignments = (0..header.count)
                .map(|_| {
                    let raw = reader.take(4)?;
                    ClusterId::from_bytes([raw[0], raw[1], raw[2], raw[3]]).ok_or_else(|| {
                        VectorStorageError::InvalidFormat("zero cluster id".to_string())
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let data = reader.f32s(header.count, dim)?;
            VectorIndex::Clustered(ClusteredIndex::from_parts(
                header.dimension,
                clusters,
                probes,
                seed,
                centroids,
                assignments,
                data,
                texts,
            )?)
        }
        other => {
            return Err(VectorStorageError::InvalidFormat(format!(
                "unknown index kind {other}"
            )));
        }
    };

    if !reader.is_exhausted() {
        return Err(VectorStorageError::InvalidFormat(format!(
            "{} trailing bytes after vector data",
            reader.remaining()
        )));
    }

    Ok(DecodedIndex {
        index,
        generation: header.generation,
        model: header.model,
    })
}

/// Memory-map an index file and decode it.
pub fn read_index_file(path: &Path, texts: Vec<String>) -> Result<DecodedIndex, VectorStorageError> {
    let file = File::open(path)?;
    if (file.metadata()?.len() as usize) < HEADER_SIZE {
        return Err(VectorStorageError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }

    // SAFETY: artifacts are replaced by rename, never modified in place
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    decode_index(&mmap, texts)
}

/// Bounds-checked little-endian cursor.
struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], VectorStorageError> {
        if len > self.remaining() {
            return Err(VectorStorageError::InvalidFormat(format!(
                "truncated file: needed {len} bytes at offset {}, {} left",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, VectorStorageError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> Result<u64, VectorStorageError> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    /// `u32` length followed by that many UTF-8 bytes.
    fn string(&mut self) -> Result<String, VectorStorageError> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| VectorStorageError::InvalidFormat(format!("model name is not UTF-8: {e}")))
    }

    /// `rows * dim` floats.
    fn f32s(&mut self, rows: usize, dim: usize) -> Result<Vec<f32>, VectorStorageError> {
        let len = rows
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(BYTES_PER_F32))
            .ok_or_else(|| VectorStorageError::InvalidFormat("vector block overflows".into()))?;
        let raw = self.take(len)?;
        Ok(raw
            .chunks_exact(BYTES_PER_F32)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}
