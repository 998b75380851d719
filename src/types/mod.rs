use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{RetrievalError, RetrievalResult};

/// Maximum length of a document identity. Identities name files on disk.
const MAX_DOCUMENT_ID_LEN: usize = 128;

/// Stable key naming one retrieval corpus.
///
/// Owns exactly one pair of on-disk artifacts, so the accepted alphabet is
/// restricted to characters that are safe in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> RetrievalResult<Self> {
        let id = id.into();
        let invalid = |reason| RetrievalError::InvalidDocumentId {
            id: id.clone(),
            reason,
        };

        if id.is_empty() {
            return Err(invalid("identity cannot be empty"));
        }
        if id.len() > MAX_DOCUMENT_ID_LEN {
            return Err(invalid("identity is longer than 128 characters"));
        }
        if id.starts_with('.') {
            return Err(invalid("identity cannot start with '.'"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(invalid("only ASCII letters, digits, '_', '-' and '.' are allowed"));
        }

        Ok(Self(id))
    }

    /// Identity for integer keyed documents (e.g. database row ids)
    pub fn from_u64(id: u64) -> Self {
        Self(id.to_string())
    }

    /// Derive the identity from document content (SHA256, hex encoded)
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A contiguous slice of a document's text.
///
/// Produced once per ingestion and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Position within the document's chunk sequence
    pub ordinal: u32,
}

impl Chunk {
    pub fn new(text: impl Into<String>, ordinal: u32) -> Self {
        Self {
            text: text.into(),
            ordinal,
        }
    }

    /// Number with ordinals assigned in sequence order
    pub fn from_texts<I, S>(texts: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Self::new(text, i as u32))
            .collect()
    }

    /// Length in characters (the unit every size budget is expressed in)
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// One ranked candidate produced per query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub text: String,
    /// Normalized similarity in (0, 1]
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Context assembled for downstream answer generation.
///
/// An empty context with a score of 0 means no answer is derivable from the
/// document; it is a valid outcome, not an error.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RetrievedContext {
    pub context: String,
    pub average_score: f32,
    /// Ordinals of the chunks joined into `context`, in ranked order
    pub sources: Vec<u32>,
}

impl RetrievedContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }

    pub fn into_parts(self) -> (String, f32) {
        (self.context, self.average_score)
    }
}
