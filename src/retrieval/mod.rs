//! Query-time retrieval over per-document indexes.
//!
//! A query is embedded with the same generator that built the index, the
//! index is over-fetched at `2 * top_k`, raw inner products are mapped to
//! bounded scores, low scorers are dropped, and the survivors are packed
//! into a context string under a character budget.
//!
//! The engine is synchronous and CPU-bound. The `*_async` methods move the
//! whole call onto tokio's blocking pool so an async caller's executor
//! threads are never held by embedding or search.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::{RetrievalError, RetrievalResult};
use crate::store::{DocumentIndex, DocumentIndexStore};
use crate::types::{DocumentId, RetrievedContext, SearchResult};
use crate::vector::{EmbeddingGenerator, Score};

/// Retrieval tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results kept after filtering
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Character budget for the assembled context, separators included
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Candidates scoring below this are discarded.
    ///
    /// Scores never drop below 1/3 (opposite unit vectors), and unrelated
    /// text sits near 0.41, so thresholds under 1/3 filter nothing.
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Inserted between accepted chunks
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_top_k() -> usize {
    5
}
fn default_max_length() -> usize {
    2000
}
// Below the 1/3 floor: keeps every candidate unless raised
fn default_min_score() -> f32 {
    0.3
}
fn default_separator() -> String {
    "\n\n".to_string()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_length: default_max_length(),
            min_score: default_min_score(),
            separator: default_separator(),
        }
    }
}

/// Answers questions against documents held by a [`DocumentIndexStore`].
///
/// Cheap to clone; clones share the store and the embedder.
#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<DocumentIndexStore>,
    embedder: Arc<dyn EmbeddingGenerator>,
    config: RetrievalConfig,
}

impl fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("store", &self.store.root())
            .field("embedder", &self.embedder.model_name())
            .field("config", &self.config)
            .finish()
    }
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<DocumentIndexStore>,
        embedder: Arc<dyn EmbeddingGenerator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn store(&self) -> &Arc<DocumentIndexStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingGenerator> {
        &self.embedder
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked, filtered matches for `query` in an already indexed document.
    pub fn search(&self, doc_id: &DocumentId, query: &str) -> RetrievalResult<Vec<SearchResult>> {
        self.search_with(doc_id, query, &self.config)
    }

    /// [`Self::search`] with per-call settings.
    pub fn search_with(
        &self,
        doc_id: &DocumentId,
        query: &str,
        config: &RetrievalConfig,
    ) -> RetrievalResult<Vec<SearchResult>> {
        let document = self.store.open(doc_id)?;
        self.rank(&document, query, config)
    }

    /// Context for `query` from an already indexed document.
    ///
    /// An empty context with score 0 means nothing relevant was found.
    pub fn get_relevant_context(
        &self,
        doc_id: &DocumentId,
        query: &str,
    ) -> RetrievalResult<RetrievedContext> {
        self.get_relevant_context_with(doc_id, query, &self.config)
    }

    /// [`Self::get_relevant_context`] with per-call settings.
    pub fn get_relevant_context_with(
        &self,
        doc_id: &DocumentId,
        query: &str,
        config: &RetrievalConfig,
    ) -> RetrievalResult<RetrievedContext> {
        let results = self.search_with(doc_id, query, config)?;
        Ok(assemble_context(&results, config))
    }

    /// Context for `query`, indexing `chunks` first if `doc_id` has no
    /// cached or persisted index yet.
    pub fn get_relevant_context_for_chunks(
        &self,
        doc_id: &DocumentId,
        chunks: &[String],
        query: &str,
    ) -> RetrievalResult<RetrievedContext> {
        let document = self
            .store
            .get_or_build(doc_id, chunks, self.embedder.as_ref())?;
        let results = self.rank(&document, query, &self.config)?;
        Ok(assemble_context(&results, &self.config))
    }

    pub async fn search_async(
        &self,
        doc_id: DocumentId,
        query: String,
    ) -> RetrievalResult<Vec<SearchResult>> {
        let engine = self.clone();
        run_blocking(move || engine.search(&doc_id, &query)).await
    }

    pub async fn get_relevant_context_async(
        &self,
        doc_id: DocumentId,
        query: String,
    ) -> RetrievalResult<RetrievedContext> {
        let engine = self.clone();
        run_blocking(move || engine.get_relevant_context(&doc_id, &query)).await
    }

    pub async fn get_relevant_context_for_chunks_async(
        &self,
        doc_id: DocumentId,
        chunks: Vec<String>,
        query: String,
    ) -> RetrievalResult<RetrievedContext> {
        let engine = self.clone();
        run_blocking(move || engine.get_relevant_context_for_chunks(&doc_id, &chunks, &query)).await
    }

    fn rank(
        &self,
        document: &DocumentIndex,
        query: &str,
        config: &RetrievalConfig,
    ) -> RetrievalResult<Vec<SearchResult>> {
        let expected = document.index().dimension().get();
        let actual = self.embedder.dimension().get();
        if expected != actual {
            return Err(RetrievalError::DimensionMismatch { expected, actual });
        }
        let query_model = self.embedder.model_name();
        if document.model() != query_model {
            return Err(RetrievalError::ModelMismatch {
                doc_id: document.id().clone(),
                indexed_with: document.model().to_string(),
                query_model,
            });
        }

        let query_vector = self
            .embedder
            .generate_embeddings(&[query])?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RetrievalError::EmbeddingFailure("no embedding returned for query".to_string())
            })?;

        // Headroom for the score filter below
        let fetch = config.top_k.saturating_mul(2);
        let candidates = document.index().search(&query_vector, fetch)?;
        let fetched = candidates.len();

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let score = Score::from_inner_product(candidate.inner_product).get();
                if score < config.min_score {
                    return None;
                }
                let text = document.index().text(candidate.position)?;

                let mut metadata = Map::new();
                metadata.insert("ordinal".to_string(), Value::from(candidate.position as u64));
                metadata.insert(
                    "document".to_string(),
                    Value::from(document.id().as_str()),
                );
                Some(SearchResult {
                    text: text.to_string(),
                    score,
                    metadata: Some(metadata),
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(config.top_k);

        tracing::debug!(
            target: "retrieval",
            "{}: {} of {fetched} candidates scored at least {}",
            document.id(),
            results.len(),
            config.min_score
        );
        Ok(results)
    }
}

/// Join ranked results until the next one would exceed `max_length`.
///
/// Accumulation stops at the first result that does not fit; smaller
/// results further down the ranking are not tried.
pub fn assemble_context(results: &[SearchResult], config: &RetrievalConfig) -> RetrievedContext {
    let separator_len = config.separator.chars().count();
    let mut used = 0usize;
    let mut parts: Vec<&str> = Vec::new();
    let mut sources = Vec::new();
    let mut score_sum = 0.0f32;

    for result in results {
        let cost = result.text.chars().count() + if parts.is_empty() { 0 } else { separator_len };
        if used + cost > config.max_length {
            break;
        }
        used += cost;
        parts.push(&result.text);
        score_sum += result.score;
        sources.push(ordinal_of(result));
    }

    if parts.is_empty() {
        return RetrievedContext::empty();
    }

    RetrievedContext {
        context: parts.join(config.separator.as_str()),
        average_score: score_sum / parts.len() as f32,
        sources,
    }
}

fn ordinal_of(result: &SearchResult) -> u32 {
    result
        .metadata
        .as_ref()
        .and_then(|m| m.get("ordinal"))
        .and_then(Value::as_u64)
        .unwrap_or_default() as u32
}

async fn run_blocking<T, F>(work: F) -> RetrievalResult<T>
where
    F: FnOnce() -> RetrievalResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RetrievalError::TaskFailed(e.to_string()))?
}
