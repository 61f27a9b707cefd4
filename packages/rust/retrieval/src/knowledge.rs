//! Knowledge-base retrieval tool over the local embedding index.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use newsagent_shared::{
    NewsAgentError, RetrievalConfig, RetrievalResult, RetrievalStatus, ScoredChunk, SearchQuery,
};

use crate::embedding::Embedder;
use crate::index::{ChunkIndex, EmbeddingIndex};
use crate::rate_limit::{RateLimiter, ServiceId};

/// Returned when the index has no matching chunks.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found in knowledge base.";

/// Marker appended to truncated snippets.
const ELLIPSIS: &str = "...";

/// Query shaping for the knowledge base.
#[derive(Debug, Clone, Copy)]
pub struct KnowledgeOptions {
    pub top_k: usize,
    pub snippet_chars: usize,
}

impl Default for KnowledgeOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            snippet_chars: 400,
        }
    }
}

impl From<&RetrievalConfig> for KnowledgeOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            snippet_chars: config.snippet_chars,
        }
    }
}

/// Searches the local index under the embedding rate limit.
///
/// If the index could not be opened, every call reports that failure as text.
pub struct KnowledgeRetriever {
    index: std::result::Result<Arc<dyn ChunkIndex>, String>,
    limiter: Arc<RateLimiter>,
    options: KnowledgeOptions,
}

impl KnowledgeRetriever {
    pub fn new(
        index: Arc<dyn ChunkIndex>,
        limiter: Arc<RateLimiter>,
        options: KnowledgeOptions,
    ) -> Self {
        Self {
            index: Ok(index),
            limiter,
            options,
        }
    }

    /// A retriever whose index failed to open.
    pub fn unavailable(
        error: &NewsAgentError,
        limiter: Arc<RateLimiter>,
        options: KnowledgeOptions,
    ) -> Self {
        Self {
            index: Err(error.to_string()),
            limiter,
            options,
        }
    }

    /// Open the persisted index, degrading to [`Self::unavailable`] on failure.
    pub async fn open(
        path: &Path,
        embedder: Arc<dyn Embedder>,
        limiter: Arc<RateLimiter>,
        options: KnowledgeOptions,
    ) -> Self {
        match EmbeddingIndex::open(path, embedder).await {
            Ok(index) => Self::new(Arc::new(index), limiter, options),
            Err(e) => {
                warn!(error = %e, "knowledge base unavailable for this run");
                Self::unavailable(&e, limiter, options)
            }
        }
    }

    /// Whether the underlying index opened successfully.
    pub fn is_available(&self) -> bool {
        self.index.is_ok()
    }

    /// Structured search; never fails, errors land in the status.
    #[instrument(skip_all, fields(query = %truncate_chars(query, 50)))]
    pub async fn search(&self, query: &str) -> RetrievalResult {
        let index = match &self.index {
            Ok(index) => index,
            Err(message) => return RetrievalResult::error(message.clone()),
        };

        self.limiter.wait_if_needed(ServiceId::Embedding).await;
        let issued = SearchQuery::now(query);
        debug!(issued_at = %issued.issued_at, "querying knowledge base");

        match index.query(&issued.text, self.options.top_k).await {
            Ok(chunks) if chunks.is_empty() => {
                info!("no relevant information found in knowledge base");
                RetrievalResult::from_chunks(chunks)
            }
            Ok(chunks) => {
                info!(
                    chunks = chunks.len(),
                    sources = %distinct_sources(&chunks).join(", "),
                    "knowledge base hit"
                );
                RetrievalResult::from_chunks(chunks)
            }
            Err(e) => {
                warn!(error = %e, "knowledge base query failed");
                RetrievalResult::error(e.to_string())
            }
        }
    }

    /// Tool-boundary search: always returns text.
    pub async fn retrieve(&self, query: &str) -> String {
        let result = self.search(query).await;
        self.render(&result)
    }

    /// Render a structured result the way the tool reports it.
    pub fn render(&self, result: &RetrievalResult) -> String {
        match &result.status {
            RetrievalStatus::Found => format_chunks(&result.chunks, self.options.snippet_chars),
            RetrievalStatus::Empty => NO_RELEVANT_INFORMATION.to_string(),
            RetrievalStatus::Error(message) => format!("Error accessing knowledge base: {message}"),
        }
    }
}

/// `[source] snippet` blocks separated by blank lines.
pub fn format_chunks(chunks: &[ScoredChunk], snippet_chars: usize) -> String {
    chunks
        .iter()
        .map(|c| {
            format!(
                "[{}] {}",
                c.chunk.source_name(),
                truncate_chars(&c.chunk.text, snippet_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cut `text` to `max` characters, appending an ellipsis when shortened.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}{ELLIPSIS}", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Source names in first-seen order, without repeats.
fn distinct_sources(chunks: &[ScoredChunk]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for c in chunks {
        let name = c.chunk.source_name();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}
