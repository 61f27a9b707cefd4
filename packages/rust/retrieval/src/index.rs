//! Read-only similarity search over the persisted chunk index.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use newsagent_shared::{DocumentChunk, NewsAgentError, Result, ScoredChunk};
use newsagent_storage::Storage;

use crate::embedding::{Embedder, cosine_similarity};

/// Anything that can rank stored chunks against a query.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// At most `k` chunks, ordered by non-increasing similarity.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>>;

    /// Number of chunks in the snapshot.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory snapshot of the chunk table plus the embedder used for queries.
///
/// The snapshot is taken at open time, so results are deterministic for the
/// lifetime of the value.
pub struct EmbeddingIndex {
    chunks: Vec<DocumentChunk>,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingIndex {
    /// Open the persisted index at `path` and load its chunks.
    ///
    /// Any failure to open or read the database is reported as
    /// [`NewsAgentError::IndexUnavailable`].
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let storage = Storage::open_readonly(path).await?;
        let chunks = storage
            .list_chunks()
            .await
            .map_err(|e| NewsAgentError::IndexUnavailable(e.to_string()))?;
        info!(chunks = chunks.len(), "loaded embedding index");
        Ok(Self::from_chunks(chunks, embedder))
    }

    pub fn from_chunks(chunks: Vec<DocumentChunk>, embedder: Arc<dyn Embedder>) -> Self {
        Self { chunks, embedder }
    }

    /// Rank the snapshot against an already-embedded query.
    ///
    /// Ties keep ingestion order.
    pub fn rank(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let mut scored = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            if chunk.embedding.len() != query_vec.len() {
                return Err(NewsAgentError::Retrieval(format!(
                    "embedding dimension mismatch: chunk {} has {} dims, query has {}",
                    chunk.id,
                    chunk.embedding.len(),
                    query_vec.len()
                )));
            }
            scored.push(ScoredChunk {
                score: cosine_similarity(&chunk.embedding, query_vec),
                chunk: chunk.clone(),
            });
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

#[async_trait]
impl ChunkIndex for EmbeddingIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        // Nothing to rank: skip the paid embedding call.
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(text).await?;
        let ranked = self.rank(&query_vec, k)?;
        debug!(k, returned = ranked.len(), "index query");
        Ok(ranked)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}
