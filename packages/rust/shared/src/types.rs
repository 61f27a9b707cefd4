//! Core domain types shared by retrieval, pipeline, and CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Chunks and retrieval results
// ---------------------------------------------------------------------------

/// A passage of an ingested document together with its embedding.
///
/// Created once by ingestion and only ever read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// SHA-256 of `source_id` + `text`.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Source document identifier (usually its path).
    pub source_id: String,
    /// Embedding vector produced by the embedding service.
    pub embedding: Vec<f32>,
}

impl DocumentChunk {
    /// Short display name for the source: the last path component.
    pub fn source_name(&self) -> &str {
        self.source_id
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
    }
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Outcome of a single retrieval call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalStatus {
    Found,
    Empty,
    Error(String),
}

/// Ranked chunks for one query plus how the query went.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// Ordered by descending similarity.
    pub chunks: Vec<ScoredChunk>,
    pub status: RetrievalStatus,
}

impl RetrievalResult {
    /// Build a result from ranked chunks; an empty list becomes [`RetrievalStatus::Empty`].
    pub fn from_chunks(chunks: Vec<ScoredChunk>) -> Self {
        let status = if chunks.is_empty() {
            RetrievalStatus::Empty
        } else {
            RetrievalStatus::Found
        };
        Self { chunks, status }
    }

    /// A failed retrieval carrying the error description.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            chunks: Vec::new(),
            status: RetrievalStatus::Error(message.into()),
        }
    }

    /// Similarity of the best chunk, if any.
    pub fn top_score(&self) -> Option<f32> {
        self.chunks.first().map(|c| c.score)
    }
}

/// A query handed to an external service, stamped when it was issued.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub issued_at: DateTime<Utc>,
}

impl SearchQuery {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            issued_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline artifacts
// ---------------------------------------------------------------------------

/// Research stage output. Produced once, consumed once by the writing stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchArtifact {
    pub topic: String,
    pub summary_text: String,
}

/// The terminal artifact persisted at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub topic: String,
    pub body_markdown: String,
    pub generated_at: DateTime<Utc>,
}

impl Article {
    pub fn new(topic: impl Into<String>, body_markdown: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            body_markdown: body_markdown.into(),
            generated_at: Utc::now(),
        }
    }
}
