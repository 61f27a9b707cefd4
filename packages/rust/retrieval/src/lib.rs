//! Retrieval layer: the local embedding index, web search, and the tools
//! the research stage calls.
//!
//! Every external call made from here passes through a per-service
//! [`RateLimiter`]. Retrievers never return errors across the tool boundary;
//! failures come back as descriptive text the calling stage can reason over.

pub mod embedding;
pub mod index;
pub mod knowledge;
pub mod orchestrator;
pub mod query;
pub mod rate_limit;
pub mod web;

pub use embedding::{Embedder, GeminiEmbedder, cosine_similarity};
pub use index::{ChunkIndex, EmbeddingIndex};
pub use knowledge::{KnowledgeOptions, KnowledgeRetriever, NO_RELEVANT_INFORMATION};
pub use orchestrator::{
    GatheredContext, KNOWLEDGE_TOOL, RetrievalOrchestrator, Sufficiency, Tool, ToolCall, ToolSet,
    ToolSpec, WEB_TOOL,
};
pub use query::ToolQuery;
pub use rate_limit::{RateLimitState, RateLimiter, ServiceId};
pub use web::{SerperClient, WebOutcome, WebResultItem, WebResults, WebRetriever, WebSearch};
