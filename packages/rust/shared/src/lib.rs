//! Shared types, error model, and configuration for the news agent.
//!
//! This crate is the foundation depended on by all other news agent crates.
//! It provides:
//! - [`NewsAgentError`] — the unified error type
//! - Domain types ([`DocumentChunk`], [`RetrievalResult`], [`ResearchArtifact`], [`Article`])
//! - Configuration ([`AppConfig`], config loading, setup checks)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EmbeddingConfig, GenerationConfig, IngestConfig, PathsConfig, PipelineConfig,
    ResearchMode, RetrievalConfig, SearchConfig, SetupIssue, check_setup, config_dir,
    config_file_path, ensure_ready, init_config, load_config, load_config_from, read_secret,
};
pub use error::{NewsAgentError, Result};
pub use types::{
    Article, DocumentChunk, ResearchArtifact, RetrievalResult, RetrievalStatus, RunId,
    ScoredChunk, SearchQuery,
};
