//! Pipeline orchestration for the news agent.
//!
//! This crate ties the retrieval tools to the generation service: a research
//! stage that gathers material, a writing stage that turns it into an
//! article, and the run-level plumbing around them (request ceiling, stage
//! bounds, article persistence). It also builds the local index (`ingest`).

pub mod agents;
pub mod artifact;
pub mod crew;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod stage;
pub mod throttle;

pub use artifact::{ArticleStore, FileArticleStore};
pub use crew::{CrewParts, CrewRunner, rate_limiter};
pub use ingest::{ChunkOptions, IngestProgress, IngestReport, ingest_dir, query_index, split_text};
pub use llm::{GeminiClient, GenerationOptions, GenerationRequest, TextGenerator};
pub use pipeline::{
    PipelineEvent, PipelineReport, PipelineState, ProgressReporter, ResearchStrategy,
    SilentProgress, StageStats, TaskPipeline,
};
pub use stage::{ModelTurn, StageExecutor, StageOutput, parse_turn};
pub use throttle::RequestThrottle;
