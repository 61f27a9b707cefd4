//! Wires configuration into a runnable pipeline for one topic.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use newsagent_retrieval::{
    Embedder, GeminiEmbedder, KnowledgeOptions, KnowledgeRetriever, RateLimiter,
    RetrievalOrchestrator, SerperClient, ServiceId, Sufficiency, WebRetriever, WebSearch,
};
use newsagent_shared::{AppConfig, NewsAgentError, ResearchMode, Result, ensure_ready};

use crate::artifact::{ArticleStore, FileArticleStore};
use crate::llm::{GeminiClient, GenerationOptions, TextGenerator};
use crate::pipeline::{PipelineReport, ProgressReporter, ResearchStrategy, TaskPipeline};
use crate::stage::StageExecutor;
use crate::throttle::RequestThrottle;

/// Per-service minimum intervals from config.
pub fn rate_limiter(config: &AppConfig) -> RateLimiter {
    RateLimiter::new()
        .with_service(
            ServiceId::Embedding,
            Duration::from_millis(config.embedding.min_interval_ms),
        )
        .with_service(
            ServiceId::WebSearch,
            Duration::from_millis(config.search.min_interval_ms),
        )
}

/// External collaborators a run needs.
pub struct CrewParts {
    pub generator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn Embedder>,
    pub search: Arc<dyn WebSearch>,
    pub store: Arc<dyn ArticleStore>,
}

/// Drives one topic through the pipeline under a run-wide request ceiling.
pub struct CrewRunner {
    pipeline: TaskPipeline,
    mode: ResearchMode,
}

impl CrewRunner {
    /// Check setup, build the real clients, and open the index.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        ensure_ready(config)?;

        let parts = CrewParts {
            generator: Arc::new(GeminiClient::from_config(config)?),
            embedder: Arc::new(GeminiEmbedder::from_config(config)?),
            search: Arc::new(SerperClient::from_config(config)?),
            store: Arc::new(FileArticleStore::new(config.paths.output_path.clone())),
        };
        Ok(Self::assemble(config, parts, &config.paths.index_path).await)
    }

    /// Build from explicit parts. The index at `index_path` is opened here;
    /// if it cannot be read, knowledge searches report the failure as text.
    pub async fn assemble(config: &AppConfig, parts: CrewParts, index_path: &Path) -> Self {
        let limiter = Arc::new(rate_limiter(config));
        let knowledge = Arc::new(
            KnowledgeRetriever::open(
                index_path,
                parts.embedder,
                Arc::clone(&limiter),
                KnowledgeOptions::from(&config.retrieval),
            )
            .await,
        );
        if !knowledge.is_available() {
            warn!("research continues on web search only");
        }
        let web = Arc::new(WebRetriever::new(parts.search, limiter));
        let orchestrator = Arc::new(RetrievalOrchestrator::new(
            knowledge,
            web,
            Sufficiency::from(&config.retrieval),
        ));

        let mode = config.pipeline.research_mode;
        let strategy = match mode {
            ResearchMode::Agent => ResearchStrategy::Agent(orchestrator.tools()),
            ResearchMode::Guided => ResearchStrategy::Guided(orchestrator),
        };

        let executor = StageExecutor::new(
            parts.generator,
            Arc::new(RequestThrottle::per_minute(config.pipeline.max_rpm)),
            GenerationOptions::from(&config.generation),
        );

        Self {
            pipeline: TaskPipeline::new(executor, strategy, parts.store, config.pipeline.clone()),
            mode,
        }
    }

    pub fn pipeline(&self) -> &TaskPipeline {
        &self.pipeline
    }

    /// Run one topic to `Done` or `Failed`.
    #[instrument(skip_all, fields(topic = %topic, mode = ?self.mode))]
    pub async fn run(
        &mut self,
        topic: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineReport> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(NewsAgentError::validation("topic must not be empty"));
        }
        info!("starting crew run");
        self.pipeline.run(topic, progress).await
    }
}
