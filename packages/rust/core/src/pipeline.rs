//! Two-stage research → writing pipeline for a single topic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use newsagent_retrieval::{RetrievalOrchestrator, ToolSet};
use newsagent_shared::{Article, NewsAgentError, PipelineConfig, ResearchArtifact, Result, RunId};

use crate::agents::{research_stage, writing_stage};
use crate::artifact::ArticleStore;
use crate::stage::{StageExecutor, StageOutput};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Pending,
    Researching,
    /// The writing stage produced article text; not yet persisted.
    Written,
    /// Terminal: article persisted.
    Done,
    /// Terminal: a stage failed or persisting failed.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Start,
    ArticleWritten,
    ArticlePersisted,
    Fail,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Valid edges:
    /// Pending → Researching (Start), Researching → Written (ArticleWritten),
    /// Written → Done (ArticlePersisted), any non-terminal → Failed (Fail).
    pub fn transition(self, event: PipelineEvent) -> Result<Self> {
        use PipelineEvent::*;
        use PipelineState::*;

        match (self, event) {
            (Pending, Start) => Ok(Researching),
            (Researching, ArticleWritten) => Ok(Written),
            (Written, ArticlePersisted) => Ok(Done),
            (from, Fail) if !from.is_terminal() => Ok(Failed),
            (from, event) => Err(NewsAgentError::validation(format!(
                "no pipeline transition from {from:?} on {event:?}"
            ))),
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Researching => "researching",
            Self::Written => "written",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Progress and reporting
// ---------------------------------------------------------------------------

/// Cost and outcome of one stage.
#[derive(Debug, Clone)]
pub struct StageStats {
    pub name: &'static str,
    pub rounds: usize,
    pub tool_calls: Vec<String>,
    pub partial: bool,
    pub elapsed: Duration,
}

impl StageStats {
    fn from_output(name: &'static str, output: &StageOutput) -> Self {
        Self {
            name,
            rounds: output.rounds,
            tool_calls: output.tool_calls.clone(),
            partial: output.partial,
            elapsed: output.elapsed,
        }
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: RunId,
    /// What the research stage handed to the writing stage.
    pub research_artifact: ResearchArtifact,
    pub article: Article,
    pub output_path: PathBuf,
    pub research: StageStats,
    pub writing: StageStats,
    /// Guided mode only: whether the web fallback ran.
    pub used_web: Option<bool>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called on every state change.
    fn state_changed(&self, state: PipelineState);
    /// Called before a stage starts generating.
    fn stage_started(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn state_changed(&self, _state: PipelineState) {}
    fn stage_started(&self, _name: &str) {}
    fn done(&self, _report: &PipelineReport) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// How the research stage gets its material.
pub enum ResearchStrategy {
    /// The model drives the tools itself.
    Agent(ToolSet),
    /// Deterministic gather up front; the stage gets context and no tools.
    Guided(Arc<RetrievalOrchestrator>),
}

pub struct TaskPipeline {
    executor: StageExecutor,
    strategy: ResearchStrategy,
    store: Arc<dyn ArticleStore>,
    config: PipelineConfig,
    state: PipelineState,
    failure: Option<String>,
}

impl TaskPipeline {
    pub fn new(
        executor: StageExecutor,
        strategy: ResearchStrategy,
        store: Arc<dyn ArticleStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            executor,
            strategy,
            store,
            config,
            state: PipelineState::Pending,
            failure: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Cause of the last failed run.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Run both stages for `topic` and persist the article.
    ///
    /// Each call starts from `Pending`, so a second run fully replaces the
    /// first run's article.
    #[instrument(skip_all, fields(topic = %topic, run_id = tracing::field::Empty))]
    pub async fn run(
        &mut self,
        topic: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineReport> {
        let run_id = RunId::new();
        tracing::Span::current().record("run_id", tracing::field::display(&run_id));

        self.state = PipelineState::Pending;
        self.failure = None;
        progress.state_changed(self.state);

        match self.drive(topic, run_id, progress).await {
            Ok(report) => {
                info!(elapsed_ms = report.elapsed.as_millis() as u64, "pipeline done");
                progress.done(&report);
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, state = %self.state, "pipeline failed");
                self.state = self
                    .state
                    .transition(PipelineEvent::Fail)
                    .unwrap_or(PipelineState::Failed);
                self.failure = Some(e.to_string());
                progress.state_changed(self.state);
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        topic: &str,
        run_id: RunId,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineReport> {
        let start = Instant::now();
        info!(output = %self.store.location().display(), "pipeline started");
        self.advance(PipelineEvent::Start, progress)?;

        // --- Research ---
        let research_def = research_stage(topic, &self.config);
        progress.stage_started(research_def.name);
        let (research_out, used_web) = match &self.strategy {
            ResearchStrategy::Agent(tools) => {
                info!(tools = ?tools.names(), "research stage: agent mode");
                (self.executor.run(&research_def, tools, None).await?, None)
            }
            ResearchStrategy::Guided(orchestrator) => {
                info!("research stage: guided mode");
                self.executor.throttle().acquire().await;
                let gathered = orchestrator.gather(topic).await;
                if gathered.used_web() {
                    self.executor.throttle().acquire().await;
                }
                let context = gathered.render();
                let out = self
                    .executor
                    .run(&research_def, &ToolSet::empty(), Some(context.as_str()))
                    .await?;
                (out, Some(gathered.used_web()))
            }
        };
        let research = ResearchArtifact {
            topic: topic.to_string(),
            summary_text: non_empty(research_out.text.clone(), research_def.name)?,
        };
        info!(
            rounds = research_out.rounds,
            partial = research_out.partial,
            chars = research.summary_text.len(),
            "research artifact ready"
        );

        // --- Writing: research summary is the only input, no tools ---
        let writing_def = writing_stage(topic, &self.config);
        progress.stage_started(writing_def.name);
        let writing_out = self
            .executor
            .run(&writing_def, &ToolSet::empty(), Some(research.summary_text.as_str()))
            .await?;
        let body = non_empty(writing_out.text.clone(), writing_def.name)?;
        let article = Article::new(research.topic.clone(), body);
        self.advance(PipelineEvent::ArticleWritten, progress)?;

        // --- Persist ---
        let output_path = self.store.save(&article)?;
        self.advance(PipelineEvent::ArticlePersisted, progress)?;
        info!(path = %output_path.display(), "article persisted");

        Ok(PipelineReport {
            run_id,
            research_artifact: research,
            article,
            output_path,
            research: StageStats::from_output(research_def.name, &research_out),
            writing: StageStats::from_output(writing_def.name, &writing_out),
            used_web,
            elapsed: start.elapsed(),
        })
    }

    fn advance(&mut self, event: PipelineEvent, progress: &dyn ProgressReporter) -> Result<()> {
        self.state = self.state.transition(event)?;
        progress.state_changed(self.state);
        Ok(())
    }
}

fn non_empty(text: String, stage: &str) -> Result<String> {
    if text.trim().is_empty() {
        return Err(NewsAgentError::Generation(format!(
            "stage '{stage}' produced an empty answer"
        )));
    }
    Ok(text)
}
