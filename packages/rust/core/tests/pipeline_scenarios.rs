//! End-to-end pipeline runs against scripted models, an on-disk index, and a
//! mocked search provider.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use newsagent_core::{
    CrewParts, CrewRunner, FileArticleStore, GenerationRequest, PipelineState, SilentProgress,
    TextGenerator,
};
use newsagent_retrieval::{Embedder, NO_RELEVANT_INFORMATION, SerperClient, WebResults, WebSearch};
use newsagent_shared::{AppConfig, DocumentChunk, NewsAgentError, ResearchMode, Result};
use newsagent_storage::Storage;

const TOPIC: &str = "AI in Healthcare";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum Research {
    /// Knowledge base, then web, then a summary of every useful observation.
    KnowledgeThenWeb,
    /// Requests a tool forever and never thinks out loud.
    Looping,
}

#[derive(Clone, Copy, PartialEq)]
enum Writer {
    Answers,
    /// Asks for a tool once before answering.
    TriesToolOnce,
    /// Thinks out loud and requests a tool every round.
    KeepsThinking,
}

struct ScriptedModel {
    research: Research,
    writer: Writer,
    prompts: Mutex<Vec<String>>,
    articles: AtomicUsize,
}

impl ScriptedModel {
    fn new(research: Research) -> Arc<Self> {
        Self::with_writer(research, Writer::Answers)
    }

    fn with_writer(research: Research, writer: Writer) -> Arc<Self> {
        Arc::new(Self {
            research,
            writer,
            prompts: Mutex::new(Vec::new()),
            articles: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn writing_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains("Current task: Create an engaging article"))
            .cloned()
            .collect()
    }
}

fn observations(prompt: &str) -> Vec<String> {
    prompt
        .split("Observation: ")
        .skip(1)
        .map(|seg| seg.split("\n\nAction:").next().unwrap_or_default().trim().to_string())
        .collect()
}

fn context(prompt: &str) -> String {
    prompt
        .split("This is the context you're working with:\n")
        .nth(1)
        .and_then(|rest| rest.split("\n\nBegin!").next())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl TextGenerator for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let prompt = request.prompt.clone();
        self.prompts.lock().unwrap().push(prompt.clone());

        let is_research = prompt.contains("Current task: Research");
        let has_tools = prompt.contains("You have access to the following tools");

        if is_research && has_tools {
            if self.research == Research::Looping {
                return Ok("Action: knowledge_base_search\nAction Input: loop".into());
            }
            let seen = observations(&prompt);
            return Ok(match seen.len() {
                0 => "Action: knowledge_base_search\nAction Input: {\"query\": \"AI in Healthcare\"}"
                    .into(),
                1 => "Action: web_search\nAction Input: AI in Healthcare 2024".into(),
                _ => {
                    let useful: Vec<_> = seen
                        .into_iter()
                        .filter(|o| o != NO_RELEVANT_INFORMATION)
                        .collect();
                    format!("Thought: I now know the final answer\nFinal Answer: {}", useful.join("\n\n"))
                }
            });
        }

        if is_research {
            return Ok(format!("Final Answer: {}", context(&prompt)));
        }

        match self.writer {
            Writer::TriesToolOnce if !prompt.contains("Observation:") => {
                return Ok("Action: web_search\nAction Input: latest statistics".into());
            }
            Writer::KeepsThinking => {
                return Ok("Thought: I should double-check the latest figures first.\n\
                           Action: web_search\nAction Input: latest figures"
                    .into());
            }
            _ => {}
        }

        let n = self.articles.fetch_add(1, Ordering::SeqCst) + 1;
        let research = context(&prompt);
        let local: Vec<&str> = research.lines().filter(|l| l.starts_with('[')).collect();
        let body = if local.is_empty() { research.clone() } else { local.join("\n\n") };
        Ok(format!("Final Answer: # {TOPIC}\n\nDraft {n}.\n\n{body}"))
    }
}

/// Search provider that never leaves the process.
struct CannedSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl WebSearch for CannedSearch {
    async fn search(&self, _query: &str) -> Result<WebResults> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(WebResults::default())
    }
}

/// Every text embeds to the same unit vector.
struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    fn model(&self) -> &str {
        "unit"
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Fixture {
    dir: PathBuf,
    config: AppConfig,
}

impl Fixture {
    fn new(mode: ResearchMode) -> Self {
        let dir = std::env::temp_dir().join(format!("newsagent-e2e-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = AppConfig::default();
        config.embedding.min_interval_ms = 1;
        config.search.min_interval_ms = 1;
        // Reruns share one runner; keep the ceiling out of the way.
        config.pipeline.max_rpm = 100;
        config.pipeline.research_mode = mode;
        config.paths.index_path = dir.join("index").join("newsagent.db");
        config.paths.output_path = dir.join("newsblog.md");
        Self { dir, config }
    }

    /// Chunks whose cosine similarity to the unit query is `scores[i]`.
    async fn index_with_scores(&self, scores: &[f32]) {
        let chunks: Vec<DocumentChunk> = scores
            .iter()
            .enumerate()
            .map(|(i, s)| DocumentChunk {
                id: format!("chunk-{i}"),
                text: format!("Healthcare finding {i} with similarity {s}"),
                source_id: format!("data/paper-{i}.md"),
                embedding: vec![*s, (1.0 - s * s).sqrt()],
            })
            .collect();
        let storage = Storage::open(&self.config.paths.index_path).await.unwrap();
        storage.replace_chunks(&chunks).await.unwrap();
    }

    async fn runner(&self, model: Arc<ScriptedModel>, search: &MockServer) -> CrewRunner {
        let base = Url::parse(&search.uri()).unwrap();
        let serper = SerperClient::new("test-key".into(), &base, 5, Duration::from_secs(5)).unwrap();
        self.runner_with_search(model, Arc::new(serper)).await
    }

    async fn runner_with_search(
        &self,
        model: Arc<ScriptedModel>,
        search: Arc<dyn WebSearch>,
    ) -> CrewRunner {
        let parts = CrewParts {
            generator: model,
            embedder: Arc::new(UnitEmbedder),
            search,
            store: Arc::new(FileArticleStore::new(self.config.paths.output_path.clone())),
        };
        CrewRunner::assemble(&self.config, parts, &self.config.paths.index_path).await
    }

    fn output(&self) -> &Path {
        &self.config.paths.output_path
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

async fn search_quota_exceeded() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Not enough credits"))
        .mount(&server)
        .await;
    server
}

async fn search_with_results() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "organic": [{
                "title": "Hospitals adopt AI triage",
                "link": "https://news.example.com/triage",
                "snippet": "Emergency departments report faster triage with AI."
            }]
        })))
        .mount(&server)
        .await;
    server
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quota_exceeded_web_still_yields_article_from_knowledge_base() {
    let fx = Fixture::new(ResearchMode::Agent);
    fx.index_with_scores(&[0.9, 0.75, 0.6]).await;
    let search = search_quota_exceeded().await;
    let model = ScriptedModel::new(Research::KnowledgeThenWeb);

    let mut runner = fx.runner(model.clone(), &search).await;
    let report = runner.run(TOPIC, &SilentProgress).await.unwrap();

    let summary = &report.research_artifact.summary_text;
    assert!(summary.contains("[paper-0.md] Healthcare finding 0"));
    assert!(summary.contains("Web search error:"));
    assert!(summary.contains("quota exceeded"));
    assert_eq!(report.research.tool_calls, vec!["knowledge_base_search", "web_search"]);

    // Best match first in the observation.
    let first = summary.find("finding 0").unwrap();
    let second = summary.find("finding 1").unwrap();
    let third = summary.find("finding 2").unwrap();
    assert!(first < second && second < third);

    let written = std::fs::read_to_string(fx.output()).unwrap();
    assert!(written.contains(TOPIC));
    assert!(written.contains("Healthcare finding 0"));
    assert!(!written.contains("Web search error"));
    assert_eq!(runner.pipeline().state(), PipelineState::Done);
}

#[tokio::test]
async fn empty_index_falls_back_to_web_content() {
    let fx = Fixture::new(ResearchMode::Agent);
    fx.index_with_scores(&[]).await;
    let search = search_with_results().await;
    let model = ScriptedModel::new(Research::KnowledgeThenWeb);

    let mut runner = fx.runner(model.clone(), &search).await;
    let report = runner.run(TOPIC, &SilentProgress).await.unwrap();

    let summary = &report.research_artifact.summary_text;
    assert!(summary.contains("Hospitals adopt AI triage"));
    assert!(!summary.contains(NO_RELEVANT_INFORMATION));
    assert!(!summary.contains("Healthcare finding"));

    let prompts = model.prompts.lock().unwrap();
    assert!(prompts.iter().any(|p| p.contains(&format!("Observation: {NO_RELEVANT_INFORMATION}"))));
    drop(prompts);

    assert_eq!(runner.pipeline().state(), PipelineState::Done);
    assert!(fx.output().exists());
}

#[tokio::test]
async fn rerun_fully_replaces_previous_article() {
    let fx = Fixture::new(ResearchMode::Agent);
    fx.index_with_scores(&[0.9]).await;
    let search = search_with_results().await;
    let model = ScriptedModel::new(Research::KnowledgeThenWeb);

    let mut runner = fx.runner(model, &search).await;
    runner.run(TOPIC, &SilentProgress).await.unwrap();
    let first = std::fs::read_to_string(fx.output()).unwrap();
    assert!(first.contains("Draft 1."));

    runner.run(TOPIC, &SilentProgress).await.unwrap();
    let second = std::fs::read_to_string(fx.output()).unwrap();
    assert!(second.contains("Draft 2."));
    assert!(!second.contains("Draft 1."));
    assert_eq!(second.matches(&format!("# {TOPIC}")).count(), 1);
}

#[tokio::test]
async fn writing_stage_has_no_tools_and_still_completes() {
    let fx = Fixture::new(ResearchMode::Agent);
    fx.index_with_scores(&[0.9, 0.8]).await;

    let search = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "organic": [] })))
        .expect(1)
        .mount(&search)
        .await;

    let model = ScriptedModel::with_writer(Research::KnowledgeThenWeb, Writer::TriesToolOnce);
    let mut runner = fx.runner(model.clone(), &search).await;
    let report = runner.run(TOPIC, &SilentProgress).await.unwrap();

    // Only the research stage reached the search provider.
    assert!(report.writing.tool_calls.is_empty());
    assert_eq!(report.writing.rounds, 2);

    let writing = model.writing_prompts();
    assert!(writing.iter().all(|p| p.contains("You have no tools.")));
    assert!(writing[1].contains("Observation: web_search is not a valid tool, try one of []."));
    assert_eq!(runner.pipeline().state(), PipelineState::Done);
    search.verify().await;
}

#[tokio::test]
async fn writer_that_never_answers_fails_and_keeps_previous_article() {
    let fx = Fixture::new(ResearchMode::Agent);
    fx.index_with_scores(&[0.9]).await;
    let search = search_with_results().await;

    let mut runner = fx.runner(ScriptedModel::new(Research::KnowledgeThenWeb), &search).await;
    runner.run(TOPIC, &SilentProgress).await.unwrap();
    let previous = std::fs::read_to_string(fx.output()).unwrap();

    let model = ScriptedModel::with_writer(Research::KnowledgeThenWeb, Writer::KeepsThinking);
    let mut runner = fx.runner(model.clone(), &search).await;
    let err = runner.run(TOPIC, &SilentProgress).await.unwrap_err();

    match err {
        NewsAgentError::StageIterationLimit { stage, limit } => {
            assert_eq!(stage, "writing");
            assert_eq!(limit, 2);
        }
        other => panic!("expected iteration limit, got {other:?}"),
    }
    assert_eq!(model.writing_prompts().len(), 2);
    assert_eq!(runner.pipeline().state(), PipelineState::Failed);

    let after = std::fs::read_to_string(fx.output()).unwrap();
    assert_eq!(after, previous);
    assert!(!after.contains("double-check"));
}

#[tokio::test(start_paused = true)]
async fn request_ceiling_delays_calls_past_the_limit() {
    let mut fx = Fixture::new(ResearchMode::Guided);
    fx.config.pipeline.max_rpm = 2;
    fx.index_with_scores(&[0.9, 0.75]).await;

    let search = Arc::new(CannedSearch {
        calls: AtomicUsize::new(0),
    });
    let model = ScriptedModel::new(Research::KnowledgeThenWeb);
    let mut runner = fx.runner_with_search(model.clone(), search.clone()).await;

    // Knowledge lookup, research answer, then the article: the third call
    // has to wait for the first slot to leave the 60s window.
    let started = tokio::time::Instant::now();
    let report = runner.run(TOPIC, &SilentProgress).await.unwrap();
    let waited = started.elapsed();

    assert_eq!(report.used_web, Some(false));
    assert_eq!(model.calls(), 2);
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    assert!(waited >= Duration::from_secs(60), "waited only {waited:?}");
    assert!(waited < Duration::from_secs(120), "waited {waited:?}");
    assert_eq!(runner.pipeline().state(), PipelineState::Done);
}

#[tokio::test]
async fn looping_research_stops_at_round_cap_and_fails() {
    let fx = Fixture::new(ResearchMode::Agent);
    fx.index_with_scores(&[0.9]).await;
    let search = search_with_results().await;
    let model = ScriptedModel::new(Research::Looping);

    let mut runner = fx.runner(model.clone(), &search).await;
    let err = runner.run(TOPIC, &SilentProgress).await.unwrap_err();

    match err {
        NewsAgentError::StageIterationLimit { stage, limit } => {
            assert_eq!(stage, "research");
            assert_eq!(limit, 3);
        }
        other => panic!("expected iteration limit, got {other:?}"),
    }
    assert_eq!(model.calls(), 3);
    assert_eq!(runner.pipeline().state(), PipelineState::Failed);
    assert!(runner.pipeline().failure().unwrap().contains("iteration limit"));
    assert!(model.writing_prompts().is_empty());
    assert!(!fx.output().exists());
}

#[tokio::test]
async fn guided_mode_skips_web_when_knowledge_is_sufficient() {
    let fx = Fixture::new(ResearchMode::Guided);
    fx.index_with_scores(&[0.9, 0.75, 0.6]).await;

    let search = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&search)
        .await;

    let model = ScriptedModel::new(Research::KnowledgeThenWeb);
    let mut runner = fx.runner(model.clone(), &search).await;
    let report = runner.run(TOPIC, &SilentProgress).await.unwrap();

    assert_eq!(report.used_web, Some(false));
    assert_eq!(report.research.rounds, 1);
    assert!(report.research_artifact.summary_text.contains("Knowledge base results:"));
    search.verify().await;
}

#[tokio::test]
async fn guided_mode_uses_web_when_index_is_empty() {
    let fx = Fixture::new(ResearchMode::Guided);
    fx.index_with_scores(&[]).await;
    let search = search_with_results().await;
    let model = ScriptedModel::new(Research::KnowledgeThenWeb);

    let mut runner = fx.runner(model, &search).await;
    let report = runner.run(TOPIC, &SilentProgress).await.unwrap();

    assert_eq!(report.used_web, Some(true));
    assert!(report.research_artifact.summary_text.contains("Hospitals adopt AI triage"));
}

#[tokio::test]
async fn unreadable_index_is_reported_to_the_model_as_text() {
    let fx = Fixture::new(ResearchMode::Agent);
    std::fs::create_dir_all(fx.config.paths.index_path.parent().unwrap()).unwrap();
    std::fs::write(&fx.config.paths.index_path, b"not a database").unwrap();
    let search = search_with_results().await;
    let model = ScriptedModel::new(Research::KnowledgeThenWeb);

    let mut runner = fx.runner(model.clone(), &search).await;
    let report = runner.run(TOPIC, &SilentProgress).await.unwrap();

    assert!(report.research_artifact.summary_text.contains("Error accessing knowledge base:"));
    assert!(report.research_artifact.summary_text.contains("Hospitals adopt AI triage"));
}

#[tokio::test]
async fn missing_setup_refuses_to_start() {
    let fx = Fixture::new(ResearchMode::Agent);
    let mut config = fx.config.clone();
    config.generation.api_key_env = "NEWSAGENT_TEST_UNSET_GENERATION_KEY".into();
    config.search.api_key_env = "NEWSAGENT_TEST_UNSET_SEARCH_KEY".into();

    let err = match CrewRunner::from_config(&config).await {
        Ok(_) => panic!("setup should be incomplete"),
        Err(e) => e,
    };
    let message = err.to_string();
    assert!(message.contains("setup incomplete"));
    assert!(message.contains("NEWSAGENT_TEST_UNSET_GENERATION_KEY"));
    assert!(message.contains("NEWSAGENT_TEST_UNSET_SEARCH_KEY"));
    assert!(message.contains("newsagent ingest"));
}

#[tokio::test]
async fn blank_topic_is_rejected_before_any_call() {
    let fx = Fixture::new(ResearchMode::Agent);
    fx.index_with_scores(&[0.9]).await;
    let search = search_with_results().await;
    let model = ScriptedModel::new(Research::KnowledgeThenWeb);

    let mut runner = fx.runner(model.clone(), &search).await;
    let err = runner.run("   ", &SilentProgress).await.unwrap_err();
    assert!(matches!(err, NewsAgentError::Validation { .. }));
    assert_eq!(model.calls(), 0);
}
