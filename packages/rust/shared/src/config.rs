//! Application configuration for the news agent.
//!
//! User config lives at `~/.newsagent/newsagent.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored in the file, only the names of the env vars
//! that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{NewsAgentError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "newsagent.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".newsagent";

// ---------------------------------------------------------------------------
// Config structs (matching newsagent.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

/// `[generation]` section: the text-completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_google_base_url")]
    pub base_url: Url,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature in [0, 1].
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_generation_key_env(),
            base_url: default_google_base_url(),
            model: default_generation_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_generation_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_google_base_url() -> Url {
    Url::parse("https://generativelanguage.googleapis.com/").expect("static URL")
}
fn default_generation_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_output_tokens() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}

/// `[embedding]` section. Shares the generation API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Minimum ms between successive embedding calls.
    #[serde(default = "default_embedding_interval")]
    pub min_interval_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            min_interval_ms: default_embedding_interval(),
        }
    }
}

fn default_embedding_model() -> String {
    "embedding-001".into()
}
fn default_embedding_interval() -> u64 {
    2000
}

/// `[search]` section: the web-search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_base_url")]
    pub base_url: Url,

    #[serde(default = "default_num_results")]
    pub num_results: u32,

    /// Minimum ms between successive search calls.
    #[serde(default = "default_search_interval")]
    pub min_interval_ms: u64,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base_url: default_search_base_url(),
            num_results: default_num_results(),
            min_interval_ms: default_search_interval(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_search_base_url() -> Url {
    Url::parse("https://google.serper.dev/").expect("static URL")
}
fn default_num_results() -> u32 {
    10
}
fn default_search_interval() -> u64 {
    3000
}
fn default_search_timeout() -> u64 {
    30
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks returned per knowledge-base query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Characters of each chunk shown to the model.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,

    /// Guided mode: local results are sufficient when the best chunk scores at least this.
    #[serde(default = "default_min_top_score")]
    pub min_top_score: f32,

    /// Guided mode: and at least this many chunks were found.
    #[serde(default = "default_min_chunks")]
    pub min_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            snippet_chars: default_snippet_chars(),
            min_top_score: default_min_top_score(),
            min_chunks: default_min_chunks(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_snippet_chars() -> usize {
    400
}
fn default_min_top_score() -> f32 {
    0.7
}
fn default_min_chunks() -> usize {
    1
}

/// How the research stage decides between knowledge base and web.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    /// The model is offered both tools and picks the order itself.
    #[default]
    Agent,
    /// Knowledge base first, web only when local results are insufficient.
    Guided,
}

impl std::str::FromStr for ResearchMode {
    type Err = NewsAgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "agent" => Ok(Self::Agent),
            "guided" => Ok(Self::Guided),
            other => Err(NewsAgentError::config(format!(
                "unknown research mode '{other}': expected 'agent' or 'guided'"
            ))),
        }
    }
}

/// `[pipeline]` section: stage bounds and the global request ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ceiling on generation + tool calls per minute across the whole run.
    #[serde(default = "default_max_rpm")]
    pub max_rpm: usize,

    #[serde(default = "default_research_max_iter")]
    pub research_max_iter: usize,

    #[serde(default = "default_research_max_secs")]
    pub research_max_secs: u64,

    #[serde(default = "default_writing_max_iter")]
    pub writing_max_iter: usize,

    #[serde(default = "default_writing_max_secs")]
    pub writing_max_secs: u64,

    #[serde(default)]
    pub research_mode: ResearchMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rpm: default_max_rpm(),
            research_max_iter: default_research_max_iter(),
            research_max_secs: default_research_max_secs(),
            writing_max_iter: default_writing_max_iter(),
            writing_max_secs: default_writing_max_secs(),
            research_mode: ResearchMode::default(),
        }
    }
}

fn default_max_rpm() -> usize {
    10
}
fn default_research_max_iter() -> usize {
    3
}
fn default_research_max_secs() -> u64 {
    300
}
fn default_writing_max_iter() -> usize {
    2
}
fn default_writing_max_secs() -> u64 {
    240
}

/// `[paths]` section. Relative paths resolve against the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Source documents for ingestion.
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    /// Persisted embedding index.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Article output, replaced on every successful run.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            index_path: default_index_path(),
            output_path: default_output_path(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_index_path() -> PathBuf {
    PathBuf::from("var/index/newsagent.db")
}
fn default_output_path() -> PathBuf {
    PathBuf::from("newsblog.md")
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl AppConfig {
    /// Reject values that would make a run misbehave.
    pub fn validate(&self) -> Result<()> {
        let t = self.generation.temperature;
        if !(0.0..=1.0).contains(&t) {
            return Err(NewsAgentError::config(format!(
                "generation.temperature must be within [0, 1], got {t}"
            )));
        }
        if self.generation.max_output_tokens == 0 {
            return Err(NewsAgentError::config(
                "generation.max_output_tokens must be greater than 0",
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(NewsAgentError::config("retrieval.top_k must be greater than 0"));
        }
        let p = &self.pipeline;
        if p.max_rpm == 0 || p.research_max_iter == 0 || p.writing_max_iter == 0 {
            return Err(NewsAgentError::config(
                "pipeline.max_rpm and stage iteration caps must be greater than 0",
            ));
        }
        if p.research_max_secs == 0 || p.writing_max_secs == 0 {
            return Err(NewsAgentError::config(
                "pipeline stage time budgets must be greater than 0",
            ));
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(NewsAgentError::config(format!(
                "ingest.chunk_overlap ({}) must be smaller than ingest.chunk_size ({})",
                self.ingest.chunk_overlap, self.ingest.chunk_size
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.newsagent/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NewsAgentError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.newsagent/newsagent.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NewsAgentError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        NewsAgentError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NewsAgentError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NewsAgentError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NewsAgentError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

// ---------------------------------------------------------------------------
// Secrets and setup validation
// ---------------------------------------------------------------------------

/// Read a secret from the named env var. Empty values count as missing.
pub fn read_secret(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}

/// Something that must be fixed before a run can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupIssue {
    MissingGenerationKey { env_var: String },
    MissingSearchKey { env_var: String },
    MissingIndex { path: PathBuf },
}

impl SetupIssue {
    /// User-facing instruction for fixing the issue.
    pub fn instruction(&self) -> String {
        match self {
            Self::MissingGenerationKey { env_var } => format!(
                "Generation API key not found. Set the {env_var} environment variable."
            ),
            Self::MissingSearchKey { env_var } => format!(
                "Web search API key not found. Set the {env_var} environment variable."
            ),
            Self::MissingIndex { path } => format!(
                "Knowledge base not found at {}. Run `newsagent ingest` first.",
                path.display()
            ),
        }
    }
}

impl std::fmt::Display for SetupIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.instruction())
    }
}

/// Collect every setup issue at once so the user can fix them in one go.
pub fn check_setup(config: &AppConfig) -> Vec<SetupIssue> {
    let mut issues = Vec::new();

    if read_secret(&config.generation.api_key_env).is_none() {
        issues.push(SetupIssue::MissingGenerationKey {
            env_var: config.generation.api_key_env.clone(),
        });
    }
    if read_secret(&config.search.api_key_env).is_none() {
        issues.push(SetupIssue::MissingSearchKey {
            env_var: config.search.api_key_env.clone(),
        });
    }
    if !config.paths.index_path.exists() {
        issues.push(SetupIssue::MissingIndex {
            path: config.paths.index_path.clone(),
        });
    }

    issues
}

/// Fail with a single config error listing every setup issue.
pub fn ensure_ready(config: &AppConfig) -> Result<()> {
    let issues = check_setup(config);
    if issues.is_empty() {
        return Ok(());
    }
    let lines: Vec<String> = issues.iter().map(|i| format!("  - {i}")).collect();
    Err(NewsAgentError::config(format!(
        "setup incomplete:\n{}",
        lines.join("\n")
    )))
}
