//! Tool registry for the research stage and the guided retrieval path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use newsagent_shared::{RetrievalConfig, RetrievalResult, RetrievalStatus};

use crate::knowledge::KnowledgeRetriever;
use crate::query::ToolQuery;
use crate::web::WebRetriever;

pub const KNOWLEDGE_TOOL: &str = "knowledge_base_search";
pub const WEB_TOOL: &str = "web_search";

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Name and description shown to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

/// A retrieval capability the research stage may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Always produces an observation; failures are described in the text.
    async fn invoke(&self, query: &ToolQuery) -> String;
}

struct KnowledgeTool(Arc<KnowledgeRetriever>);

#[async_trait]
impl Tool for KnowledgeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: KNOWLEDGE_TOOL,
            description: "Search the internal knowledge base of ingested documents. \
                          Use this FIRST before searching the web.",
        }
    }

    async fn invoke(&self, query: &ToolQuery) -> String {
        self.0.retrieve(query.as_str()).await
    }
}

struct WebTool(Arc<WebRetriever>);

#[async_trait]
impl Tool for WebTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: WEB_TOOL,
            description: "Search the web for recent information. Use this only if the \
                          knowledge base does not have sufficient information.",
        }
    }

    async fn invoke(&self, query: &ToolQuery) -> String {
        self.0.retrieve(query.as_str()).await
    }
}

/// Result of dispatching one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Normalized tool name as requested.
    pub tool: String,
    pub observation: String,
    /// False when the name matched no registered tool.
    pub known: bool,
}

/// Ordered tool registry. Earlier tools are listed first to the model.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.spec().name).collect()
    }

    /// `name: description` lines for the prompt.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| {
                let spec = t.spec();
                format!("{}: {}", spec.name, spec.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Dispatch by name. Never fails; bad names and bad input become observations.
    pub async fn call(&self, name: &str, raw_input: &str) -> ToolCall {
        let normalized = normalize_tool_name(name);
        let Some(tool) = self.tools.iter().find(|t| t.spec().name == normalized) else {
            warn!(tool = %normalized, "model requested an unknown tool");
            let observation = format!(
                "{normalized} is not a valid tool, try one of [{}].",
                self.names().join(", ")
            );
            return ToolCall {
                tool: normalized,
                observation,
                known: false,
            };
        };

        let observation = match ToolQuery::parse(raw_input) {
            Ok(query) => {
                debug!(tool = %normalized, query = %query, "invoking tool");
                tool.invoke(&query).await
            }
            Err(e) => format!("Invalid tool input: {e}"),
        };

        ToolCall {
            tool: normalized,
            observation,
            known: true,
        }
    }
}

fn normalize_tool_name(name: &str) -> String {
    name.trim()
        .trim_matches(['`', '"', '\''])
        .to_lowercase()
        .replace([' ', '-'], "_")
}

// ---------------------------------------------------------------------------
// Guided retrieval
// ---------------------------------------------------------------------------

/// When local results are good enough to skip the web.
#[derive(Debug, Clone, Copy)]
pub struct Sufficiency {
    pub min_top_score: f32,
    pub min_chunks: usize,
}

impl Default for Sufficiency {
    fn default() -> Self {
        Self {
            min_top_score: 0.7,
            min_chunks: 1,
        }
    }
}

impl From<&RetrievalConfig> for Sufficiency {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            min_top_score: config.min_top_score,
            min_chunks: config.min_chunks,
        }
    }
}

impl Sufficiency {
    pub fn is_sufficient(&self, result: &RetrievalResult) -> bool {
        result.status == RetrievalStatus::Found
            && result.chunks.len() >= self.min_chunks
            && result.top_score().is_some_and(|s| s >= self.min_top_score)
    }
}

/// Everything gathered for one topic in guided mode.
#[derive(Debug, Clone)]
pub struct GatheredContext {
    pub knowledge: String,
    /// `None` when the knowledge base was sufficient.
    pub web: Option<String>,
}

impl GatheredContext {
    pub fn used_web(&self) -> bool {
        self.web.is_some()
    }

    pub fn render(&self) -> String {
        let mut out = format!("Knowledge base results:\n{}", self.knowledge);
        if let Some(web) = &self.web {
            out.push_str("\n\nWeb search results:\n");
            out.push_str(web);
        }
        out
    }
}

/// Owns both retrievers and decides their order.
pub struct RetrievalOrchestrator {
    knowledge: Arc<KnowledgeRetriever>,
    web: Arc<WebRetriever>,
    sufficiency: Sufficiency,
}

impl RetrievalOrchestrator {
    pub fn new(
        knowledge: Arc<KnowledgeRetriever>,
        web: Arc<WebRetriever>,
        sufficiency: Sufficiency,
    ) -> Self {
        Self {
            knowledge,
            web,
            sufficiency,
        }
    }

    /// Both tools, knowledge base first.
    pub fn tools(&self) -> ToolSet {
        ToolSet::empty()
            .with(Arc::new(KnowledgeTool(Arc::clone(&self.knowledge))))
            .with(Arc::new(WebTool(Arc::clone(&self.web))))
    }

    /// Knowledge base first; the web only when local results fall short.
    pub async fn gather(&self, query: &str) -> GatheredContext {
        let local = self.knowledge.search(query).await;
        let knowledge = self.knowledge.render(&local);

        if self.sufficiency.is_sufficient(&local) {
            info!(
                top_score = local.top_score().unwrap_or_default(),
                "knowledge base sufficient, skipping web search"
            );
            return GatheredContext {
                knowledge,
                web: None,
            };
        }

        info!("knowledge base insufficient, falling back to web search");
        let web = self.web.retrieve(query).await;
        GatheredContext {
            knowledge,
            web: Some(web),
        }
    }
}
