//! Web search tool backed by the Serper API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use newsagent_shared::{AppConfig, NewsAgentError, Result, SearchQuery, read_secret};

use crate::embedding::USER_AGENT;
use crate::knowledge::truncate_chars;
use crate::rate_limit::{RateLimiter, ServiceId};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One organic search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResultItem {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Parsed search response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebResults {
    /// Direct answer, when the provider has one.
    pub answer: Option<String>,
    pub items: Vec<WebResultItem>,
}

impl WebResults {
    pub fn is_empty(&self) -> bool {
        self.answer.is_none() && self.items.is_empty()
    }

    /// Raw text blocks handed to the model.
    pub fn to_text(&self) -> String {
        let mut blocks = Vec::new();
        if let Some(answer) = &self.answer {
            blocks.push(format!("Answer: {answer}"));
        }
        for item in &self.items {
            blocks.push(format!(
                "Title: {}\nLink: {}\nSnippet: {}",
                item.title, item.link, item.snippet
            ));
        }
        blocks.join("\n---\n")
    }
}

/// Issues a single search query.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<WebResults>;
}

// ---------------------------------------------------------------------------
// Serper client
// ---------------------------------------------------------------------------

/// Client for `POST /search` on google.serper.dev.
pub struct SerperClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    num_results: u32,
    timeout: Duration,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default, rename = "answerBox")]
    answer_box: Option<SerperAnswerBox>,
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Deserialize)]
struct SerperAnswerBox {
    answer: Option<String>,
    snippet: Option<String>,
}

#[derive(Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl SerperClient {
    pub fn new(api_key: String, base_url: &Url, num_results: u32, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(NewsAgentError::config("missing web search API key"));
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| NewsAgentError::Network(format!("failed to build HTTP client: {e}")))?;
        let endpoint = base_url
            .join("search")
            .map_err(|e| NewsAgentError::config(format!("invalid search endpoint: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            num_results,
            timeout,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let env_var = &config.search.api_key_env;
        let api_key = read_secret(env_var).ok_or_else(|| {
            NewsAgentError::config(format!(
                "web search API key not found. Set the {env_var} environment variable."
            ))
        })?;
        Self::new(
            api_key,
            &config.search.base_url,
            config.search.num_results,
            Duration::from_secs(config.search.timeout_secs),
        )
    }
}

#[async_trait]
impl WebSearch for SerperClient {
    async fn search(&self, query: &str) -> Result<WebResults> {
        let body = serde_json::json!({ "q": query, "num": self.num_results });

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NewsAgentError::Retrieval(format!(
                        "search request timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    NewsAgentError::Retrieval(format!("search request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NewsAgentError::Retrieval(describe_status(status, body.trim())));
        }

        let parsed: SerperResponse = response.json().await.map_err(|e| {
            NewsAgentError::Retrieval(format!("failed to parse search response: {e}"))
        })?;

        Ok(WebResults {
            answer: parsed.answer_box.and_then(|b| b.answer.or(b.snippet)),
            items: parsed
                .organic
                .into_iter()
                .map(|o| WebResultItem {
                    title: o.title,
                    link: o.link,
                    snippet: o.snippet,
                })
                .collect(),
        })
    }
}

fn describe_status(status: StatusCode, body: &str) -> String {
    let reason = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "authentication rejected",
        StatusCode::TOO_MANY_REQUESTS => "quota exceeded",
        s if s.is_server_error() => "provider unavailable",
        _ => "request rejected",
    };
    if body.is_empty() {
        format!("{reason} (HTTP {status})")
    } else {
        format!("{reason} (HTTP {status}): {body}")
    }
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// How a web lookup went, before it is flattened to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebOutcome {
    Found(String),
    Empty,
    Error(String),
}

/// Web search under the web-search rate limit.
pub struct WebRetriever {
    search: Arc<dyn WebSearch>,
    limiter: Arc<RateLimiter>,
}

impl WebRetriever {
    pub fn new(search: Arc<dyn WebSearch>, limiter: Arc<RateLimiter>) -> Self {
        Self { search, limiter }
    }

    #[instrument(skip_all, fields(query = %truncate_chars(query, 50)))]
    pub async fn lookup(&self, query: &str) -> WebOutcome {
        self.limiter.wait_if_needed(ServiceId::WebSearch).await;
        let issued = SearchQuery::now(query);
        debug!(issued_at = %issued.issued_at, "issuing web search");

        match self.search.search(&issued.text).await {
            Ok(results) if results.is_empty() => {
                info!("web search returned no results");
                WebOutcome::Empty
            }
            Ok(results) => {
                info!(results = results.items.len(), "web search completed");
                WebOutcome::Found(results.to_text())
            }
            Err(e) => {
                warn!(error = %e, "web search failed");
                WebOutcome::Error(e.to_string())
            }
        }
    }

    /// Tool-boundary search: always returns text.
    pub async fn retrieve(&self, query: &str) -> String {
        match self.lookup(query).await {
            WebOutcome::Found(text) => text,
            WebOutcome::Empty => format!("No web results found for: {query}"),
            WebOutcome::Error(message) => format!("Web search error: {message}"),
        }
    }
}
