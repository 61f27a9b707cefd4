//! Embedding service client and vector similarity.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use newsagent_shared::{AppConfig, NewsAgentError, Result, read_secret};

/// User-Agent string for outbound API requests.
pub(crate) const USER_AGENT: &str = concat!("newsagent/", env!("CARGO_PKG_VERSION"));

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Model identifier, recorded in the index metadata.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Gemini embeddings
// ---------------------------------------------------------------------------

/// Google Generative Language `embedContent` client.
pub struct GeminiEmbedder {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(api_key: String, base_url: &Url, model: String, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(NewsAgentError::config("missing embedding API key"));
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| NewsAgentError::Network(format!("failed to build HTTP client: {e}")))?;
        let endpoint = base_url
            .join(&format!("v1beta/models/{model}:embedContent"))
            .map_err(|e| NewsAgentError::config(format!("invalid embedding endpoint: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
        })
    }

    /// Build from config, reading the key from the generation key env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let env_var = &config.generation.api_key_env;
        let api_key = read_secret(env_var).ok_or_else(|| {
            NewsAgentError::config(format!(
                "embedding API key not found. Set the {env_var} environment variable."
            ))
        })?;
        Self::new(
            api_key,
            &config.generation.base_url,
            config.embedding.model.clone(),
            Duration::from_secs(config.generation.timeout_secs),
        )
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedPart<'a>; 1],
}

#[derive(Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: [EmbedPart { text }],
            },
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| NewsAgentError::Retrieval(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NewsAgentError::Retrieval(format!(
                "embedding service returned HTTP {status}: {}",
                body.trim()
            )));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            NewsAgentError::Retrieval(format!("failed to parse embedding response: {e}"))
        })?;
        if parsed.embedding.values.is_empty() {
            return Err(NewsAgentError::Retrieval(
                "embedding service returned an empty vector".into(),
            ));
        }
        debug!(dims = parsed.embedding.values.len(), "embedded text");
        Ok(parsed.embedding.values)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Cosine similarity of two equal-length vectors. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if score.is_finite() { score } else { 0.0 }
}
