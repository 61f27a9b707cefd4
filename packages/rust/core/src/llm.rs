//! Text-completion boundary and the Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use newsagent_shared::{AppConfig, GenerationConfig, NewsAgentError, Result, read_secret};

const USER_AGENT: &str = concat!("newsagent/", env!("CARGO_PKG_VERSION"));

/// Sampling options passed with every prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// In `[0, 1]`.
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            max_output_tokens: 1000,
        }
    }
}

impl From<&GenerationConfig> for GenerationOptions {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub options: GenerationOptions,
}

/// Opaque text completion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    client: Client,
    endpoint: Url,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    contents: [Content<'a>; 1],
    generation_config: WireOptions,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOptions {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: &Url, model: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(NewsAgentError::config("missing generation API key"));
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| NewsAgentError::Network(format!("failed to build HTTP client: {e}")))?;
        let endpoint = base_url
            .join(&format!("v1beta/models/{model}:generateContent"))
            .map_err(|e| NewsAgentError::config(format!("invalid generation endpoint: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let env_var = &config.generation.api_key_env;
        let api_key = read_secret(env_var).ok_or_else(|| {
            NewsAgentError::config(format!(
                "generation API key not found. Set the {env_var} environment variable."
            ))
        })?;
        Self::new(
            api_key,
            &config.generation.base_url,
            &config.generation.model,
            Duration::from_secs(config.generation.timeout_secs),
        )
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateBody {
            contents: [Content {
                role: "user",
                parts: [Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: WireOptions {
                temperature: request.options.temperature,
                max_output_tokens: request.options.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NewsAgentError::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NewsAgentError::Generation(format!(
                "provider returned HTTP {status}: {}",
                body.trim()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| NewsAgentError::Generation(format!("failed to parse response: {e}")))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .ok_or_else(|| NewsAgentError::Generation("response contained no candidates".into()))?;

        debug!(chars = text.len(), "generation complete");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GeminiClient {
        let base = Url::parse(&server.uri()).unwrap();
        GeminiClient::new("g-key".into(), &base, "gemini-1.5-flash", Duration::from_secs(5)).unwrap()
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.into(),
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn generate_joins_candidate_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{ "role": "user", "parts": [{ "text": "hello" }] }],
                "generationConfig": { "temperature": 0.5, "maxOutputTokens": 1000 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": "Final " }, { "text": "Answer: hi" }] } }]
            })))
            .mount(&server)
            .await;

        let text = client(&server).generate(&request("hello")).await.unwrap();
        assert_eq!(text, "Final Answer: hi");
    }

    #[tokio::test]
    async fn non_success_status_is_a_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("RESOURCE_EXHAUSTED"))
            .mount(&server)
            .await;

        let err = client(&server).generate(&request("x")).await.unwrap_err();
        assert!(matches!(err, NewsAgentError::Generation(_)));
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("RESOURCE_EXHAUSTED"));
    }

    #[tokio::test]
    async fn empty_candidates_are_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = client(&server).generate(&request("x")).await.unwrap_err();
        assert!(err.to_string().contains("no candidates"));
    }

    #[test]
    fn blank_key_is_rejected() {
        let base = Url::parse("http://localhost").unwrap();
        assert!(GeminiClient::new("  ".into(), &base, "m", Duration::from_secs(1)).is_err());
    }
}
