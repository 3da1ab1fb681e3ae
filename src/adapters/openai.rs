//! OpenAI-compatible chat completions adapter.
//!
//! Sends the rendered prompt as a single user message and classifies every
//! failure into the [`ModelError`] taxonomy so the refinement client can
//! decide whether to retry.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LanguageModel, ModelError, ModelRequest};

/// Default API root (the adapter appends `/chat/completions`)
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const SYSTEM_PROMPT: &str = "You are the world's best technical product manager. \
Be precise, outcome-focused, and concise. Do not invent facts; if information is missing, \
raise pointed questions. Respond in UK English.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

/// Chat completions client
pub struct OpenAiAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiAdapter {
    /// Create an adapter with an explicit key, API root and request timeout
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into(),
        })
    }

    /// Create an adapter reading the key from `OPENAI_API_KEY`
    pub fn from_env(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty());
        Self::new(api_key, base_url, request_timeout)
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Map a non-success HTTP status to the failure taxonomy
fn classify_status(status: StatusCode, body: &str, retry_after: Option<Duration>) -> ModelError {
    let detail = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let message = format!("HTTP {}: {}", status.as_u16(), detail);

    match status {
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited {
            message,
            retry_after,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT => ModelError::Transient(message),
        s if s.is_server_error() => ModelError::Transient(message),
        _ => ModelError::Permanent(message),
    }
}

fn classify_send_error(err: &reqwest::Error) -> ModelError {
    if err.is_builder() {
        ModelError::Permanent(format!("invalid request: {}", err))
    } else {
        // Timeouts and connection failures
        ModelError::Transient(format!("request failed: {}", err))
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl LanguageModel for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::Permanent(format!("{} not set", API_KEY_ENV)))?;

        let body = ChatRequest {
            model: &request.params.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Transient(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "Model request rejected");
            return Err(classify_status(status, &text, retry_after));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ModelError::Permanent(format!("malformed response body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ModelError::Permanent("response contained no content".to_string()))
    }
}
