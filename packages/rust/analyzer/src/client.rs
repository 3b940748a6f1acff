//! Chat-completions client for the extraction model.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use paperagent_shared::{AnalysisConfig, PaperAgentError, Result};

const USER_AGENT: &str = concat!("paper-agent/", env!("CARGO_PKG_VERSION"));

const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Anything that can answer a single-turn prompt with text.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Send `prompt` and return the model's reply.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Model identifier recorded in analysis results.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

/// Client for an OpenAI-compatible `/chat/completions` endpoint (OpenRouter by default).
pub struct ChatClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
    backoff: Duration,
}

impl ChatClient {
    pub fn new(config: &AnalysisConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaperAgentError::Environment(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_retries: config.max_retries.max(1),
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Override the base retry delay (doubles per attempt).
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    async fn complete_once(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let msg = format!("chat request: {e}");
                if e.is_timeout() || e.is_connect() {
                    PaperAgentError::retryable(msg)
                } else {
                    PaperAgentError::upstream(msg)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(PaperAgentError::retryable(format!(
                "chat request: HTTP {status} {detail}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PaperAgentError::upstream(format!("chat response body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PaperAgentError::upstream("chat response has no content"))
    }
}

#[async_trait]
impl ReasoningService for ChatClient {
    /// Every failure is retried, up to `max_retries` attempts in total.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.complete_once(prompt).await {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "model replied");
                    return Ok(text);
                }
                Err(e) if attempt < self.max_retries => {
                    let wait = self.backoff * 2u32.pow(attempt - 1);
                    warn!(attempt, ?wait, error = %e, "chat request failed, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
