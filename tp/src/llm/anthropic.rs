//! Anthropic Messages API client

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StopReason, TokenUsage};
use crate::config::LlmConfig;

const API_VERSION: &str = "2023-06-01";

/// Transport-level attempts per completion; delegate retries sit on top
const MAX_ATTEMPTS: u32 = 3;

const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Longest server-requested wait we honor before giving up
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl AnthropicClient {
    /// Build a client; the API key comes from the variable named in config
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, base_url = %config.base_url, "AnthropicClient::from_config: called");
        let api_key = config
            .get_api_key()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
        })
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "system": request.system_prompt,
            "messages": messages,
        })
    }

    /// One HTTP round trip, no retries
    async fn send_once(&self, body: &serde_json::Value) -> Result<CompletionResponse, LlmError> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(BASE_BACKOFF);
            return Err(LlmError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let reply: MessagesReply = response.json().await?;
        Ok(reply.into_response())
    }
}

/// Wait before attempt `attempt + 1`, or `None` to stop retrying
fn backoff(err: &LlmError, attempt: u32) -> Option<Duration> {
    if attempt >= MAX_ATTEMPTS || !err.is_unavailable() {
        return None;
    }
    match err {
        LlmError::RateLimited { retry_after } if *retry_after > MAX_RATE_LIMIT_WAIT => None,
        LlmError::RateLimited { retry_after } => Some(*retry_after),
        _ => Some(BASE_BACKOFF * 2u32.pow(attempt - 1)),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(model = %self.model, messages = request.messages.len(), "AnthropicClient::complete: called");
        if request.messages.is_empty() {
            return Err(LlmError::InvalidRequest("completion request has no messages".to_string()));
        }

        let body = self.body(&request);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&body).await {
                Ok(response) => return Ok(response),
                Err(err) => match backoff(&err, attempt) {
                    Some(wait) => {
                        warn!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "AnthropicClient::complete: retrying");
                        tokio::time::sleep(wait).await;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl MessagesReply {
    fn into_response(self) -> CompletionResponse {
        let text: String = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();
        CompletionResponse {
            content: (!text.is_empty()).then_some(text),
            stop_reason: self
                .stop_reason
                .as_deref()
                .map(StopReason::from_anthropic)
                .unwrap_or(StopReason::EndTurn),
            usage: TokenUsage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
            },
        }
    }
}
