//! Text-generation collaborator
//!
//! Provides the LLM client abstraction used by task delegates and topic
//! classification, plus the Anthropic implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

mod anthropic;
pub mod client;
mod error;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use error::LlmError;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, TokenUsage};

use crate::config::LlmConfig;

/// Create an LLM client based on the provider specified in config
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            Err(LlmError::InvalidRequest(format!(
                "Unknown LLM provider: '{}'. Supported: anthropic",
                other
            )))
        }
    }
}

/// Run a completion with an explicit deadline
///
/// A collaborator that does not answer within `timeout` is reported as
/// `LlmError::Timeout`, which is retryable.
pub async fn complete_within(
    llm: &dyn LlmClient,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<CompletionResponse, LlmError> {
    debug!(timeout_ms = timeout.as_millis() as u64, "complete_within: called");
    match tokio::time::timeout(timeout, llm.complete(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "complete_within: collaborator timed out");
            Err(LlmError::Timeout(timeout))
        }
    }
}

/// Run a completion and return its text, treating an empty body as invalid
pub async fn complete_text(
    llm: &dyn LlmClient,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<String, LlmError> {
    let response = complete_within(llm, request, timeout).await?;
    match response.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(LlmError::InvalidResponse("empty completion".to_string())),
    }
}

/// Pull the first JSON object out of a model reply
///
/// Models often wrap JSON in prose or a fenced block; everything between the
/// first `{` and the last `}` is taken.
pub fn extract_json(text: &str) -> Result<serde_json::Value, LlmError> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(serde_json::from_str(&text[s..=e])?),
        _ => Err(LlmError::InvalidResponse(format!(
            "expected a JSON object in reply: {}",
            text.chars().take(80).collect::<String>()
        ))),
    }
}
