//! LLM error types
//!
//! Callers mostly care about one distinction: is the collaborator down (try
//! again later) or was the request itself wrong (fix it first).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The model answered, but not in a shape we can use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No answer within {0:?}")]
    Timeout(Duration),

    #[error("Malformed JSON in reply: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// The collaborator could not be reached or refused for load reasons
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The reply arrived but could not be used; asking again may help
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::InvalidResponse(_) | Self::Json(_))
    }

    /// Whether another attempt with the same request can succeed
    pub fn is_retryable(&self) -> bool {
        self.is_unavailable() || self.is_malformed()
    }
}
