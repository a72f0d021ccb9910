//! Upstream API error types.

use std::time::Duration;

use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur when querying the upstream API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Upstream signalled that the point budget is exhausted.
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// Non-success HTTP status other than 429.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] HttpError),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// The response decoded but violated the data model.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl ApiError {
    /// Check if this error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-suggested wait before retrying, if any.
    #[inline]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Extract a short error message suitable for display.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
