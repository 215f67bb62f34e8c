//! Unified error handling for calls against the scan backend.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Error body returned by the backend (`{"detail": "..."}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorBody {
    /// Decode an error body, falling back to the raw text when it is not JSON.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(raw) {
            Ok(body) => body,
            Err(_) => {
                let trimmed = raw.trim();
                Self {
                    detail: (!trimmed.is_empty()).then(|| trimmed.to_string()),
                }
            }
        }
    }

    /// Detail message or the given fallback.
    pub fn message_or(&self, fallback: &str) -> String {
        self.detail.clone().unwrap_or_else(|| fallback.to_string())
    }
}

/// Client error type mapping backend responses and transport failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request failed with status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

impl ClientError {
    /// Build an error from a non-success status and its raw body.
    pub fn from_status(status: StatusCode, raw_body: &str) -> Self {
        let body = ErrorBody::parse(raw_body);
        match status {
            StatusCode::NOT_FOUND => Self::NotFound(body.message_or("Scan not found")),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::Validation(body.message_or("Invalid request"))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                Self::RateLimited(body.message_or("Too many scans, try again later"))
            }
            other => Self::Status {
                status: other.as_u16(),
                detail: body.message_or("Unknown error"),
            },
        }
    }

    /// Check if this error represents a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Transport hiccups and server-side 5xx are worth another poll.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Message suitable for the user-facing transcript.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::RateLimited(msg)
            | Self::InvalidTransition(msg) => msg.clone(),
            Self::Status { detail, .. } => detail.clone(),
            Self::Transport(_) => "Could not reach the scan service".to_string(),
            Self::Decode(_) => "Unexpected response from the scan service".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
