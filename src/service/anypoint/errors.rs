use serde::Serialize;
use strum_macros::IntoStaticStr;
use thiserror::Error;

/// Errors from calls against the Anypoint Platform APIs.
#[derive(Debug, Error, IntoStaticStr, Serialize)]
#[serde(tag = "error", content = "details", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApiError {
    /// Upstream rejected our credentials (4xx on an auth endpoint). Never
    /// retried; clears the token cache.
    #[error("authentication rejected with status {status}")]
    AuthFailed { status: u16 },

    #[error("invalid response body: {0}")]
    Decode(String),

    /// The destination vanished between enumeration and the stats fetch.
    #[error("entity not found")]
    NotFound,

    #[error("no authentication method configured")]
    NotConfigured,

    /// Connection failures and timeouts. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned status {status} during {operation}")]
    Upstream { status: u16, operation: &'static str },
}

impl ApiError {
    /// Retry on all 5xx, on 429 and on transport errors; never on other 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ApiError::Decode(error.to_string())
        } else {
            ApiError::Transport(error.to_string())
        }
    }
}
