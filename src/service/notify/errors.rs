use strum_macros::IntoStaticStr;
use thiserror::Error;

/// A notification channel failed to deliver an alert. Failures are isolated
/// per channel and surfaced through counters.
#[derive(Debug, Error, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelError {
    #[error("HTTP delivery failed: {0}")]
    Http(String),

    #[error("invalid mail address: {0}")]
    InvalidAddress(String),

    #[error("channel is not properly configured")]
    NotConfigured,

    #[error("delivery rejected with status {0}")]
    Rejected(u16),

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),
}

impl ChannelError {
    /// Stable label value for the failure counter.
    pub fn class(&self) -> &'static str {
        self.into()
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(error: reqwest::Error) -> Self {
        ChannelError::Http(error.to_string())
    }
}
