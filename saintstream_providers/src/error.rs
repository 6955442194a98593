use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed stream payload: {0}")]
    Payload(String),

    #[error("completion service error: {0}")]
    Remote(String),
}

impl ProviderError {
    /// Transport failures, rate limiting and server errors are worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Payload(_) | Self::Remote(_) => false,
        }
    }
}
