use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no provider configured for {name:?}")]
    ProviderNotConfigured { name: String },
    #[error("no key pool for provider {name:?}")]
    KeyPoolNotConfigured { name: String },
    #[error("no api keys configured")]
    NoKeys,
    #[error("all keys exhausted, earliest reset in {reset_in:?}")]
    KeysExhausted { reset_in: Duration },
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl RelayError {
    /// Whether the error represents a server-side transient condition
    /// (429 or 5xx) that is worth retrying and that should put the
    /// originating API key on cooldown.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Api { status, .. } => {
                matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, RelayError::Api { status, .. } if status.as_u16() == 429)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
