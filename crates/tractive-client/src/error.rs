//! Client error types.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The server rejected the credentials or the bearer token (HTTP 401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The server rejected the request as malformed (HTTP 400). Never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Rate limiting persisted through every allowed retry (HTTP 429).
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded {
        /// Total number of requests issued, including the first.
        attempts: u32,
    },

    /// The event channel session died and will not recover on its own.
    #[error("channel disconnected: {0}")]
    Disconnected(String),

    /// Server returned a non-2xx status not covered by a more specific variant.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// HTTP transport failed (connect, TLS, read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing failed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Streaming body failed mid-read.
    #[error("stream error: {0}")]
    Stream(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Map a non-2xx HTTP status to the matching error variant.
    ///
    /// 429 is not mapped here: rate limiting is handled by the retry loop and
    /// only becomes [`Error::RateLimitExceeded`] once retries are exhausted.
    pub(crate) fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => Error::BadRequest(message),
            401 | 403 => Error::Unauthorized(message),
            404 => Error::NotFound(message),
            _ => Error::Api { status, message },
        }
    }

    /// Check if this is an authentication error.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if this is an exhausted rate limit.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimitExceeded { .. })
    }

    /// Check if this is a dead channel session.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Error::Disconnected(_))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
