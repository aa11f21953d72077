//! Error types for outbound HTTP calls.
//!
//! Every error coming out of the shared HTTP helpers is classified as either
//! retryable or not, so callers (the broker client in particular) can decide
//! whether a failed call is worth another attempt.

use thiserror::Error;

/// Error raised by the shared HTTP plumbing.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The request could not be sent or the response could not be read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the JSON we expected
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote side is unreachable or answered with a 5xx
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Credentials were missing or rejected (401/403)
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Too many requests (429)
    #[error("Rate limited")]
    RateLimited,

    /// Any other non-success status
    #[error("Unexpected status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// Invalid input provided by the caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The call did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl PlatformError {
    /// Check if this error is retryable.
    ///
    /// Retryable errors are transient failures that may succeed on retry,
    /// such as connection failures, rate limiting, or temporary unavailability.
    ///
    /// # Examples
    ///
    /// ```
    /// use verifier_common::PlatformError;
    ///
    /// let err = PlatformError::RateLimited;
    /// assert!(err.is_retryable());
    ///
    /// let err = PlatformError::NotFound("pact".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::RateLimited | Self::Timeout(_) => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Classify a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::AuthFailed(format!("status {status}: {body}")),
            404 => Self::NotFound(body),
            429 => Self::RateLimited,
            s if s >= 500 => Self::Unavailable(format!("status {status}: {body}")),
            _ => Self::Status { status, body },
        }
    }

    /// Classify a transport-level reqwest failure.
    #[must_use]
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Http(err)
        }
    }

    /// Create an unavailable error with the given message.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an invalid input error with the given message.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
