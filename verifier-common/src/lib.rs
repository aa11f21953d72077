//! Shared plumbing for the pact verifier crates.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - HTTP client configuration and JSON exchange helpers
//! - Retry policies with exponential backoff
//! - Logging subscriber initialisation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod http;
pub mod logging;
pub mod retry;

pub use error::PlatformError;
pub use http::{HttpConfig, build_http_client, read_json};
pub use logging::{LogConfig, init_logging};
pub use retry::{RetryConfig, RetryPolicy, Retryable};
