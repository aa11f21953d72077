//! Shared test utilities for the verifier crates.
//!
//! This crate provides:
//! - Proptest generators for JSON documents
//! - Recording mocks for provider state handlers and hooks
//! - Pact fixtures and a small pact document builder

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
