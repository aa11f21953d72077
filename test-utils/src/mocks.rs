//! Recording mocks.
//!
//! State handlers and hooks under test push what they saw into a
//! [`CallRecorder`]; tests then assert on the order of calls.

use std::sync::Arc;
use tokio::sync::RwLock;

/// Records calls in the order they happen. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    calls: Arc<RwLock<Vec<String>>>,
}

impl CallRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call.
    pub async fn record(&self, call: impl Into<String>) {
        self.calls.write().await.push(call.into());
    }

    /// All calls so far.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// Number of calls so far.
    pub async fn count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Position of the first call equal to `call`.
    pub async fn position(&self, call: &str) -> Option<usize> {
        self.calls.read().await.iter().position(|c| c == call)
    }

    /// Forget all calls.
    pub async fn clear(&self) {
        self.calls.write().await.clear();
    }
}
