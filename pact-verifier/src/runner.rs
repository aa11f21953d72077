//! Runs a single interaction against the provider.

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelSignal;
use crate::contract::{Interaction, Request};
use crate::error::InteractionError;
use crate::generators::{generate_request, generate_response};
use crate::matching::{MatchResult, Mismatch, MismatchKind, match_response};
use crate::provider::{ProviderClient, ProviderRequest, RequestFilter, apply_filters};
use crate::state::{LifecycleEvent, StateCoordinator, StateSession};

/// Step of the interaction lifecycle at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Before-each hook
    BeforeEach,
    /// Provider state setup
    StateSetup,
    /// Generator evaluation
    Generators,
    /// Sending the request or reading the response
    Request,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeforeEach => "beforeEach",
            Self::StateSetup => "stateSetup",
            Self::Generators => "generators",
            Self::Request => "request",
        };
        f.write_str(name)
    }
}

/// Why an interaction failed before its response could be matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    /// Step that failed
    pub step: Step,
    /// Classification of the error, see [`InteractionError::kind`]
    pub kind: &'static str,
    /// Error message
    pub message: String,
    #[serde(skip)]
    error: InteractionError,
}

impl StepFailure {
    fn new(step: Step, error: InteractionError) -> Self {
        Self {
            step,
            kind: error.kind(),
            message: error.to_string(),
            error,
        }
    }

    /// The underlying error.
    #[must_use]
    pub const fn error(&self) -> &InteractionError {
        &self.error
    }
}

/// Outcome of one interaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionResult {
    /// Interaction description
    pub description: String,
    /// Provider state names
    pub states: Vec<String>,
    /// Response mismatches, or the single step error
    pub mismatches: Vec<Mismatch>,
    /// Set when the interaction failed before matching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    /// Teardown and after-each failures; reported, never fail the interaction
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teardown_errors: Vec<String>,
    /// Ordered lifecycle events
    pub events: Vec<LifecycleEvent>,
    /// Wall time
    #[serde(serialize_with = "as_millis")]
    pub duration: Duration,
    /// Failures of pending interactions do not fail the run
    pub pending: bool,
}

impl InteractionResult {
    /// Whether the response matched and no step failed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failure.is_none() && self.mismatches.is_empty()
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Executes interactions: states, request, matching, teardown.
#[derive(Clone)]
pub struct InteractionRunner {
    client: ProviderClient,
    coordinator: StateCoordinator,
    filters: Arc<[RequestFilter]>,
    cancel: CancelSignal,
}

impl fmt::Debug for InteractionRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionRunner")
            .field("provider", &self.client.base_url().as_str())
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

impl InteractionRunner {
    /// Create a runner.
    #[must_use]
    pub fn new(
        client: ProviderClient,
        coordinator: StateCoordinator,
        filters: Arc<[RequestFilter]>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            client,
            coordinator,
            filters,
            cancel,
        }
    }

    /// Verify one interaction.
    ///
    /// Teardown and the after-each hook always run once before-each has
    /// been attempted, whatever happened in between.
    #[instrument(skip_all, fields(interaction = %interaction.description))]
    pub async fn run(&self, interaction: &Interaction) -> InteractionResult {
        let started = Instant::now();
        let mut events = Vec::new();
        let mut session = StateSession::default();

        let outcome = self.exercise(interaction, &mut session, &mut events).await;

        let mut teardown_errors = self.coordinator.teardown(&mut session, &mut events).await;
        if let Err(e) = self.coordinator.after_each(&mut events).await {
            warn!(error = %e, "After-each hook failed");
            teardown_errors.push(e.to_string());
        }

        let (mismatches, failure) = match outcome {
            Ok(result) => (result.mismatches, None),
            Err(failure) => {
                let mismatch = Mismatch::at(MismatchKind::VerificationError, failure.step.to_string(), &failure.message);
                (vec![mismatch], Some(failure))
            }
        };

        let result = InteractionResult {
            description: interaction.description.clone(),
            states: interaction.provider_states.iter().map(|s| s.name.clone()).collect(),
            mismatches,
            failure,
            teardown_errors,
            events,
            duration: started.elapsed(),
            pending: interaction.pending,
        };

        if result.passed() {
            info!(elapsed_ms = %result.duration.as_millis(), "Interaction verified");
        } else {
            info!(
                mismatches = result.mismatches.len(),
                failed_step = ?result.failure.as_ref().map(|f| f.step),
                "Interaction failed verification"
            );
        }
        result
    }

    async fn exercise(
        &self,
        interaction: &Interaction,
        session: &mut StateSession,
        events: &mut Vec<LifecycleEvent>,
    ) -> Result<MatchResult, StepFailure> {
        self.coordinator
            .before_each(events)
            .await
            .map_err(|e| StepFailure::new(Step::BeforeEach, e))?;

        let context = self
            .coordinator
            .setup(&interaction.provider_states, session, events)
            .await
            .map_err(|e| StepFailure::new(Step::StateSetup, e))?;

        let request = generate_request(&interaction.request, &context)
            .map_err(|e| StepFailure::new(Step::Generators, e.into()))?;
        let request = apply_filters(&self.filters, to_provider_request(&request));

        events.push(LifecycleEvent::RequestSent {
            method: request.method.clone(),
            path: request.path.clone(),
        });
        let response = self
            .client
            .send(&request, &self.cancel)
            .await
            .map_err(|e| StepFailure::new(Step::Request, e.into()))?;
        events.push(LifecycleEvent::ResponseReceived {
            status: response.status,
        });

        let expected = generate_response(&interaction.response, &context)
            .map_err(|e| StepFailure::new(Step::Generators, e.into()))?;
        let result = match_response(&expected, &response);
        debug!(mismatches = result.mismatches.len(), "Response matched");
        Ok(result)
    }
}

/// Build the literal request from the (generated) contract request.
#[must_use]
pub fn to_provider_request(request: &Request) -> ProviderRequest {
    let mut provider_request = ProviderRequest {
        method: request.method.clone(),
        path: request.path.clone(),
        query: request.query.clone(),
        headers: request.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        body: None,
    };

    if let Some(body) = &request.body {
        let bytes = match body {
            serde_json::Value::String(text) if !request.is_json() => text.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        };
        if request.header("Content-Type").is_none() && request.is_json() {
            provider_request.insert_header("Content-Type", "application/json");
        }
        provider_request.body = Some(bytes);
    }
    provider_request
}
