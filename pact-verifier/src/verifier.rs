//! Verification orchestration.
//!
//! Loads contracts, runs their interactions against the provider and
//! aggregates the results. Interactions of one contract run sequentially;
//! contracts run with bounded concurrency.

use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::cancel::CancelHandle;
use crate::config::{ENV_BROKER_BASE_URL, VerifierConfig};
use crate::error::{ConfigError, VerifierError};
use crate::loader::{ContractLoader, LoadedContract, PactSource};
use crate::provider::{ProviderClient, ProviderRequest, RequestFilter};
use crate::reporter::{ConsoleReporter, ContractResult, PublishDetails, VerificationOutcome, publish};
use crate::runner::InteractionRunner;
use crate::state::{StateCoordinator, StateHandlers};

/// Verifies a provider against its contracts.
///
/// # Examples
///
/// ```no_run
/// use pact_verifier::{PactSource, StateHandlers, Verifier, VerifierConfig};
/// use serde_json::Map;
///
/// # async fn run() -> Result<(), pact_verifier::VerifierError> {
/// let config = VerifierConfig::new("users", "http://localhost:8080".parse().unwrap());
/// let handlers = StateHandlers::new().with_handler("user 1 exists", |_setup, _state| async {
///     Ok(Map::new())
/// });
/// let outcome = Verifier::new(config)
///     .with_state_handlers(handlers)
///     .verify(&[PactSource::Dir("pacts".into())])
///     .await?;
/// assert!(outcome.local_pass);
/// # Ok(())
/// # }
/// ```
pub struct Verifier {
    config: VerifierConfig,
    handlers: Arc<StateHandlers>,
    filters: Vec<RequestFilter>,
    cancel: CancelHandle,
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("filters", &self.filters.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Verifier {
    /// Verifier with no state handlers and no request filters.
    #[must_use]
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(StateHandlers::new()),
            filters: Vec::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Register provider state handlers and hooks.
    #[must_use]
    pub fn with_state_handlers(mut self, handlers: StateHandlers) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Append a request filter. Filters run in registration order.
    #[must_use]
    pub fn with_request_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(ProviderRequest) -> ProviderRequest + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Use an externally owned cancellation handle.
    #[must_use]
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that cancels the run.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Load contracts from `sources` and verify them.
    ///
    /// Results are published afterwards when configured; a publish failure
    /// is recorded in the outcome and leaves the local verdict alone.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError`] for invalid configuration and contracts
    /// that cannot be loaded. Interaction failures are results, not errors.
    #[instrument(skip_all, fields(provider = %self.config.provider_name))]
    pub async fn verify(&self, sources: &[PactSource]) -> Result<VerificationOutcome, VerifierError> {
        self.config.validate()?;
        if self.config.broker.is_none() && sources.iter().any(|s| matches!(s, PactSource::Broker(_))) {
            return Err(ConfigError::Missing(ENV_BROKER_BASE_URL).into());
        }

        let loader = ContractLoader::new(&self.config)?;
        let contracts = loader.load(sources).await?;

        let client = ProviderClient::new(self.config.provider_base_url.clone(), &self.config.provider_http())?;
        let runner = InteractionRunner::new(
            client,
            StateCoordinator::new(Arc::clone(&self.handlers)),
            Arc::from(self.filters.clone()),
            self.cancel.signal(),
        );

        info!(
            contracts = contracts.len(),
            concurrency = self.config.max_concurrent_contracts,
            "Starting verification"
        );
        let results: Vec<ContractResult> = stream::iter(contracts)
            .map(|loaded| self.verify_contract(&runner, loaded))
            .buffer_unordered(self.config.max_concurrent_contracts)
            .collect()
            .await;

        let mut outcome = VerificationOutcome::from_results(
            results,
            self.config.empty_contract_policy,
            self.cancel.is_cancelled(),
        );
        info!(
            passed = outcome.local_pass,
            interactions = outcome.interaction_count(),
            failures = outcome.failure_count(),
            skipped = outcome.skipped,
            "Verification finished"
        );

        if self.config.publish_results {
            self.publish(&mut outcome, &loader).await;
        }
        Ok(outcome)
    }

    async fn verify_contract(&self, runner: &InteractionRunner, loaded: LoadedContract) -> ContractResult {
        let LoadedContract {
            contract,
            source,
            pending,
            publish_url,
        } = loaded;

        let mut interactions = Vec::new();
        let mut skipped = 0;
        for interaction in contract.interactions.iter().filter(|i| self.config.filter.matches(i)) {
            if self.cancel.is_cancelled() {
                skipped += 1;
                continue;
            }
            interactions.push(runner.run(interaction).await);
        }
        if skipped > 0 {
            warn!(consumer = %contract.consumer.name, skipped, "Run cancelled; interactions skipped");
        }

        ContractResult {
            consumer: contract.consumer.name,
            provider: contract.provider.name,
            source,
            pending,
            publish_url,
            interactions,
            skipped,
        }
    }

    async fn publish(&self, outcome: &mut VerificationOutcome, loader: &ContractLoader) {
        let (Some(broker), Some(version)) = (loader.broker(), &self.config.provider_version) else {
            warn!("Publishing requested without a broker and provider version; skipping");
            return;
        };
        let details = PublishDetails {
            provider: self.config.provider_name.clone(),
            version: version.clone(),
            branch: self.config.provider_branch.clone(),
            tags: self.config.provider_tags.clone(),
        };
        publish(outcome, broker, &details).await;
        if let Some(error) = &outcome.publish_error {
            warn!(error = %error, "Publishing verification results failed");
        }
    }

    /// Render an outcome for the console, coloured per configuration.
    #[must_use]
    pub fn render(&self, outcome: &VerificationOutcome) -> String {
        ConsoleReporter::new(self.config.color).render(outcome)
    }
}
