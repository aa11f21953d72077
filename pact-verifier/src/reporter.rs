//! Aggregation, console rendering and publication of verification results.

use serde::Serialize;
use std::fmt::Write as _;
use tracing::{info, instrument, warn};
use url::Url;

use crate::broker::BrokerClient;
use crate::error::PublishError;
use crate::matching::Mismatch;
use crate::runner::InteractionResult;

/// Verdict when nothing was verified (no contracts or no interactions).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyContractPolicy {
    /// Pass, with a warning
    #[default]
    Pass,
    /// Fail the run
    Fail,
}

/// Results of one contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractResult {
    /// Consumer name
    pub consumer: String,
    /// Provider name
    pub provider: String,
    /// Where the contract was loaded from
    pub source: String,
    /// Broker flagged the contract as pending
    pub pending: bool,
    /// Broker link for publishing results, absent for local files
    #[serde(skip)]
    pub publish_url: Option<Url>,
    /// Per-interaction results, in contract order
    pub interactions: Vec<InteractionResult>,
    /// Interactions not run because the run was cancelled
    pub skipped: usize,
}

impl ContractResult {
    /// `consumer -> provider` label.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} -> {}", self.consumer, self.provider)
    }

    /// Whether every interaction passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.interactions.iter().all(InteractionResult::passed)
    }

    /// Failures that count against the verdict.
    pub fn blocking_failures(&self) -> impl Iterator<Item = &InteractionResult> {
        self.interactions
            .iter()
            .filter(move |r| !r.passed() && !self.pending && !r.pending)
    }

    /// Failures reported as warnings only.
    pub fn pending_failures(&self) -> impl Iterator<Item = &InteractionResult> {
        self.interactions
            .iter()
            .filter(move |r| !r.passed() && (self.pending || r.pending))
    }

    /// Broker verification result document.
    #[must_use]
    pub fn to_broker_result(&self, provider_version: &str) -> VerificationResultBody {
        VerificationResultBody {
            success: self.all_passed() && self.skipped == 0,
            provider_application_version: provider_version.to_string(),
            verified_by: VerifiedBy::default(),
            test_results: self
                .interactions
                .iter()
                .map(|r| TestResult {
                    interaction_description: r.description.clone(),
                    success: r.passed(),
                    mismatches: r.mismatches.clone(),
                })
                .collect(),
        }
    }
}

/// Verification result as posted to the broker.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResultBody {
    /// Whether the contract verified
    pub success: bool,
    /// Provider version the results are for
    pub provider_application_version: String,
    /// Tool that produced the results
    pub verified_by: VerifiedBy,
    /// Per-interaction results
    pub test_results: Vec<TestResult>,
}

/// Tool identification in a broker result.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerifiedBy {
    /// Implementation name
    pub implementation: String,
    /// Implementation version
    pub version: String,
}

impl Default for VerifiedBy {
    fn default() -> Self {
        Self {
            implementation: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One interaction in a broker result.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Interaction description
    pub interaction_description: String,
    /// Whether it passed
    pub success: bool,
    /// Mismatches, empty on success
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<Mismatch>,
}

/// Aggregate outcome of a verification run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    /// Per-contract results, sorted by consumer, provider and source
    pub contracts: Vec<ContractResult>,
    /// Local verdict; publishing never changes it
    pub local_pass: bool,
    /// Non-fatal notices (pending failures, empty runs, skipped publishes)
    pub warnings: Vec<String>,
    /// Interactions skipped because the run was cancelled
    pub skipped: usize,
    /// The run was cancelled before completion
    pub cancelled: bool,
    /// Publishing failed; kept apart from the local verdict
    #[serde(skip)]
    pub publish_error: Option<PublishError>,
}

impl VerificationOutcome {
    /// Aggregate contract results into a verdict.
    ///
    /// The verdict is the AND over all non-pending interactions. A
    /// cancelled run fails. An empty run follows `policy`.
    #[must_use]
    pub fn from_results(mut contracts: Vec<ContractResult>, policy: EmptyContractPolicy, cancelled: bool) -> Self {
        contracts.sort_by(|a, b| {
            (a.consumer.as_str(), a.provider.as_str(), a.source.as_str())
                .cmp(&(b.consumer.as_str(), b.provider.as_str(), b.source.as_str()))
        });

        let mut warnings = Vec::new();
        let mut local_pass = true;

        for contract in &contracts {
            if contract.blocking_failures().next().is_some() {
                local_pass = false;
            }
            for failure in contract.pending_failures() {
                warnings.push(format!(
                    "Pending interaction '{}' in {} failed; not failing the build",
                    failure.description,
                    contract.label()
                ));
            }
        }

        let verified: usize = contracts.iter().map(|c| c.interactions.len()).sum();
        let skipped: usize = contracts.iter().map(|c| c.skipped).sum();
        if cancelled {
            local_pass = false;
            warnings.push(format!("Verification was cancelled; {skipped} interaction(s) skipped"));
        } else if verified == 0 {
            let message = if contracts.is_empty() {
                "No contracts were found to verify"
            } else {
                "No interactions were verified"
            };
            match policy {
                EmptyContractPolicy::Pass => warnings.push(message.to_string()),
                EmptyContractPolicy::Fail => {
                    local_pass = false;
                    warnings.push(format!("{message}; failing as configured"));
                }
            }
        }

        Self {
            contracts,
            local_pass,
            warnings,
            skipped,
            cancelled,
            publish_error: None,
        }
    }

    /// Number of interactions run.
    #[must_use]
    pub fn interaction_count(&self) -> usize {
        self.contracts.iter().map(|c| c.interactions.len()).sum()
    }

    /// Number of interactions that failed, pending ones included.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.contracts
            .iter()
            .flat_map(|c| &c.interactions)
            .filter(|r| !r.passed())
            .count()
    }
}

/// What to record on the broker when publishing.
#[derive(Debug, Clone)]
pub struct PublishDetails {
    /// Provider name
    pub provider: String,
    /// Provider version
    pub version: String,
    /// Provider branch
    pub branch: Option<String>,
    /// Provider tags
    pub tags: Vec<String>,
}

/// Publish results of broker-sourced contracts.
///
/// Tags and branch are recorded first, then one result is posted per
/// contract with a publish link. Every call is attempted once; failures are
/// collected into `outcome.publish_error`. The local verdict is untouched.
#[instrument(skip_all, fields(provider = %details.provider, version = %details.version))]
pub async fn publish(outcome: &mut VerificationOutcome, broker: &BrokerClient, details: &PublishDetails) {
    if outcome.cancelled {
        outcome
            .warnings
            .push("Verification was cancelled; results were not published".to_string());
        return;
    }

    let mut errors = Vec::new();

    for tag in &details.tags {
        if let Err(error) = broker.tag_version(&details.provider, &details.version, tag).await {
            errors.push(PublishError::Tag {
                version: details.version.clone(),
                tag: tag.clone(),
                error,
            });
        }
    }
    if let Some(branch) = &details.branch {
        if let Err(error) = broker.record_branch(&details.provider, branch, &details.version).await {
            errors.push(PublishError::Branch {
                version: details.version.clone(),
                branch: branch.clone(),
                error,
            });
        }
    }

    let mut published = 0;
    for contract in &outcome.contracts {
        let Some(url) = &contract.publish_url else {
            warn!(contract = %contract.label(), source = %contract.source, "No publish link; skipping");
            outcome.warnings.push(format!(
                "Results for {} ({}) were not published: no broker publish link",
                contract.label(),
                contract.source
            ));
            continue;
        };
        let body = contract.to_broker_result(&details.version);
        match broker.publish_verification(url, &body).await {
            Ok(()) => published += 1,
            Err(error) => errors.push(PublishError::Results {
                contract: contract.label(),
                error,
            }),
        }
    }

    info!(published, failed = errors.len(), "Published verification results");
    outcome.publish_error = PublishError::collect(errors);
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Renders an outcome for humans.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
    color: bool,
}

impl ConsoleReporter {
    /// Reporter with colours on or off.
    #[must_use]
    pub const fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, colour: &str, text: &str) -> String {
        if self.color {
            format!("{colour}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    /// Render the full report.
    #[must_use]
    pub fn render(&self, outcome: &VerificationOutcome) -> String {
        let mut out = String::new();

        for contract in &outcome.contracts {
            let pending = if contract.pending { " [PENDING]" } else { "" };
            let _ = writeln!(
                out,
                "\nVerifying a pact between {} and {}{pending}\n  Source: {}",
                contract.consumer, contract.provider, contract.source
            );
            for result in &contract.interactions {
                let given = if result.states.is_empty() {
                    String::new()
                } else {
                    format!(" (given {})", result.states.join(", "))
                };
                let marker = match (result.passed(), contract.pending || result.pending) {
                    (true, _) => self.paint(GREEN, "OK"),
                    (false, true) => self.paint(YELLOW, "FAILED (pending)"),
                    (false, false) => self.paint(RED, "FAILED"),
                };
                let _ = writeln!(out, "  {}{given} ... {marker}", result.description);
                for error in &result.teardown_errors {
                    let _ = writeln!(out, "    {}", self.paint(YELLOW, &format!("warning: {error}")));
                }
            }
            if contract.skipped > 0 {
                let _ = writeln!(out, "  {} interaction(s) skipped", contract.skipped);
            }
        }

        let failures: Vec<(&ContractResult, &InteractionResult)> = outcome
            .contracts
            .iter()
            .flat_map(|c| c.interactions.iter().filter(|r| !r.passed()).map(move |r| (c, r)))
            .collect();
        if !failures.is_empty() {
            let _ = writeln!(out, "\nFailures:");
            for (n, (contract, result)) in failures.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "\n{}) Verifying a pact between {} and {} - {}",
                    n + 1,
                    contract.consumer,
                    contract.provider,
                    result.description
                );
                for (m, mismatch) in result.mismatches.iter().enumerate() {
                    let _ = writeln!(out, "    {}.{}) {}: {}", n + 1, m + 1, mismatch.path, mismatch.message);
                }
            }
        }

        for warning in &outcome.warnings {
            let _ = writeln!(out, "\n{}", self.paint(YELLOW, &format!("WARNING: {warning}")));
        }
        if let Some(error) = &outcome.publish_error {
            let _ = writeln!(out, "\n{}", self.paint(RED, &format!("Publishing failed: {error}")));
        }

        let verdict = if outcome.local_pass {
            self.paint(GREEN, "PASSED")
        } else {
            self.paint(RED, "FAILED")
        };
        let _ = writeln!(
            out,
            "\n{} interaction(s), {} failure(s), {} skipped: {verdict}",
            outcome.interaction_count(),
            outcome.failure_count(),
            outcome.skipped
        );
        out
    }
}
