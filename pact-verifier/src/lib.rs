//! Provider-side verification of consumer-driven pact contracts.
//!
//! Loads pacts from files, URLs or a pact broker, replays every interaction
//! against a running provider, matches the responses under the pact's
//! matching rules and reports (and optionally publishes) the results.
//!
//! - [`loader`] / [`parser`]: pact V2, V3 and V4 documents into [`Contract`]s
//! - [`matching`]: the rule-driven matcher engine
//! - [`state`]: provider state handlers and lifecycle hooks
//! - [`runner`]: one interaction, end to end
//! - [`reporter`] / [`broker`]: verdict, console output, publication
//! - [`verifier`]: orchestration with bounded concurrency and cancellation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod cancel;
pub mod config;
pub mod contract;
pub mod error;
pub mod generators;
pub mod loader;
pub mod matching;
pub mod parser;
pub mod provider;
pub mod reporter;
pub mod runner;
pub mod state;
pub mod time_format;
pub mod verifier;

pub use broker::{BrokerClient, ConsumerVersionSelector, PactsForVerificationRequest};
pub use cancel::{CancelHandle, CancelSignal};
pub use config::{BrokerAuth, BrokerConfig, InteractionFilter, VerifierConfig};
pub use contract::{Contract, Interaction, Participant, ProviderState, Request, Response, SpecVersion};
pub use error::{
    BrokerError, ConfigError, GeneratorError, InteractionError, LoadError, PublishError, TransportError, VerifierError,
};
pub use generators::{Generator, GeneratorContext, Generators};
pub use loader::{BrokerSource, ContractLoader, LoadedContract, PactSource};
pub use matching::{MatchResult, MatchRule, MatchingRules, Mismatch, MismatchKind, match_body, match_response};
pub use parser::{parse_pact, parse_pact_str};
pub use provider::{ProviderClient, ProviderRequest, ProviderResponse, RequestFilter};
pub use reporter::{ConsoleReporter, ContractResult, EmptyContractPolicy, VerificationOutcome};
pub use runner::{InteractionResult, InteractionRunner};
pub use state::{LifecycleEvent, StateCoordinator, StateHandlers};
pub use verifier::Verifier;
