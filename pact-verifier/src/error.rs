//! Error types for the verifier.
//!
//! Load and configuration errors abort a run. Interaction errors only fail
//! the interaction they occurred in and are reported next to (never as)
//! mismatches. Publish errors are kept apart from the local verdict.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use verifier_common::{PlatformError, Retryable};

/// Failure to load a contract from a source.
#[derive(Error, Debug)]
pub enum LoadError {
    /// A local file or directory could not be read
    #[error("Failed to read {path}: {error}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying error
        error: std::io::Error,
    },

    /// The document is not a valid pact
    #[error("Malformed pact {origin}: {reason}")]
    Malformed {
        /// Where the document came from
        origin: String,
        /// What is wrong with it
        reason: String,
    },

    /// The document declares a specification version we do not read
    #[error("Unsupported pact specification version '{version}' in {origin}")]
    UnsupportedVersion {
        /// Where the document came from
        origin: String,
        /// The declared version
        version: String,
    },

    /// The contract is for a different provider
    #[error("Pact {origin} is for provider '{found}', expected '{expected}'")]
    ProviderMismatch {
        /// Where the document came from
        origin: String,
        /// Configured provider name
        expected: String,
        /// Provider named in the pact
        found: String,
    },

    /// A URL or broker source could not be fetched
    #[error("Failed to fetch pacts from {origin}: {error}")]
    Fetch {
        /// URL or broker the fetch was made against
        origin: String,
        /// Underlying broker or HTTP error
        error: BrokerError,
    },

    /// A broker source was requested but no broker is configured
    #[error("Pacts were requested from a broker but no broker is configured")]
    NoBroker,
}

impl LoadError {
    /// Create a malformed document error.
    #[must_use]
    pub fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}

/// Error talking to a pact broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// HTTP level failure
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// A HAL relation the flow depends on was not advertised
    #[error("Broker response has no '{0}' link")]
    MissingLink(String),

    /// A URL could not be built or parsed
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL or template
        url: String,
        /// Parse failure
        reason: String,
    },

    /// The broker answered with a document we do not understand
    #[error("Unexpected broker response: {0}")]
    InvalidResponse(String),
}

impl BrokerError {
    /// Create an invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Platform(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Failure to publish verification results.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Tagging the provider version failed
    #[error("Failed to tag provider version {version} with '{tag}': {error}")]
    Tag {
        /// Provider version
        version: String,
        /// Tag being applied
        tag: String,
        /// Underlying error
        error: BrokerError,
    },

    /// Recording the provider branch failed
    #[error("Failed to record branch '{branch}' for provider version {version}: {error}")]
    Branch {
        /// Provider version
        version: String,
        /// Branch name
        branch: String,
        /// Underlying error
        error: BrokerError,
    },

    /// Posting a verification result failed
    #[error("Failed to publish verification results for {contract}: {error}")]
    Results {
        /// `consumer -> provider` label of the contract
        contract: String,
        /// Underlying error
        error: BrokerError,
    },

    /// More than one publish call failed
    #[error("{} publish operations failed: {}", .0.len(), join_errors(.0))]
    Several(Vec<PublishError>),
}

impl PublishError {
    /// Collapse collected failures into one error, if any.
    #[must_use]
    pub fn collect(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Several(errors)),
        }
    }
}

fn join_errors(errors: &[PublishError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Invalid verifier configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is absent
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// A setting has an unusable value
    #[error("Invalid value for {name}: {reason}")]
    Invalid {
        /// Setting name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Create an invalid setting error.
    #[must_use]
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Failure to exchange a request with the provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the configured timeout
    #[error("Request to provider timed out after {0:?}")]
    Timeout(Duration),

    /// The provider could not be reached
    #[error("Could not connect to provider: {0}")]
    Connect(String),

    /// The run was cancelled while the request was in flight
    #[error("Request to provider was cancelled")]
    Cancelled,

    /// The request could not be built
    #[error("Invalid provider request: {0}")]
    InvalidRequest(String),

    /// Any other failure while sending or reading the response
    #[error("Provider request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Classify a reqwest failure.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Failure to evaluate a generator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// A provider-state expression names a value no handler returned
    #[error("Provider state value '{0}' was not supplied by any state handler")]
    MissingStateValue(String),

    /// A generated value could not be applied
    #[error("Generator at {location} failed: {reason}")]
    Invalid {
        /// Category and path of the generator
        location: String,
        /// What went wrong
        reason: String,
    },
}

/// Failure of one interaction that is not a response mismatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InteractionError {
    /// No handler is registered for a named provider state
    #[error("No state handler registered for provider state '{0}'")]
    UnknownState(String),

    /// A state handler returned an error during setup
    #[error("State setup for '{state}' failed: {message}")]
    StateSetup {
        /// State name
        state: String,
        /// Handler error, with its causes
        message: String,
    },

    /// A before-each or after-each hook failed
    #[error("{hook} hook failed: {message}")]
    Hook {
        /// `beforeEach` or `afterEach`
        hook: &'static str,
        /// Hook error, with its causes
        message: String,
    },

    /// A generator could not be evaluated
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    /// The provider could not be reached
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl InteractionError {
    /// Short machine readable classification.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownState(_) => "unknownState",
            Self::StateSetup { .. } => "stateSetup",
            Self::Hook { .. } => "hook",
            Self::Generator(_) => "generator",
            Self::Transport(TransportError::Cancelled) => "cancelled",
            Self::Transport(_) => "transport",
        }
    }

    /// Create a state setup error from a handler failure.
    #[must_use]
    pub fn state_setup(state: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::StateSetup {
            state: state.into(),
            message: format!("{err:#}"),
        }
    }

    /// Create a hook error from a hook failure.
    #[must_use]
    pub fn hook(hook: &'static str, err: &anyhow::Error) -> Self {
        Self::Hook {
            hook,
            message: format!("{err:#}"),
        }
    }
}

/// Error aborting a verification run.
#[derive(Error, Debug)]
pub enum VerifierError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A contract could not be loaded
    #[error(transparent)]
    Load(#[from] LoadError),

    /// HTTP plumbing could not be set up
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_retryability_follows_platform() {
        assert!(BrokerError::Platform(PlatformError::unavailable("down")).is_retryable());
        assert!(!BrokerError::Platform(PlatformError::NotFound("x".into())).is_retryable());
        assert!(!BrokerError::MissingLink("pb:x".into()).is_retryable());
    }

    #[test]
    fn test_interaction_error_kinds() {
        assert_eq!(InteractionError::UnknownState("s".into()).kind(), "unknownState");
        assert_eq!(InteractionError::from(TransportError::Cancelled).kind(), "cancelled");
        assert_eq!(
            InteractionError::from(TransportError::Connect("refused".into())).kind(),
            "transport"
        );
        assert_eq!(
            InteractionError::from(GeneratorError::MissingStateValue("id".into())).kind(),
            "generator"
        );
    }

    #[test]
    fn test_state_setup_keeps_error_chain() {
        let err = anyhow::anyhow!("connection refused").context("seeding user");
        let error = InteractionError::state_setup("user exists", &err);
        assert_eq!(
            error.to_string(),
            "State setup for 'user exists' failed: seeding user: connection refused"
        );
    }

    #[test]
    fn test_publish_error_collect() {
        assert!(PublishError::collect(Vec::new()).is_none());
        let one = PublishError::collect(vec![PublishError::Results {
            contract: "a -> b".into(),
            error: BrokerError::MissingLink("pb:x".into()),
        }]);
        assert!(matches!(one, Some(PublishError::Results { .. })));
        let several = PublishError::collect(vec![
            PublishError::Results {
                contract: "a -> b".into(),
                error: BrokerError::MissingLink("pb:x".into()),
            },
            PublishError::Tag {
                version: "1".into(),
                tag: "main".into(),
                error: BrokerError::InvalidResponse("bad".into()),
            },
        ])
        .unwrap();
        assert!(several.to_string().starts_with("2 publish operations failed"));
    }
}
