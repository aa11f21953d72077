//! Verifier configuration with validation and environment variable support.

use regex::Regex;
use secrecy::SecretString;
use std::time::Duration;
use url::Url;
use verifier_common::{HttpConfig, RetryConfig};

use crate::contract::Interaction;
use crate::error::ConfigError;
use crate::reporter::EmptyContractPolicy;

/// Provider name the contracts must be written for.
pub const ENV_PROVIDER_NAME: &str = "PACT_PROVIDER_NAME";
/// Base URL of the running provider.
pub const ENV_PROVIDER_BASE_URL: &str = "PACT_PROVIDER_BASE_URL";
/// Provider application version, required to publish.
pub const ENV_PROVIDER_VERSION: &str = "PACT_PROVIDER_VERSION";
/// Provider branch recorded on publish.
pub const ENV_PROVIDER_BRANCH: &str = "PACT_PROVIDER_BRANCH";
/// Comma separated provider tags recorded on publish.
pub const ENV_PROVIDER_TAGS: &str = "PACT_PROVIDER_TAGS";
/// Broker base URL.
pub const ENV_BROKER_BASE_URL: &str = "PACT_BROKER_BASE_URL";
/// Broker bearer token.
pub const ENV_BROKER_TOKEN: &str = "PACT_BROKER_TOKEN";
/// Broker basic auth user.
pub const ENV_BROKER_USERNAME: &str = "PACT_BROKER_USERNAME";
/// Broker basic auth password.
pub const ENV_BROKER_PASSWORD: &str = "PACT_BROKER_PASSWORD";
/// `true` to publish verification results.
pub const ENV_PUBLISH_RESULTS: &str = "PACT_PUBLISH_RESULTS";
/// `true` to disable coloured console output.
pub const ENV_DISABLE_COLOR: &str = "PACT_DISABLE_COLOR";

/// Broker credentials.
#[derive(Debug, Clone)]
pub enum BrokerAuth {
    /// `Authorization: Bearer <token>`
    Token(SecretString),
    /// HTTP basic authentication
    Basic {
        /// User name
        username: String,
        /// Password
        password: SecretString,
    },
}

/// Pact broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker base URL
    pub base_url: Url,
    /// Credentials, if the broker requires them
    pub auth: Option<BrokerAuth>,
}

impl BrokerConfig {
    /// Broker without credentials.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self { base_url, auth: None }
    }

    /// Authenticate with a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(BrokerAuth::Token(SecretString::from(token.into())));
        self
    }

    /// Authenticate with basic credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(BrokerAuth::Basic {
            username: username.into(),
            password: SecretString::from(password.into()),
        });
        self
    }
}

/// Limits which interactions are verified.
///
/// Interactions filtered out are neither run nor counted.
#[derive(Debug, Clone, Default)]
pub struct InteractionFilter {
    description: Option<Regex>,
    state: Option<Regex>,
}

impl InteractionFilter {
    /// A filter that lets everything through.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only interactions whose description matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an invalid regex.
    pub fn with_description(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.description = Some(Regex::new(pattern).map_err(|e| ConfigError::invalid("description filter", e.to_string()))?);
        Ok(self)
    }

    /// Only interactions with a provider state matching `pattern`.
    /// Interactions without states are matched against the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an invalid regex.
    pub fn with_state(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.state = Some(Regex::new(pattern).map_err(|e| ConfigError::invalid("state filter", e.to_string()))?);
        Ok(self)
    }

    /// Whether the filter restricts anything.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.description.is_some() || self.state.is_some()
    }

    /// Whether `interaction` passes the filter.
    #[must_use]
    pub fn matches(&self, interaction: &Interaction) -> bool {
        let description_ok = self
            .description
            .as_ref()
            .is_none_or(|re| re.is_match(&interaction.description));
        let state_ok = self.state.as_ref().is_none_or(|re| {
            if interaction.provider_states.is_empty() {
                re.is_match("")
            } else {
                interaction.provider_states.iter().any(|s| re.is_match(&s.name))
            }
        });
        description_ok && state_ok
    }
}

/// Verifier configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Provider name; contracts for other providers are rejected
    pub provider_name: String,
    /// Base URL of the provider under test
    pub provider_base_url: Url,
    /// Provider version, required to publish
    pub provider_version: Option<String>,
    /// Provider branch recorded on publish
    pub provider_branch: Option<String>,
    /// Provider tags recorded on publish
    pub provider_tags: Vec<String>,
    /// Broker settings
    pub broker: Option<BrokerConfig>,
    /// Publish results to the broker
    pub publish_results: bool,
    /// Timeout of one provider request (default: 30s)
    pub request_timeout: Duration,
    /// Contracts verified concurrently (default: 1)
    pub max_concurrent_contracts: usize,
    /// Verdict when nothing was verified
    pub empty_contract_policy: EmptyContractPolicy,
    /// Interaction filter
    pub filter: InteractionFilter,
    /// Coloured console output (default: true)
    pub color: bool,
    /// Settings for broker HTTP calls
    pub broker_http: HttpConfig,
    /// Retry of broker reads during load
    pub retry: RetryConfig,
}

impl VerifierConfig {
    /// Configuration with defaults for everything but the provider.
    #[must_use]
    pub fn new(provider_name: impl Into<String>, provider_base_url: Url) -> Self {
        Self {
            provider_name: provider_name.into(),
            provider_base_url,
            provider_version: None,
            provider_branch: None,
            provider_tags: Vec::new(),
            broker: None,
            publish_results: false,
            request_timeout: Duration::from_secs(30),
            max_concurrent_contracts: 1,
            empty_contract_policy: EmptyContractPolicy::default(),
            filter: InteractionFilter::default(),
            color: true,
            broker_http: HttpConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Loads configuration from environment variables with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for missing, unparseable or inconsistent
    /// settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Like [`VerifierConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for missing, unparseable or inconsistent
    /// settings.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider_name = var(ENV_PROVIDER_NAME).ok_or(ConfigError::Missing(ENV_PROVIDER_NAME))?;
        let base_url = var(ENV_PROVIDER_BASE_URL).ok_or(ConfigError::Missing(ENV_PROVIDER_BASE_URL))?;
        let mut config = Self::new(provider_name, parse_url(ENV_PROVIDER_BASE_URL, &base_url)?);

        config.provider_version = var(ENV_PROVIDER_VERSION);
        config.provider_branch = var(ENV_PROVIDER_BRANCH);
        config.provider_tags = var(ENV_PROVIDER_TAGS).map(|tags| parse_list(&tags)).unwrap_or_default();
        config.publish_results = var(ENV_PUBLISH_RESULTS).map(|v| parse_bool(&v)).unwrap_or(false);
        config.color = !var(ENV_DISABLE_COLOR).is_some_and(|v| parse_bool(&v));

        if let Some(url) = var(ENV_BROKER_BASE_URL) {
            let mut broker = BrokerConfig::new(parse_url(ENV_BROKER_BASE_URL, &url)?);
            if let Some(token) = var(ENV_BROKER_TOKEN) {
                broker = broker.with_token(token);
            } else if let Some(username) = var(ENV_BROKER_USERNAME) {
                let password = var(ENV_BROKER_PASSWORD).unwrap_or_default();
                broker = broker.with_basic_auth(username, password);
            }
            config.broker = Some(broker);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_name.trim().is_empty() {
            return Err(ConfigError::Missing("provider name"));
        }
        check_http(ENV_PROVIDER_BASE_URL, &self.provider_base_url)?;
        if self.max_concurrent_contracts == 0 {
            return Err(ConfigError::invalid("max_concurrent_contracts", "must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be greater than 0"));
        }
        if let Some(broker) = &self.broker {
            check_http(ENV_BROKER_BASE_URL, &broker.base_url)?;
        }
        if self.publish_results {
            if self.provider_version.as_deref().is_none_or(|v| v.trim().is_empty()) {
                return Err(ConfigError::invalid(
                    ENV_PROVIDER_VERSION,
                    "a provider version is required to publish results",
                ));
            }
            if self.broker.is_none() {
                return Err(ConfigError::invalid(ENV_BROKER_BASE_URL, "a broker is required to publish results"));
            }
        }
        Ok(())
    }

    /// HTTP settings for the provider client.
    #[must_use]
    pub fn provider_http(&self) -> HttpConfig {
        HttpConfig::default().with_timeout(self.request_timeout).without_redirects()
    }

    /// Set the provider version.
    #[must_use]
    pub fn with_provider_version(mut self, version: impl Into<String>) -> Self {
        self.provider_version = Some(version.into());
        self
    }

    /// Set the provider branch.
    #[must_use]
    pub fn with_provider_branch(mut self, branch: impl Into<String>) -> Self {
        self.provider_branch = Some(branch.into());
        self
    }

    /// Set the provider tags.
    #[must_use]
    pub fn with_provider_tags(mut self, tags: Vec<String>) -> Self {
        self.provider_tags = tags;
        self
    }

    /// Set the broker.
    #[must_use]
    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Enable or disable publishing.
    #[must_use]
    pub const fn with_publish_results(mut self, publish: bool) -> Self {
        self.publish_results = publish;
        self
    }

    /// Set the provider request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set how many contracts run concurrently.
    #[must_use]
    pub const fn with_max_concurrent_contracts(mut self, n: usize) -> Self {
        self.max_concurrent_contracts = n;
        self
    }

    /// Set the empty contract policy.
    #[must_use]
    pub const fn with_empty_contract_policy(mut self, policy: EmptyContractPolicy) -> Self {
        self.empty_contract_policy = policy;
        self
    }

    /// Set the interaction filter.
    #[must_use]
    pub fn with_filter(mut self, filter: InteractionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Enable or disable colours.
    #[must_use]
    pub const fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Set the broker retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::invalid(name, format!("'{value}': {e}")))
}

fn check_http(name: &'static str, url: &Url) -> Result<(), ConfigError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::invalid(name, format!("unsupported scheme '{other}'"))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ProviderState, Request, Response};
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_from_env_minimal() {
        let config = VerifierConfig::from_env_with(env(&[
            (ENV_PROVIDER_NAME, "users"),
            (ENV_PROVIDER_BASE_URL, "http://localhost:8080"),
        ]))
        .unwrap();
        assert_eq!(config.provider_name, "users");
        assert!(config.broker.is_none());
        assert!(!config.publish_results);
        assert!(config.color);
        assert_eq!(config.max_concurrent_contracts, 1);
    }

    #[test]
    fn test_from_env_full() {
        let config = VerifierConfig::from_env_with(env(&[
            (ENV_PROVIDER_NAME, "users"),
            (ENV_PROVIDER_BASE_URL, "http://localhost:8080"),
            (ENV_PROVIDER_VERSION, "1.2.3"),
            (ENV_PROVIDER_BRANCH, "main"),
            (ENV_PROVIDER_TAGS, "main, prod,,"),
            (ENV_BROKER_BASE_URL, "https://broker.example.com"),
            (ENV_BROKER_TOKEN, "s3cret"),
            (ENV_PUBLISH_RESULTS, "TRUE"),
            (ENV_DISABLE_COLOR, "1"),
        ]))
        .unwrap();
        assert_eq!(config.provider_tags, vec!["main".to_string(), "prod".to_string()]);
        assert!(config.publish_results);
        assert!(!config.color);
        match config.broker.unwrap().auth {
            Some(BrokerAuth::Token(token)) => assert_eq!(token.expose_secret(), "s3cret"),
            other => panic!("unexpected auth {other:?}"),
        }
    }

    #[test]
    fn test_from_env_basic_auth() {
        let config = VerifierConfig::from_env_with(env(&[
            (ENV_PROVIDER_NAME, "users"),
            (ENV_PROVIDER_BASE_URL, "http://localhost:8080"),
            (ENV_BROKER_BASE_URL, "https://broker.example.com"),
            (ENV_BROKER_USERNAME, "ci"),
            (ENV_BROKER_PASSWORD, "pw"),
        ]))
        .unwrap();
        assert!(matches!(
            config.broker.unwrap().auth,
            Some(BrokerAuth::Basic { ref username, .. }) if username == "ci"
        ));
    }

    #[test]
    fn test_missing_and_invalid_settings() {
        assert_eq!(
            VerifierConfig::from_env_with(env(&[])).unwrap_err(),
            ConfigError::Missing(ENV_PROVIDER_NAME)
        );
        assert!(matches!(
            VerifierConfig::from_env_with(env(&[
                (ENV_PROVIDER_NAME, "users"),
                (ENV_PROVIDER_BASE_URL, "not a url"),
            ])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            VerifierConfig::from_env_with(env(&[
                (ENV_PROVIDER_NAME, "users"),
                (ENV_PROVIDER_BASE_URL, "ftp://localhost"),
            ])),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_publish_requires_version_and_broker() {
        let base = VerifierConfig::new("users", Url::parse("http://localhost").unwrap()).with_publish_results(true);
        assert!(matches!(base.validate(), Err(ConfigError::Invalid { name, .. }) if name == ENV_PROVIDER_VERSION));

        let versioned = base.clone().with_provider_version("1.0.0");
        assert!(matches!(versioned.validate(), Err(ConfigError::Invalid { name, .. }) if name == ENV_BROKER_BASE_URL));

        let complete = versioned.with_broker(BrokerConfig::new(Url::parse("http://broker").unwrap()));
        assert!(complete.validate().is_ok());
    }

    #[test]
    fn test_concurrency_and_timeout_bounds() {
        let config = VerifierConfig::new("users", Url::parse("http://localhost").unwrap());
        assert!(config.clone().with_max_concurrent_contracts(0).validate().is_err());
        assert!(config.with_request_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_interaction_filter() {
        let interaction = |description: &str, states: &[&str]| Interaction {
            description: description.into(),
            provider_states: states.iter().map(|s| ProviderState::named(*s)).collect(),
            request: Request::default(),
            response: Response::default(),
            pending: false,
        };

        let all = InteractionFilter::new();
        assert!(!all.is_active());
        assert!(all.matches(&interaction("anything", &[])));

        let filter = InteractionFilter::new()
            .with_description("^get")
            .unwrap()
            .with_state("exists")
            .unwrap();
        assert!(filter.matches(&interaction("get user", &["user exists"])));
        assert!(!filter.matches(&interaction("delete user", &["user exists"])));
        assert!(!filter.matches(&interaction("get user", &[])));

        let stateless = InteractionFilter::new().with_state("^$").unwrap();
        assert!(stateless.matches(&interaction("ping", &[])));
        assert!(InteractionFilter::new().with_description("(").is_err());
    }
}
