//! Contract loading from files, directories, URLs and a pact broker.

use chrono::NaiveDate;
use reqwest::Client;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use url::Url;
use verifier_common::{PlatformError, RetryPolicy, build_http_client, read_json};

use crate::broker::{BrokerClient, ConsumerVersionSelector, FetchedPact, PactsForVerificationRequest};
use crate::config::VerifierConfig;
use crate::contract::Contract;
use crate::error::{BrokerError, LoadError};
use crate::parser::{parse_pact, parse_pact_str};

/// A broker query for the pacts of the configured provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerSource {
    /// Consumer version selectors; empty lets the broker choose
    pub selectors: Vec<ConsumerVersionSelector>,
    /// Ask the broker which pacts are pending
    pub include_pending: bool,
    /// Include work-in-progress pacts created since this date
    pub include_wip_pacts_since: Option<NaiveDate>,
}

impl BrokerSource {
    /// Query with the given selectors.
    #[must_use]
    pub const fn new(selectors: Vec<ConsumerVersionSelector>) -> Self {
        Self {
            selectors,
            include_pending: false,
            include_wip_pacts_since: None,
        }
    }

    /// Enable pending pacts.
    #[must_use]
    pub const fn with_pending(mut self) -> Self {
        self.include_pending = true;
        self
    }

    /// Include WIP pacts since a date.
    #[must_use]
    pub const fn with_wip_since(mut self, since: NaiveDate) -> Self {
        self.include_wip_pacts_since = Some(since);
        self
    }
}

/// Where contracts come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PactSource {
    /// One pact file
    File(PathBuf),
    /// Every `*.json` file in a directory
    Dir(PathBuf),
    /// A pact served over HTTP
    Url(Url),
    /// Pacts selected through the broker
    Broker(BrokerSource),
}

impl fmt::Display for PactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Dir(path) => write!(f, "directory {}", path.display()),
            Self::Url(url) => write!(f, "url {url}"),
            Self::Broker(source) => write!(f, "broker ({} selector(s))", source.selectors.len()),
        }
    }
}

/// A parsed contract and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedContract {
    /// The contract
    pub contract: Contract,
    /// File path or URL
    pub source: String,
    /// The broker flagged the contract as pending
    pub pending: bool,
    /// Broker link for verification results
    pub publish_url: Option<Url>,
}

impl LoadedContract {
    fn local(contract: Contract, source: String) -> Self {
        Self {
            contract,
            source,
            pending: false,
            publish_url: None,
        }
    }
}

/// Loads contracts for one provider.
#[derive(Debug, Clone)]
pub struct ContractLoader {
    provider_name: String,
    provider_branch: Option<String>,
    provider_tags: Vec<String>,
    broker: Option<BrokerClient>,
    client: Client,
    retry: RetryPolicy,
}

impl ContractLoader {
    /// Loader for the configured provider and broker.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: &VerifierConfig) -> Result<Self, PlatformError> {
        let broker = config
            .broker
            .as_ref()
            .map(|broker| BrokerClient::new(broker, &config.broker_http, config.retry.clone()))
            .transpose()?;
        Ok(Self {
            provider_name: config.provider_name.clone(),
            provider_branch: config.provider_branch.clone(),
            provider_tags: config.provider_tags.clone(),
            broker,
            client: build_http_client(&config.broker_http)?,
            retry: RetryPolicy::new(config.retry.clone()),
        })
    }

    /// The broker client, when a broker is configured.
    #[must_use]
    pub const fn broker(&self) -> Option<&BrokerClient> {
        self.broker.as_ref()
    }

    /// Load every source, in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`LoadError`]: unreadable or malformed documents,
    /// unsupported versions, contracts for another provider, and
    /// unreachable URLs or brokers.
    #[instrument(skip_all, fields(provider = %self.provider_name, sources = sources.len()))]
    pub async fn load(&self, sources: &[PactSource]) -> Result<Vec<LoadedContract>, LoadError> {
        let mut loaded = Vec::new();
        for source in sources {
            debug!(%source, "Loading pacts");
            match source {
                PactSource::File(path) => loaded.push(self.load_file(path).await?),
                PactSource::Dir(path) => loaded.extend(self.load_dir(path).await?),
                PactSource::Url(url) => loaded.push(self.load_url(url).await?),
                PactSource::Broker(query) => loaded.extend(self.load_from_broker(query).await?),
            }
        }
        info!(count = loaded.len(), "Loaded contracts");
        Ok(loaded)
    }

    async fn load_file(&self, path: &Path) -> Result<LoadedContract, LoadError> {
        let origin = path.display().to_string();
        let text = tokio::fs::read_to_string(path).await.map_err(|error| LoadError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        let contract = parse_pact_str(&text, &origin)?;
        self.check_provider(&contract, &origin)?;
        Ok(LoadedContract::local(contract, origin))
    }

    async fn load_dir(&self, dir: &Path) -> Result<Vec<LoadedContract>, LoadError> {
        let io = |error: std::io::Error| LoadError::Io {
            path: dir.to_path_buf(),
            error,
        };
        let mut entries = tokio::fs::read_dir(dir).await.map_err(io)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io)? {
            let path = entry.path();
            let is_json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if is_json && entry.file_type().await.map_err(io)?.is_file() {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            warn!(dir = %dir.display(), "No pact files found");
        }
        let mut loaded = Vec::with_capacity(files.len());
        for file in files {
            loaded.push(self.load_file(&file).await?);
        }
        Ok(loaded)
    }

    async fn load_url(&self, url: &Url) -> Result<LoadedContract, LoadError> {
        let fetch_error = |error: BrokerError| LoadError::Fetch {
            origin: url.to_string(),
            error,
        };
        let fetched = match &self.broker {
            Some(broker) => broker.fetch_pact(url).await.map_err(fetch_error)?,
            None => {
                let document = self
                    .retry
                    .execute("pact_fetch", || {
                        let request = self.client.get(url.clone());
                        async move { read_json(request).await.map_err(BrokerError::from) }
                    })
                    .await
                    .map_err(fetch_error)?;
                FetchedPact::from_document(document).map_err(fetch_error)?
            }
        };

        let origin = url.to_string();
        let contract = parse_pact(&fetched.document, &origin)?;
        self.check_provider(&contract, &origin)?;
        Ok(LoadedContract {
            contract,
            source: origin,
            pending: false,
            publish_url: fetched.publish_url,
        })
    }

    async fn load_from_broker(&self, source: &BrokerSource) -> Result<Vec<LoadedContract>, LoadError> {
        let broker = self.broker.as_ref().ok_or(LoadError::NoBroker)?;
        let fetch_error = |error: BrokerError| LoadError::Fetch {
            origin: broker.base_url().to_string(),
            error,
        };

        let query = PactsForVerificationRequest {
            consumer_version_selectors: source.selectors.clone(),
            include_pending_status: source.include_pending,
            include_wip_pacts_since: source.include_wip_pacts_since,
            provider_version_branch: self.provider_branch.clone(),
            provider_version_tags: self.provider_tags.clone(),
        };
        let pacts = broker
            .pacts_for_verification(&self.provider_name, &query)
            .await
            .map_err(fetch_error)?;

        let mut loaded = Vec::with_capacity(pacts.len());
        for pact in pacts {
            let origin = pact.url.to_string();
            let fetched = broker.fetch_pact(&pact.url).await.map_err(|error| LoadError::Fetch {
                origin: origin.clone(),
                error,
            })?;
            let contract = parse_pact(&fetched.document, &origin)?;
            self.check_provider(&contract, &origin)?;
            if pact.wip {
                info!(consumer = %contract.consumer.name, "Verifying work-in-progress pact");
            }
            loaded.push(LoadedContract {
                contract,
                source: origin,
                pending: pact.pending || pact.wip,
                publish_url: fetched.publish_url,
            });
        }
        Ok(loaded)
    }

    fn check_provider(&self, contract: &Contract, origin: &str) -> Result<(), LoadError> {
        if contract.provider.name == self.provider_name {
            Ok(())
        } else {
            Err(LoadError::ProviderMismatch {
                origin: origin.to_string(),
                expected: self.provider_name.clone(),
                found: contract.provider.name.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use serde_json::json;
    use std::time::Duration;
    use test_utils::fixtures::{PactBuilder, scratch_dir, user_pact, write_pact};
    use verifier_common::RetryConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> VerifierConfig {
        VerifierConfig::new("users", Url::parse("http://localhost:8080").unwrap()).with_retry(
            RetryConfig::default()
                .with_max_retries(1)
                .with_initial_delay(Duration::from_millis(1))
                .without_jitter(),
        )
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = scratch_dir("loader");
        let file = write_pact(&dir, "web-users.json", &user_pact());

        let loader = ContractLoader::new(&config()).unwrap();
        let loaded = loader.load(&[PactSource::File(file)]).await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].contract.consumer.name, "web");
        assert!(!loaded[0].pending);
        assert!(loaded[0].publish_url.is_none());
    }

    #[tokio::test]
    async fn test_load_dir_reads_json_files_in_order() {
        let dir = scratch_dir("loader");
        write_pact(&dir, "b.json", &PactBuilder::new("mobile", "users").build());
        write_pact(&dir, "a.json", &user_pact());
        std::fs::write(dir.join("notes.txt"), "not a pact").unwrap();

        let loader = ContractLoader::new(&config()).unwrap();
        let loaded = loader.load(&[PactSource::Dir(dir)]).await.unwrap();

        let consumers: Vec<_> = loaded.iter().map(|c| c.contract.consumer.name.as_str()).collect();
        assert_eq!(consumers, vec!["web", "mobile"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let loader = ContractLoader::new(&config()).unwrap();
        let err = loader
            .load(&[PactSource::File(scratch_dir("loader").join("absent.json"))])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[tokio::test]
    async fn test_provider_mismatch() {
        let dir = scratch_dir("loader");
        let file = write_pact(&dir, "orders.json", &PactBuilder::new("web", "orders").build());

        let loader = ContractLoader::new(&config()).unwrap();
        let err = loader.load(&[PactSource::File(file)]).await.unwrap_err();
        assert!(matches!(err, LoadError::ProviderMismatch { ref found, .. } if found == "orders"));
    }

    #[tokio::test]
    async fn test_load_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pacts/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_pact()))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/pacts/web", server.uri())).unwrap();
        let loader = ContractLoader::new(&config()).unwrap();
        let loaded = loader.load(&[PactSource::Url(url.clone())]).await.unwrap();
        assert_eq!(loaded[0].source, url.to_string());
    }

    #[tokio::test]
    async fn test_load_from_broker() {
        let server = MockServer::start().await;
        let uri = server.uri();
        let mut pact = user_pact();
        pact["_links"] = json!({"pb:publish-verification-results": {"href": format!("{uri}/results/1")}});

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_links": {}})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pacts/provider/users/for-verification"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_embedded": {"pacts": [{
                    "_links": {"self": {"href": format!("{uri}/pacts/1")}},
                    "verificationProperties": {"pending": true}
                }]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pacts/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pact))
            .mount(&server)
            .await;

        let config = config().with_broker(BrokerConfig::new(Url::parse(&uri).unwrap()));
        let loader = ContractLoader::new(&config).unwrap();
        let source = BrokerSource::new(vec![ConsumerVersionSelector::main_branch()]).with_pending();
        let loaded = loader.load(&[PactSource::Broker(source)]).await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].pending);
        assert_eq!(loaded[0].publish_url.as_ref().unwrap().path(), "/results/1");
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_load_error() {
        let config = config().with_broker(BrokerConfig::new(Url::parse("http://127.0.0.1:1").unwrap()));
        let loader = ContractLoader::new(&config).unwrap();
        let err = loader
            .load(&[PactSource::Broker(BrokerSource::default())])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_broker_source_without_broker() {
        let loader = ContractLoader::new(&config()).unwrap();
        let err = loader
            .load(&[PactSource::Broker(BrokerSource::default())])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::NoBroker));
    }
}
