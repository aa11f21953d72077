//! Pact broker client.
//!
//! Resolves consumer version selectors to pact URLs through the broker's HAL
//! API, fetches pacts, and records verification results. Reads are retried
//! with backoff; writes are attempted once.

use chrono::NaiveDate;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;
use verifier_common::{HttpConfig, PlatformError, RetryConfig, RetryPolicy, build_http_client, read_json};

use crate::config::{BrokerAuth, BrokerConfig};
use crate::error::BrokerError;
use crate::reporter::VerificationResultBody;

const HAL_JSON: &str = "application/hal+json, application/json";
const REL_PACTS_FOR_VERIFICATION: &str = "pb:provider-pacts-for-verification";
const REL_PUBLISH_RESULTS: &str = "pb:publish-verification-results";

/// Selects which consumer versions' pacts to verify.
///
/// Unset fields are omitted from the broker request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerVersionSelector {
    /// Consumer version tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Only the latest version for the tag or branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<bool>,
    /// Consumer branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// The consumer's main branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_branch: Option<bool>,
    /// Consumer branch with the same name as the provider branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_branch: Option<bool>,
    /// Versions currently deployed or released
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_or_released: Option<bool>,
    /// Versions currently deployed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed: Option<bool>,
    /// Versions currently released
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released: Option<bool>,
    /// Environment for deployed/released selectors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Restrict to one consumer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    /// Tag to use when `tag` has no versions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_tag: Option<String>,
}

impl ConsumerVersionSelector {
    /// Latest version on each consumer's main branch.
    #[must_use]
    pub fn main_branch() -> Self {
        Self {
            main_branch: Some(true),
            ..Self::default()
        }
    }

    /// Latest version on a consumer branch.
    #[must_use]
    pub fn branch(branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..Self::default()
        }
    }

    /// Versions with a tag.
    #[must_use]
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    /// Versions deployed or released in any environment.
    #[must_use]
    pub fn deployed_or_released() -> Self {
        Self {
            deployed_or_released: Some(true),
            ..Self::default()
        }
    }

    /// Versions deployed to an environment.
    #[must_use]
    pub fn deployed_to(environment: impl Into<String>) -> Self {
        Self {
            deployed: Some(true),
            environment: Some(environment.into()),
            ..Self::default()
        }
    }

    /// Only the latest matching version.
    #[must_use]
    pub const fn with_latest(mut self) -> Self {
        self.latest = Some(true);
        self
    }

    /// Restrict to one consumer.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = Some(consumer.into());
        self
    }

    /// Tag to fall back to.
    #[must_use]
    pub fn with_fallback_tag(mut self, tag: impl Into<String>) -> Self {
        self.fallback_tag = Some(tag.into());
        self
    }
}

/// Body of a "pacts for verification" query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PactsForVerificationRequest {
    /// Selectors; the broker applies its defaults when empty
    pub consumer_version_selectors: Vec<ConsumerVersionSelector>,
    /// Ask the broker to flag pending pacts
    pub include_pending_status: bool,
    /// Include work-in-progress pacts created since this date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_wip_pacts_since: Option<NaiveDate>,
    /// Provider branch, used for pending calculation and `matchingBranch`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_version_branch: Option<String>,
    /// Provider tags, used for pending calculation
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provider_version_tags: Vec<String>,
}

/// A pact the broker wants verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPact {
    /// Pact document URL
    pub url: Url,
    /// Failures must not fail the build
    pub pending: bool,
    /// Work-in-progress pact
    pub wip: bool,
}

/// A fetched pact document.
#[derive(Debug, Clone)]
pub struct FetchedPact {
    /// Raw pact JSON
    pub document: Value,
    /// Where verification results for this pact go
    pub publish_url: Option<Url>,
}

impl FetchedPact {
    /// Wrap a pact document, picking up its publish link if it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the publish link is not a valid URL.
    pub fn from_document(document: Value) -> Result<Self, BrokerError> {
        let publish_url = match link(&document, REL_PUBLISH_RESULTS) {
            Some(href) => Some(Url::parse(&href).map_err(|e| BrokerError::invalid_url(href, e))?),
            None => None,
        };
        Ok(Self { document, publish_url })
    }
}

/// Client for the pact broker HAL API.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    client: Client,
    base_url: Url,
    auth: Option<BrokerAuth>,
    retry: RetryPolicy,
}

impl BrokerClient {
    /// Create a broker client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BrokerConfig, http: &HttpConfig, retry: RetryConfig) -> Result<Self, PlatformError> {
        let client = build_http_client(http)?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            auth: config.auth.clone(),
            retry: RetryPolicy::new(retry),
        })
    }

    /// Broker base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, HeaderValue::from_static(HAL_JSON));
        match &self.auth {
            Some(BrokerAuth::Token(token)) => request.bearer_auth(token.expose_secret()),
            Some(BrokerAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password.expose_secret()))
            }
            None => request,
        }
    }

    async fn get_json(&self, url: &Url) -> Result<Value, BrokerError> {
        self.retry
            .execute("broker_get", || {
                let request = self.authorize(self.client.get(url.clone()));
                async move { read_json(request).await.map_err(BrokerError::from) }
            })
            .await
    }

    /// Build `base/seg1/seg2/...` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BrokerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BrokerError::invalid_url(self.base_url.as_str(), "cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Resolve selectors to the pacts to verify.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker is unreachable, rejects the query, or
    /// answers with an unexpected document.
    #[instrument(skip(self, query), fields(broker = %self.base_url))]
    pub async fn pacts_for_verification(
        &self,
        provider: &str,
        query: &PactsForVerificationRequest,
    ) -> Result<Vec<VerificationPact>, BrokerError> {
        let index = self.get_json(&self.base_url).await?;
        let url = match link(&index, REL_PACTS_FOR_VERIFICATION) {
            Some(template) => {
                let href = template.replace("{provider}", &encode_segment(provider));
                Url::parse(&href).map_err(|e| BrokerError::invalid_url(href, e))?
            }
            None => {
                debug!("Broker index has no pacts-for-verification link; using the default path");
                self.endpoint(&["pacts", "provider", provider, "for-verification"])?
            }
        };

        // Only the GETs around this query are retried
        let response = read_json(self.authorize(self.client.post(url).json(query))).await?;

        let pacts = response
            .pointer("/_embedded/pacts")
            .and_then(Value::as_array)
            .ok_or_else(|| BrokerError::InvalidResponse("missing _embedded.pacts".to_string()))?;

        let mut resolved = Vec::with_capacity(pacts.len());
        for pact in pacts {
            let href = link(pact, "self")
                .ok_or_else(|| BrokerError::MissingLink("self".to_string()))?;
            let url = Url::parse(&href).map_err(|e| BrokerError::invalid_url(href, e))?;
            let properties = pact.get("verificationProperties");
            let flag = |name: &str| {
                properties
                    .and_then(|p| p.get(name))
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            };
            resolved.push(VerificationPact {
                url,
                pending: flag("pending"),
                wip: flag("wip"),
            });
        }

        info!(provider, count = resolved.len(), "Resolved pacts for verification");
        Ok(resolved)
    }

    /// Fetch one pact document.
    ///
    /// # Errors
    ///
    /// Returns an error if the pact cannot be fetched after retries.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_pact(&self, url: &Url) -> Result<FetchedPact, BrokerError> {
        let document = self.get_json(url).await?;
        FetchedPact::from_document(document)
    }

    /// Tag a provider version.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects the call or is unreachable.
    #[instrument(skip(self))]
    pub async fn tag_version(&self, provider: &str, version: &str, tag: &str) -> Result<(), BrokerError> {
        let url = self.endpoint(&["pacticipants", provider, "versions", version, "tags", tag])?;
        read_json(self.authorize(self.client.put(url).json(&serde_json::json!({})))).await?;
        Ok(())
    }

    /// Record a provider version on a branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects the call or is unreachable.
    #[instrument(skip(self))]
    pub async fn record_branch(&self, provider: &str, branch: &str, version: &str) -> Result<(), BrokerError> {
        let url = self.endpoint(&["pacticipants", provider, "branches", branch, "versions", version])?;
        read_json(self.authorize(self.client.put(url).json(&serde_json::json!({})))).await?;
        Ok(())
    }

    /// Post a verification result to a pact's publish link.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects the result or is unreachable.
    #[instrument(skip(self, result), fields(url = %url, success = result.success))]
    pub async fn publish_verification(&self, url: &Url, result: &VerificationResultBody) -> Result<(), BrokerError> {
        read_json(self.authorize(self.client.post(url.clone()).json(result))).await?;
        Ok(())
    }
}

fn link(document: &Value, relation: &str) -> Option<String> {
    document
        .get("_links")?
        .get(relation)?
        .get("href")?
        .as_str()
        .map(str::to_string)
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(1))
            .without_jitter()
    }

    fn client(server: &MockServer) -> BrokerClient {
        let config = BrokerConfig::new(Url::parse(&server.uri()).unwrap()).with_token("s3cret");
        BrokerClient::new(&config, &HttpConfig::default(), fast_retry()).unwrap()
    }

    #[test]
    fn test_selector_serialization_skips_unset_fields() {
        let selector = ConsumerVersionSelector::branch("main").with_latest().with_consumer("web");
        let json = serde_json::to_value(&selector).unwrap();
        assert_eq!(json, json!({"branch": "main", "latest": true, "consumer": "web"}));

        let json = serde_json::to_value(ConsumerVersionSelector::deployed_or_released()).unwrap();
        assert_eq!(json, json!({"deployedOrReleased": true}));
    }

    #[test]
    fn test_request_serialization() {
        let query = PactsForVerificationRequest {
            consumer_version_selectors: vec![ConsumerVersionSelector::main_branch()],
            include_pending_status: true,
            include_wip_pacts_since: NaiveDate::from_ymd_opt(2024, 1, 1),
            provider_version_branch: Some("main".into()),
            provider_version_tags: Vec::new(),
        };
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["consumerVersionSelectors"][0]["mainBranch"], true);
        assert_eq!(json["includeWipPactsSince"], "2024-01-01");
        assert!(json.get("providerVersionTags").is_none());
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("user service"), "user%20service");
        assert_eq!(encode_segment("a/b"), "a%2Fb");
    }

    #[tokio::test]
    async fn test_pacts_for_verification_follows_hal_link() {
        let server = MockServer::start().await;
        let uri = server.uri();
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_links": {
                    "pb:provider-pacts-for-verification": {
                        "href": format!("{uri}/pfv/{{provider}}"),
                        "templated": true
                    }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pfv/users"))
            .and(body_json(json!({
                "consumerVersionSelectors": [{"mainBranch": true}],
                "includePendingStatus": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_embedded": {"pacts": [
                    {"_links": {"self": {"href": format!("{uri}/pacts/1")}},
                     "verificationProperties": {"pending": true}},
                    {"_links": {"self": {"href": format!("{uri}/pacts/2")}}}
                ]}
            })))
            .mount(&server)
            .await;

        let query = PactsForVerificationRequest {
            consumer_version_selectors: vec![ConsumerVersionSelector::main_branch()],
            include_pending_status: true,
            ..PactsForVerificationRequest::default()
        };
        let pacts = client(&server).pacts_for_verification("users", &query).await.unwrap();

        assert_eq!(pacts.len(), 2);
        assert!(pacts[0].pending);
        assert!(!pacts[1].pending);
        assert_eq!(pacts[1].url.path(), "/pacts/2");
    }

    #[tokio::test]
    async fn test_pacts_for_verification_default_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_links": {}})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pacts/provider/users/for-verification"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_embedded": {"pacts": []}})))
            .mount(&server)
            .await;

        let pacts = client(&server)
            .pacts_for_verification("users", &PactsForVerificationRequest::default())
            .await
            .unwrap();
        assert!(pacts.is_empty());
    }

    #[tokio::test]
    async fn test_index_read_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pacts/1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pacts/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "consumer": {"name": "web"},
                "_links": {"pb:publish-verification-results": {"href": format!("{}/results", server.uri())}}
            })))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/pacts/1", server.uri())).unwrap();
        let fetched = client(&server).fetch_pact(&url).await.unwrap();
        assert_eq!(fetched.document["consumer"]["name"], "web");
        assert_eq!(fetched.publish_url.unwrap().path(), "/results");
    }

    #[tokio::test]
    async fn test_pacts_for_verification_query_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_links": {}})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pacts/provider/users/for-verification"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .pacts_for_verification("users", &PactsForVerificationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Platform(_)));
    }

    #[tokio::test]
    async fn test_missing_embedded_pacts_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"oops": true})))
            .mount(&server)
            .await;

        let err = client(&server)
            .pacts_for_verification("users", &PactsForVerificationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_tag_and_branch_paths() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/pacticipants/users/versions/1.0.0/tags/prod"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/pacticipants/users/branches/main/versions/1.0.0"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let broker = client(&server);
        broker.tag_version("users", "1.0.0", "prod").await.unwrap();
        broker.record_branch("users", "main", "1.0.0").await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/results"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/results", server.uri())).unwrap();
        let body = VerificationResultBody {
            success: true,
            provider_application_version: "1.0.0".into(),
            verified_by: crate::reporter::VerifiedBy::default(),
            test_results: Vec::new(),
        };
        let err = client(&server).publish_verification(&url, &body).await.unwrap_err();
        assert!(matches!(err, BrokerError::Platform(_)));
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let server = MockServer::start().await;
        // "user:pass" base64
        Mock::given(method("GET"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let config = BrokerConfig::new(Url::parse(&server.uri()).unwrap()).with_basic_auth("user", "pass");
        let broker = BrokerClient::new(&config, &HttpConfig::default(), fast_retry()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        broker.fetch_pact(&url).await.unwrap();
    }
}
