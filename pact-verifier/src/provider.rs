//! HTTP exchange with the provider under test.
//!
//! Requests are sent exactly once: no retries, no redirect following.

use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;
use verifier_common::{HttpConfig, PlatformError, build_http_client};

use crate::cancel::CancelSignal;
use crate::error::TransportError;

/// A concrete request about to be sent to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRequest {
    /// HTTP method
    pub method: String,
    /// Path relative to the provider base URL
    pub path: String,
    /// Query parameters; a name may repeat
    pub query: BTreeMap<String, Vec<String>>,
    /// Headers, in insertion order
    pub headers: Vec<(String, String)>,
    /// Raw body
    pub body: Option<Vec<u8>>,
}

impl ProviderRequest {
    /// Case-insensitive header lookup (first value).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Builder form of [`ProviderRequest::insert_header`].
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }
}

/// The response captured from the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResponse {
    /// HTTP status code
    pub status: u16,
    /// Headers as received; a name may repeat
    pub headers: Vec<(String, String)>,
    /// Raw body; empty when the provider sent none
    pub body: Vec<u8>,
}

impl ProviderResponse {
    /// Case-insensitive header lookup, repeated values joined with `", "`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect();
        if values.is_empty() { None } else { Some(values.join(", ")) }
    }

    /// Body decoded as UTF-8, lossily.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transform applied to every request after it is built and before it is sent.
pub type RequestFilter = Arc<dyn Fn(ProviderRequest) -> ProviderRequest + Send + Sync>;

/// Apply filters in registration order.
#[must_use]
pub fn apply_filters(filters: &[RequestFilter], request: ProviderRequest) -> ProviderRequest {
    filters.iter().fold(request, |request, filter| filter(request))
}

/// Client for the provider under test.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl ProviderClient {
    /// Create a client for `base_url`.
    ///
    /// Redirects are never followed regardless of `http`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url, http: &HttpConfig) -> Result<Self, PlatformError> {
        let config = http.clone().without_redirects();
        let client = build_http_client(&config)?;
        Ok(Self {
            client,
            base_url,
            timeout: config.timeout,
        })
    }

    /// Provider base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full URL for a request.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the path does not form
    /// a valid URL with the base.
    pub fn url_for(&self, request: &ProviderRequest) -> Result<Url, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = if request.path.starts_with('/') {
            request.path.clone()
        } else {
            format!("/{}", request.path)
        };
        let mut url = Url::parse(&format!("{base}{path}"))
            .map_err(|e| TransportError::InvalidRequest(format!("{base}{path}: {e}")))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, values) in &request.query {
                for value in values {
                    pairs.append_pair(name, value);
                }
            }
        }
        Ok(url)
    }

    /// Send one request and capture the response.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on connection failure, timeout or
    /// cancellation. Any HTTP status, 3xx included, is a response.
    #[instrument(skip(self, request, cancel), fields(method = %request.method, path = %request.path))]
    pub async fn send(
        &self,
        request: &ProviderRequest,
        cancel: &CancelSignal,
    ) -> Result<ProviderResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let url = self.url_for(request)?;
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("method '{}': {e}", request.method)))?;

        let mut builder = self.client.request(method, url).timeout(self.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let exchange = async {
            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::from_reqwest(&e, self.timeout))?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
                .collect();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::from_reqwest(&e, self.timeout))?;
            Ok(ProviderResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        };

        let result = tokio::select! {
            result = exchange => result,
            () = cancel.cancelled() => Err(TransportError::Cancelled),
        };
        if let Ok(response) = &result {
            debug!(status = response.status, bytes = response.body.len(), "Provider responded");
        }
        result
    }
}
