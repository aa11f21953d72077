//! Harness for the end-to-end tests.
//!
//! Simulated providers and brokers built on `wiremock`, and state handlers
//! that record their calls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use pact_verifier::StateHandlers;
use serde_json::{Map, Value, json};
use test_utils::fixtures::USER_STATE;
use test_utils::mocks::CallRecorder;
use verifier_common::{LogConfig, init_logging};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Install a debug-level subscriber for the verifier. Later calls are no-ops.
pub fn init_test_logging() {
    let _ = init_logging(&LogConfig::default().with_log_level("pact_verifier=debug"));
}

/// A provider answering `GET /users/1` with `body`.
pub async fn users_provider(body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

/// Handlers for `user 1 exists` that record `setup:<state>` and
/// `teardown:<state>`, plus before/after-each hooks.
#[must_use]
pub fn recording_handlers(recorder: &CallRecorder) -> StateHandlers {
    let states = recorder.clone();
    let before = recorder.clone();
    let after = recorder.clone();
    StateHandlers::new()
        .with_handler(USER_STATE, move |setup, state| {
            let recorder = states.clone();
            async move {
                let phase = if setup { "setup" } else { "teardown" };
                recorder.record(format!("{phase}:{}", state.name)).await;
                Ok(Map::new())
            }
        })
        .with_before_each(move || {
            let recorder = before.clone();
            async move {
                recorder.record("beforeEach").await;
                Ok(())
            }
        })
        .with_after_each(move || {
            let recorder = after.clone();
            async move {
                recorder.record("afterEach").await;
                Ok(())
            }
        })
}

/// A pact broker serving pacts for the `users` provider.
#[derive(Debug)]
pub struct BrokerStub {
    server: MockServer,
}

impl BrokerStub {
    /// Start a broker that returns `pacts` from its pacts-for-verification
    /// endpoint. Each pact gets a publish link at `/results/<n>`.
    pub async fn start(pacts: Vec<(Value, bool)>) -> Self {
        let server = MockServer::start().await;
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_links": {
                    "pb:provider-pacts-for-verification": {
                        "href": format!("{uri}/pacts/provider/{{provider}}/for-verification"),
                        "templated": true
                    }
                }
            })))
            .mount(&server)
            .await;

        let mut embedded = Vec::new();
        for (n, (mut pact, pending)) in pacts.into_iter().enumerate() {
            pact["_links"] = json!({
                "pb:publish-verification-results": {"href": format!("{uri}/results/{n}")}
            });
            Mock::given(method("GET"))
                .and(path(format!("/pacts/{n}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(pact))
                .mount(&server)
                .await;
            embedded.push(json!({
                "_links": {"self": {"href": format!("{uri}/pacts/{n}")}},
                "verificationProperties": {"pending": pending}
            }));
        }

        Mock::given(method("POST"))
            .and(path("/pacts/provider/users/for-verification"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_embedded": {"pacts": embedded}})))
            .mount(&server)
            .await;

        Self { server }
    }

    /// Broker base URL.
    #[must_use]
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// The underlying mock server, for extra expectations.
    #[must_use]
    pub const fn server(&self) -> &MockServer {
        &self.server
    }
}
