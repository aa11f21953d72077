//! End-to-end verification scenarios.
//!
//! Each test runs the full pipeline (load, state setup, request, match,
//! teardown, report and publish) against simulated providers and brokers.

use pact_verifier::runner::Step;
use pact_verifier::{
    BrokerConfig, BrokerSource, ConsumerVersionSelector, EmptyContractPolicy, LifecycleEvent, LoadError, MismatchKind,
    PactSource, PublishError, StateHandlers, Verifier, VerifierConfig, VerifierError,
};
use pact_verifier_integration_tests::{BrokerStub, init_test_logging, recording_handlers, users_provider};
use serde_json::{Map, json};
use std::time::Duration;
use test_utils::fixtures::{
    ACCOUNT_PROVIDER, ACCOUNT_STATE, PactBuilder, USER_STATE, account_body, account_pact, scratch_dir, user_body,
    user_interaction, user_pact, write_pact,
};
use test_utils::mocks::CallRecorder;
use url::Url;
use verifier_common::RetryConfig;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(provider: &MockServer) -> VerifierConfig {
    VerifierConfig::new("users", Url::parse(&provider.uri()).unwrap())
        .with_color(false)
        .with_retry(
            RetryConfig::default()
                .with_max_retries(1)
                .with_initial_delay(Duration::from_millis(1))
                .without_jitter(),
        )
}

fn user_pact_dir() -> PactSource {
    let dir = scratch_dir("e2e");
    write_pact(&dir, "web-users.json", &user_pact());
    PactSource::Dir(dir)
}

#[tokio::test]
async fn test_user_lookup_passes() {
    init_test_logging();
    let provider = users_provider(user_body()).await;
    let recorder = CallRecorder::new();

    let outcome = Verifier::new(config(&provider))
        .with_state_handlers(recording_handlers(&recorder))
        .verify(&[user_pact_dir()])
        .await
        .unwrap();

    assert!(outcome.local_pass);
    assert_eq!(outcome.interaction_count(), 1);
    assert_eq!(
        recorder.calls().await,
        vec![
            "beforeEach".to_string(),
            format!("setup:{USER_STATE}"),
            format!("teardown:{USER_STATE}"),
            "afterEach".to_string(),
        ]
    );

    let events = &outcome.contracts[0].interactions[0].events;
    assert_eq!(events.first(), Some(&LifecycleEvent::BeforeEach));
    assert_eq!(events.last(), Some(&LifecycleEvent::AfterEach));
    let sent = events
        .iter()
        .position(|e| matches!(e, LifecycleEvent::RequestSent { .. }))
        .unwrap();
    let setup = events
        .iter()
        .position(|e| matches!(e, LifecycleEvent::StateSetup { .. }))
        .unwrap();
    assert!(setup < sent);
}

#[tokio::test]
async fn test_account_pact_with_every_matcher_passes() {
    init_test_logging();
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/users/[0-9]+$"))
        .and(header("authorization", "Bearer 1234-dynamic-value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(account_body()))
        .mount(&provider)
        .await;
    let dir = scratch_dir("e2e");
    write_pact(&dir, "account.json", &account_pact());

    let recorder = CallRecorder::new();
    let states = recorder.clone();
    let handlers = StateHandlers::new().with_handler(ACCOUNT_STATE, move |setup, state| {
        let recorder = states.clone();
        async move {
            let phase = if setup { "setup" } else { "teardown" };
            recorder.record(format!("{phase}:{}", state.name)).await;
            let mut values = Map::new();
            values.insert("uuid".to_string(), json!("1234"));
            Ok(values)
        }
    });
    let config = VerifierConfig::new(ACCOUNT_PROVIDER, Url::parse(&provider.uri()).unwrap()).with_color(false);
    let outcome = Verifier::new(config)
        .with_state_handlers(handlers)
        .with_request_filter(|request| request.with_header("Authorization", "Bearer 1234-dynamic-value"))
        .verify(&[PactSource::Dir(dir)])
        .await
        .unwrap();

    let result = &outcome.contracts[0].interactions[0];
    assert!(result.mismatches.is_empty(), "{:?}", result.mismatches);
    assert!(outcome.local_pass);
    assert_eq!(
        recorder.calls().await,
        vec![format!("setup:{ACCOUNT_STATE}"), format!("teardown:{ACCOUNT_STATE}")]
    );
}

#[tokio::test]
async fn test_string_id_is_type_mismatch() {
    let provider = users_provider(json!({"id": "1", "name": "Alice"})).await;
    let recorder = CallRecorder::new();

    let verifier = Verifier::new(config(&provider)).with_state_handlers(recording_handlers(&recorder));
    let outcome = verifier.verify(&[user_pact_dir()]).await.unwrap();

    assert!(!outcome.local_pass);
    let result = &outcome.contracts[0].interactions[0];
    assert_eq!(result.mismatches.len(), 1);
    assert_eq!(result.mismatches[0].kind, MismatchKind::TypeMismatch);
    assert_eq!(result.mismatches[0].path, "$.id");
    assert!(result.failure.is_none());

    // teardown still ran after the failed match
    assert!(recorder.position(&format!("teardown:{USER_STATE}")).await.is_some());
    assert!(verifier.render(&outcome).contains("$.id"));
}

#[tokio::test]
async fn test_request_filter_is_seen_by_provider() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body()))
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&provider)
        .await;

    let recorder = CallRecorder::new();
    let outcome = Verifier::new(config(&provider))
        .with_state_handlers(recording_handlers(&recorder))
        .with_request_filter(|request| request.with_header("Authorization", "Bearer test-token"))
        .verify(&[user_pact_dir()])
        .await
        .unwrap();

    assert!(outcome.local_pass);
}

#[tokio::test]
async fn test_failed_setup_skips_request_and_tears_down() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body()))
        .expect(0)
        .mount(&provider)
        .await;

    let recorder = CallRecorder::new();
    let teardowns = recorder.clone();
    let handlers = StateHandlers::new().with_handler(USER_STATE, move |setup, _state| {
        let recorder = teardowns.clone();
        async move {
            if setup {
                anyhow::bail!("database unavailable");
            }
            recorder.record("teardown").await;
            Ok(Map::new())
        }
    });

    let outcome = Verifier::new(config(&provider))
        .with_state_handlers(handlers)
        .verify(&[user_pact_dir()])
        .await
        .unwrap();

    assert!(!outcome.local_pass);
    let result = &outcome.contracts[0].interactions[0];
    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.step, Step::StateSetup);
    assert!(failure.message.contains("database unavailable"));
    assert_eq!(result.mismatches[0].kind, MismatchKind::VerificationError);
    assert_eq!(recorder.calls().await, vec!["teardown"]);
}

#[tokio::test]
async fn test_unknown_state_fails_interaction_only() {
    let provider = users_provider(user_body()).await;
    let pact = PactBuilder::new("web", "users")
        .interaction(user_interaction())
        .interaction(json!({
            "description": "get user 1 again",
            "request": {"method": "GET", "path": "/users/1"},
            "response": {"status": 200}
        }))
        .build();
    let dir = scratch_dir("e2e");
    write_pact(&dir, "web.json", &pact);

    // no handler for "user 1 exists"
    let outcome = Verifier::new(config(&provider))
        .verify(&[PactSource::Dir(dir)])
        .await
        .unwrap();

    let results = &outcome.contracts[0].interactions;
    assert_eq!(results[0].failure.as_ref().unwrap().kind, "unknownState");
    assert!(results[1].passed());
    assert!(!outcome.local_pass);
}

#[tokio::test]
async fn test_provider_state_values_feed_generators() {
    let provider = users_provider(user_body()).await;
    let pact = PactBuilder::new("web", "users")
        .interaction(json!({
            "description": "get created user",
            "providerStates": [{"name": "a user exists"}],
            "request": {
                "method": "GET",
                "path": "/users/0",
                "generators": {"path": {"type": "ProviderState", "expression": "/users/${id}"}}
            },
            "response": {
                "status": 200,
                "body": {"id": 0},
                "generators": {
                    "body": {"$.id": {"type": "ProviderState", "expression": "${id}", "dataType": "INTEGER"}}
                }
            }
        }))
        .build();
    let dir = scratch_dir("e2e");
    write_pact(&dir, "web.json", &pact);

    let handlers = StateHandlers::new().with_handler("a user exists", |setup, _state| async move {
        let mut values = Map::new();
        if setup {
            values.insert("id".to_string(), json!(1));
        }
        Ok(values)
    });
    let outcome = Verifier::new(config(&provider))
        .with_state_handlers(handlers)
        .verify(&[PactSource::Dir(dir)])
        .await
        .unwrap();

    assert!(outcome.local_pass, "{:?}", outcome.contracts[0].interactions[0].mismatches);
}

#[tokio::test]
async fn test_v2_and_v4_pacts_verify_alike() {
    let provider = users_provider(user_body()).await;
    let v2 = json!({
        "consumer": {"name": "legacy"},
        "provider": {"name": "users"},
        "interactions": [{
            "description": "get user 1",
            "providerState": USER_STATE,
            "request": {"method": "get", "path": "/users/1"},
            "response": {
                "status": 200,
                "body": {"id": 7, "name": "Bob"},
                "matchingRules": {"$.body.id": {"match": "type"}, "$.body.name": {"match": "type"}}
            }
        }],
        "metadata": {"pactSpecification": {"version": "2.0.0"}}
    });
    let v4 = json!({
        "consumer": {"name": "modern"},
        "provider": {"name": "users"},
        "interactions": [
            {
                "type": "Synchronous/HTTP",
                "description": "get user 1",
                "providerStates": [{"name": USER_STATE}],
                "request": {"method": "GET", "path": "/users/1"},
                "response": {
                    "status": 200,
                    "headers": {"Content-Type": ["application/json"]},
                    "body": {"content": {"id": 1}, "contentType": "application/json", "encoded": false}
                }
            },
            {"type": "Asynchronous/Messages", "description": "user created", "contents": {}}
        ],
        "metadata": {"pactSpecification": {"version": "4.0"}}
    });
    let dir = scratch_dir("e2e");
    write_pact(&dir, "legacy.json", &v2);
    write_pact(&dir, "modern.json", &v4);

    let recorder = CallRecorder::new();
    let outcome = Verifier::new(config(&provider).with_max_concurrent_contracts(2))
        .with_state_handlers(recording_handlers(&recorder))
        .verify(&[PactSource::Dir(dir)])
        .await
        .unwrap();

    assert!(outcome.local_pass);
    assert_eq!(outcome.interaction_count(), 2);
    let consumers: Vec<_> = outcome.contracts.iter().map(|c| c.consumer.as_str()).collect();
    assert_eq!(consumers, vec!["legacy", "modern"]);
}

#[tokio::test]
async fn test_broker_pacts_verified_and_published() {
    init_test_logging();
    let provider = users_provider(user_body()).await;
    let broker = BrokerStub::start(vec![(user_pact(), false)]).await;
    Mock::given(method("PUT"))
        .and(path("/pacticipants/users/versions/1.0.0/tags/prod"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(broker.server())
        .await;
    Mock::given(method("PUT"))
        .and(path("/pacticipants/users/branches/main/versions/1.0.0"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(broker.server())
        .await;
    Mock::given(method("POST"))
        .and(path("/results/0"))
        .and(body_partial_json(json!({
            "success": true,
            "providerApplicationVersion": "1.0.0",
            "testResults": [{"interactionDescription": "get user 1", "success": true}]
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(broker.server())
        .await;

    let config = config(&provider)
        .with_broker(BrokerConfig::new(Url::parse(&broker.uri()).unwrap()).with_token("broker-token"))
        .with_provider_version("1.0.0")
        .with_provider_branch("main")
        .with_provider_tags(vec!["prod".to_string()])
        .with_publish_results(true);
    let recorder = CallRecorder::new();
    let source = BrokerSource::new(vec![ConsumerVersionSelector::main_branch()]).with_pending();

    let outcome = Verifier::new(config)
        .with_state_handlers(recording_handlers(&recorder))
        .verify(&[PactSource::Broker(source)])
        .await
        .unwrap();

    assert!(outcome.local_pass);
    assert!(outcome.publish_error.is_none());
}

#[tokio::test]
async fn test_publish_failure_keeps_local_pass() {
    let provider = users_provider(user_body()).await;
    let broker = BrokerStub::start(vec![(user_pact(), false)]).await;
    Mock::given(method("POST"))
        .and(path("/results/0"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(broker.server())
        .await;

    let config = config(&provider)
        .with_broker(BrokerConfig::new(Url::parse(&broker.uri()).unwrap()))
        .with_provider_version("1.0.0")
        .with_publish_results(true);
    let recorder = CallRecorder::new();
    let verifier = Verifier::new(config).with_state_handlers(recording_handlers(&recorder));

    let outcome = verifier
        .verify(&[PactSource::Broker(BrokerSource::default())])
        .await
        .unwrap();

    assert!(outcome.local_pass);
    assert!(matches!(outcome.publish_error, Some(PublishError::Results { .. })));
    assert!(verifier.render(&outcome).contains("Publishing failed"));
}

#[tokio::test]
async fn test_pending_pact_failure_does_not_fail_run() {
    let provider = users_provider(json!({"id": "1", "name": "Alice"})).await;
    let broker = BrokerStub::start(vec![(user_pact(), true)]).await;

    let config = config(&provider).with_broker(BrokerConfig::new(Url::parse(&broker.uri()).unwrap()));
    let recorder = CallRecorder::new();
    let outcome = Verifier::new(config)
        .with_state_handlers(recording_handlers(&recorder))
        .verify(&[PactSource::Broker(BrokerSource::default().with_pending())])
        .await
        .unwrap();

    assert!(outcome.local_pass);
    assert_eq!(outcome.failure_count(), 1);
    assert!(outcome.warnings.iter().any(|w| w.contains("Pending")));
}

#[tokio::test]
async fn test_unreachable_broker_aborts_run() {
    let provider = users_provider(user_body()).await;
    let config = config(&provider).with_broker(BrokerConfig::new(Url::parse("http://127.0.0.1:1").unwrap()));

    let err = Verifier::new(config)
        .verify(&[PactSource::Broker(BrokerSource::default())])
        .await
        .unwrap_err();

    assert!(matches!(err, VerifierError::Load(LoadError::Fetch { .. })));
}

#[tokio::test]
async fn test_no_contracts_follows_policy() {
    let provider = users_provider(user_body()).await;
    let empty = PactSource::Dir(scratch_dir("e2e-empty"));

    let lenient = Verifier::new(config(&provider)).verify(&[empty.clone()]).await.unwrap();
    assert!(lenient.local_pass);
    assert!(!lenient.warnings.is_empty());

    let strict = Verifier::new(config(&provider).with_empty_contract_policy(EmptyContractPolicy::Fail))
        .verify(&[empty])
        .await
        .unwrap();
    assert!(!strict.local_pass);
}

#[tokio::test]
async fn test_redirect_is_recorded_not_followed() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/elsewhere"))
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body()))
        .expect(0)
        .mount(&provider)
        .await;

    let recorder = CallRecorder::new();
    let outcome = Verifier::new(config(&provider))
        .with_state_handlers(recording_handlers(&recorder))
        .verify(&[user_pact_dir()])
        .await
        .unwrap();

    let result = &outcome.contracts[0].interactions[0];
    assert!(result.mismatches.iter().any(|m| m.kind == MismatchKind::Status));
}
