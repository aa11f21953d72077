//! Pact fixtures.
//!
//! The canonical fixture is the `web` consumer's pact with the `users`
//! provider: `GET /users/1` in state `user 1 exists`, answered with a JSON
//! user whose `id` and `name` are matched by type.
//!
//! The account fixture exercises every body matcher at once: decimals,
//! timestamps with a generator, equality, array bounds, substrings and
//! `arrayContains` over mixed element types.

use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Consumer of the canonical fixture.
pub const CONSUMER: &str = "web";
/// Provider of the canonical fixture.
pub const PROVIDER: &str = "users";
/// State of the canonical interaction.
pub const USER_STATE: &str = "user 1 exists";
/// Description of the canonical interaction.
pub const USER_INTERACTION: &str = "get user 1";

/// The user a correct provider returns for `/users/1`.
#[must_use]
pub fn user_body() -> Value {
    json!({"id": 1, "name": "Alice", "email": "alice@example.com"})
}

/// The canonical `GET /users/1` interaction (V3 format).
#[must_use]
pub fn user_interaction() -> Value {
    json!({
        "description": USER_INTERACTION,
        "providerStates": [{"name": USER_STATE}],
        "request": {"method": "GET", "path": "/users/1"},
        "response": {
            "status": 200,
            "headers": {"Content-Type": "application/json"},
            "body": {"id": 1, "name": "Alice"},
            "matchingRules": {
                "body": {
                    "$.id": {"matchers": [{"match": "type"}]},
                    "$.name": {"matchers": [{"match": "type"}]}
                }
            }
        }
    })
}

/// The canonical pact document.
#[must_use]
pub fn user_pact() -> Value {
    PactBuilder::new(CONSUMER, PROVIDER)
        .interaction(user_interaction())
        .build()
}

/// Consumer of the account fixture.
pub const ACCOUNT_CONSUMER: &str = "account-ui";
/// Provider of the account fixture.
pub const ACCOUNT_PROVIDER: &str = "account-api";
/// State of the account interaction.
pub const ACCOUNT_STATE: &str = "User foo exists";

/// The account a correct provider returns for `/users/10`.
#[must_use]
pub fn account_body() -> Value {
    json!({
        "accountBalance": 123.76,
        "datetime": "2020-01-01",
        "equality": "a thing",
        "id": 12,
        "itemsMin": ["thereshouldbe3ofthese", "thereshouldbe3ofthese", "thereshouldbe3ofthese"],
        "itemsMinMax": [27, 27, 27, 27, 27],
        "lastName": "Sampson",
        "name": "Billy",
        "superstring": "foo",
        "arrayContaining": ["string", 1, {"foo": "bar"}]
    })
}

/// The `GET /users/10` account interaction, recorded with matchers.
#[must_use]
pub fn account_interaction() -> Value {
    let type_rule = json!({"matchers": [{"match": "type"}]});
    json!({
        "description": "A request to do a foo",
        "providerStates": [{"name": ACCOUNT_STATE, "params": {"id": 10}}],
        "request": {
            "method": "GET",
            "path": "/users/10",
            "headers": {"Authorization": "Bearer 1234"}
        },
        "response": {
            "status": 200,
            "headers": {"Content-Type": "application/json"},
            "body": {
                "accountBalance": 123.76,
                "datetime": "2020-01-01",
                "equality": "a thing",
                "id": 27,
                "itemsMin": ["thereshouldbe3ofthese", "thereshouldbe3ofthese", "thereshouldbe3ofthese"],
                "itemsMinMax": [27, 27, 27],
                "lastName": "Sampson",
                "name": "billy",
                "superstring": "foo",
                "arrayContaining": ["string", 1, {"foo": "bar"}]
            },
            "matchingRules": {
                "body": {
                    "$.accountBalance": {"combine": "AND", "matchers": [{"match": "decimal"}]},
                    "$.datetime": {
                        "combine": "AND",
                        "matchers": [{"match": "timestamp", "format": "yyyy-MM-dd"}]
                    },
                    "$.equality": {"combine": "AND", "matchers": [{"match": "equality"}]},
                    "$.id": {"combine": "AND", "matchers": [{"match": "integer"}]},
                    "$.itemsMin": {"combine": "AND", "matchers": [{"match": "type", "min": 3}]},
                    "$.itemsMinMax": {"combine": "AND", "matchers": [{"match": "type", "min": 3, "max": 5}]},
                    "$.lastName": {"combine": "AND", "matchers": [{"match": "regex", "regex": "[A-Za-z]+"}]},
                    "$.name": type_rule.clone(),
                    "$.superstring": {"combine": "AND", "matchers": [{"match": "include", "value": "foo"}]},
                    "$.arrayContaining": {
                        "combine": "AND",
                        "matchers": [{
                            "match": "arrayContains",
                            "variants": [
                                {"index": 0, "rules": {"$": type_rule.clone()}},
                                {"index": 1, "rules": {"$": {"matchers": [{"match": "integer"}]}}},
                                {"index": 2, "rules": {"$.foo": type_rule}}
                            ]
                        }]
                    }
                }
            },
            "generators": {
                "body": {"$.datetime": {"type": "DateTime", "format": "yyyy-MM-dd"}}
            }
        }
    })
}

/// The account pact document.
#[must_use]
pub fn account_pact() -> Value {
    PactBuilder::new(ACCOUNT_CONSUMER, ACCOUNT_PROVIDER)
        .interaction(account_interaction())
        .build()
}

/// Builds pact documents for tests.
#[derive(Debug, Clone)]
pub struct PactBuilder {
    consumer: String,
    provider: String,
    interactions: Vec<Value>,
    spec_version: String,
}

impl PactBuilder {
    /// Pact between two participants, no interactions, V3.
    #[must_use]
    pub fn new(consumer: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            provider: provider.into(),
            interactions: Vec::new(),
            spec_version: "3.0.0".to_string(),
        }
    }

    /// Append an interaction.
    #[must_use]
    pub fn interaction(mut self, interaction: Value) -> Self {
        self.interactions.push(interaction);
        self
    }

    /// Declare a different specification version.
    #[must_use]
    pub fn with_spec_version(mut self, version: impl Into<String>) -> Self {
        self.spec_version = version.into();
        self
    }

    /// Render the document.
    #[must_use]
    pub fn build(self) -> Value {
        json!({
            "consumer": {"name": self.consumer},
            "provider": {"name": self.provider},
            "interactions": self.interactions,
            "metadata": {"pactSpecification": {"version": self.spec_version}}
        })
    }
}

/// Create a fresh, unique directory under the system temp dir.
///
/// # Panics
///
/// Panics if the directory cannot be created.
#[must_use]
#[allow(clippy::expect_used)]
pub fn scratch_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Write a pact document to `dir/name`, returning the file path.
///
/// # Panics
///
/// Panics if the file cannot be written.
#[allow(clippy::expect_used)]
pub fn write_pact(dir: &Path, name: &str, pact: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pact.to_string()).expect("write pact");
    path
}
