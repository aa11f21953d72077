//! Pact contract types.
//!
//! Every supported pact specification version is normalised into these
//! types by [`crate::parser`]. A loaded contract is never mutated; the
//! runner works on copies when generators apply.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::generators::Generators;
use crate::matching::MatchingRules;

/// A pact contract between a consumer and a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    /// Consumer participant
    pub consumer: Participant,
    /// Provider participant
    pub provider: Participant,
    /// Interactions, in file order
    pub interactions: Vec<Interaction>,
    /// Contract metadata
    pub metadata: ContractMetadata,
}

/// A participant in a contract (consumer or provider).
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Participant {
    /// Participant name
    pub name: String,
}

impl Participant {
    /// Create a new participant.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Contract metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractMetadata {
    /// Pact specification the document was written in
    pub spec_version: SpecVersion,
}

/// Supported pact specification versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpecVersion {
    /// 1.x, read with the V2 rules
    V1,
    /// 2.x, also assumed when a document has no metadata
    #[default]
    V2,
    /// 3.x
    V3,
    /// 4.x
    V4,
}

impl SpecVersion {
    /// Parse `"3.0.0"`, `"2.0"`, `"4"` and similar.
    #[must_use]
    pub fn parse(version: &str) -> Option<Self> {
        let major = version.trim().trim_start_matches(['v', 'V']).split('.').next()?;
        match major {
            "1" => Some(Self::V1),
            "2" => Some(Self::V2),
            "3" => Some(Self::V3),
            "4" => Some(Self::V4),
            _ => None,
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = match self {
            Self::V1 => "1.0.0",
            Self::V2 => "2.0.0",
            Self::V3 => "3.0.0",
            Self::V4 => "4.0",
        };
        f.write_str(version)
    }
}

/// An interaction in a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    /// Interaction description
    pub description: String,
    /// Provider states that must hold before the request is sent
    pub provider_states: Vec<ProviderState>,
    /// Expected request
    pub request: Request,
    /// Expected response
    pub response: Response,
    /// V4 per-interaction pending flag
    pub pending: bool,
}

impl Interaction {
    /// Comma separated state names, for logs and reports.
    #[must_use]
    pub fn state_names(&self) -> String {
        self.provider_states
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A named provider state with parameters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProviderState {
    /// State name; empty means no precondition
    pub name: String,
    /// Parameters passed to the state handler
    pub params: Map<String, Value>,
}

impl ProviderState {
    /// A state without parameters.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Expected request of an interaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// HTTP method, upper case
    pub method: String,
    /// Request path
    pub path: String,
    /// Query parameters; a name may repeat
    pub query: BTreeMap<String, Vec<String>>,
    /// Request headers; repeated values joined with `", "`
    pub headers: BTreeMap<String, String>,
    /// Request body: parsed JSON, or a string for other content types
    pub body: Option<Value>,
    /// Matching rules (used by consumers; kept for completeness)
    pub matching_rules: MatchingRules,
    /// Generators applied before sending
    pub generators: Generators,
}

impl Request {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Whether the body should be sent as JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        is_json(self.header("Content-Type"), self.body.as_ref())
    }
}

/// Expected response of an interaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Response body: parsed JSON, or a string for other content types
    pub body: Option<Value>,
    /// Matching rules relaxing the comparison
    pub matching_rules: MatchingRules,
    /// Generators applied to the expected values before matching
    pub generators: Generators,
}

impl Response {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Whether the expected body is JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        is_json(self.header("Content-Type"), self.body.as_ref())
    }
}

fn find_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn is_json(content_type: Option<&str>, body: Option<&Value>) -> bool {
    match content_type {
        Some(ct) => {
            let media = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
            media == "application/json" || media.ends_with("+json") || media.ends_with("/json")
        }
        None => matches!(body, Some(Value::Object(_) | Value::Array(_))),
    }
}
