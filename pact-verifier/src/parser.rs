//! Parsing of pact documents (specification V1 to V4) into [`Contract`].
//!
//! All versions are normalised into the same interaction shape. V4
//! documents may contain message interactions; only synchronous HTTP
//! interactions are verified, others are skipped with a warning.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::contract::{
    Contract, ContractMetadata, Interaction, Participant, ProviderState, Request, Response, SpecVersion,
};
use crate::error::LoadError;
use crate::generators::Generators;
use crate::matching::{DocPath, MatchingRules, PathToken, RuleCategory, RuleList};

const V4_HTTP: &str = "Synchronous/HTTP";

/// Parse pact JSON text.
///
/// # Errors
///
/// Returns [`LoadError`] for invalid JSON, malformed documents and
/// unsupported specification versions.
pub fn parse_pact_str(text: &str, origin: &str) -> Result<Contract, LoadError> {
    let json: Value = serde_json::from_str(text).map_err(|e| LoadError::malformed(origin, e.to_string()))?;
    parse_pact(&json, origin)
}

/// Parse a pact document.
///
/// # Errors
///
/// Returns [`LoadError`] for malformed documents and unsupported
/// specification versions.
pub fn parse_pact(json: &Value, origin: &str) -> Result<Contract, LoadError> {
    let Value::Object(doc) = json else {
        return Err(LoadError::malformed(origin, "document is not a JSON object"));
    };

    let spec_version = spec_version(doc, origin)?;
    let consumer = participant(doc, "consumer", origin)?;
    let provider = participant(doc, "provider", origin)?;

    let raw_interactions = match doc.get("interactions") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(LoadError::malformed(origin, "'interactions' is not an array")),
        None => &[],
    };

    let mut interactions = Vec::with_capacity(raw_interactions.len());
    for (index, raw) in raw_interactions.iter().enumerate() {
        let Value::Object(raw) = raw else {
            return Err(LoadError::malformed(origin, format!("interaction {index} is not an object")));
        };
        match raw.get("type").and_then(Value::as_str) {
            Some(kind) if kind != V4_HTTP => {
                warn!(origin, interaction = index, kind, "Skipping non-HTTP interaction");
                continue;
            }
            _ => {}
        }
        let interaction = parse_interaction(raw, spec_version)
            .map_err(|reason| LoadError::malformed(origin, format!("interaction {index}: {reason}")))?;
        interactions.push(interaction);
    }

    debug!(
        origin,
        consumer = %consumer.name,
        provider = %provider.name,
        version = %spec_version,
        interactions = interactions.len(),
        "Parsed pact"
    );

    Ok(Contract {
        consumer,
        provider,
        interactions,
        metadata: ContractMetadata { spec_version },
    })
}

fn spec_version(doc: &Map<String, Value>, origin: &str) -> Result<SpecVersion, LoadError> {
    let Some(metadata) = doc.get("metadata").and_then(Value::as_object) else {
        return Ok(SpecVersion::default());
    };
    let declared = ["pactSpecification", "pact-specification", "pactSpecificationVersion"]
        .iter()
        .find_map(|key| match metadata.get(*key) {
            Some(Value::Object(spec)) => spec.get("version").and_then(Value::as_str),
            Some(Value::String(version)) => Some(version.as_str()),
            _ => None,
        });
    match declared {
        None => Ok(SpecVersion::default()),
        Some(version) => SpecVersion::parse(version).ok_or_else(|| LoadError::UnsupportedVersion {
            origin: origin.to_string(),
            version: version.to_string(),
        }),
    }
}

fn participant(doc: &Map<String, Value>, role: &str, origin: &str) -> Result<Participant, LoadError> {
    doc.get(role)
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .map(Participant::new)
        .ok_or_else(|| LoadError::malformed(origin, format!("missing {role} name")))
}

fn parse_interaction(raw: &Map<String, Value>, version: SpecVersion) -> Result<Interaction, String> {
    let description = raw
        .get("description")
        .and_then(Value::as_str)
        .ok_or("missing description")?
        .to_string();

    let request = raw
        .get("request")
        .and_then(Value::as_object)
        .ok_or_else(|| format!("'{description}' has no request"))?;
    let response = raw
        .get("response")
        .and_then(Value::as_object)
        .ok_or_else(|| format!("'{description}' has no response"))?;

    Ok(Interaction {
        provider_states: provider_states(raw)?,
        request: parse_request(request, version).map_err(|e| format!("'{description}' request: {e}"))?,
        response: parse_response(response, version).map_err(|e| format!("'{description}' response: {e}"))?,
        pending: raw.get("pending").and_then(Value::as_bool).unwrap_or(false),
        description,
    })
}

fn provider_states(raw: &Map<String, Value>) -> Result<Vec<ProviderState>, String> {
    if let Some(states) = raw.get("providerStates") {
        let Value::Array(states) = states else {
            return Err("'providerStates' is not an array".to_string());
        };
        return states
            .iter()
            .map(|state| {
                let name = state
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("provider state without a name")?;
                let params = state.get("params").and_then(Value::as_object).cloned().unwrap_or_default();
                Ok(ProviderState {
                    name: name.to_string(),
                    params,
                })
            })
            .collect();
    }

    let legacy = raw
        .get("providerState")
        .or_else(|| raw.get("provider_state"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty());
    Ok(legacy.map(ProviderState::named).into_iter().collect())
}

fn parse_request(raw: &Map<String, Value>, version: SpecVersion) -> Result<Request, String> {
    let method = raw
        .get("method")
        .and_then(Value::as_str)
        .ok_or("missing method")?
        .to_ascii_uppercase();
    let path = raw.get("path").and_then(Value::as_str).unwrap_or("/").to_string();
    let mut headers = parse_headers(raw.get("headers"))?;
    let body = parse_body(raw.get("body"), version, &mut headers)?;

    Ok(Request {
        method,
        path,
        query: parse_query(raw.get("query"))?,
        headers,
        body,
        matching_rules: parse_matching_rules(raw.get("matchingRules"))?,
        generators: parse_generators(raw.get("generators"))?,
    })
}

fn parse_response(raw: &Map<String, Value>, version: SpecVersion) -> Result<Response, String> {
    let status = match raw.get("status") {
        None => 200,
        Some(status) => status
            .as_u64()
            .and_then(|s| u16::try_from(s).ok())
            .ok_or_else(|| format!("invalid status {status}"))?,
    };
    let mut headers = parse_headers(raw.get("headers"))?;
    let body = parse_body(raw.get("body"), version, &mut headers)?;

    Ok(Response {
        status,
        headers,
        body,
        matching_rules: parse_matching_rules(raw.get("matchingRules"))?,
        generators: parse_generators(raw.get("generators"))?,
    })
}

fn parse_headers(raw: Option<&Value>) -> Result<BTreeMap<String, String>, String> {
    let Some(raw) = raw else {
        return Ok(BTreeMap::new());
    };
    let Value::Object(map) = raw else {
        return Err("headers are not an object".to_string());
    };
    map.iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Array(values) => values
                    .iter()
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            Ok((name.clone(), value))
        })
        .collect()
}

fn parse_query(raw: Option<&Value>) -> Result<BTreeMap<String, Vec<String>>, String> {
    let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
    match raw {
        None | Some(Value::Null) => {}
        Some(Value::String(text)) => {
            for (name, value) in url::form_urlencoded::parse(text.trim_start_matches('?').as_bytes()) {
                query.entry(name.into_owned()).or_default().push(value.into_owned());
            }
        }
        Some(Value::Object(map)) => {
            for (name, values) in map {
                let values = match values {
                    Value::Array(items) => items
                        .iter()
                        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                        .collect(),
                    Value::String(s) => vec![s.clone()],
                    other => vec![other.to_string()],
                };
                query.insert(name.clone(), values);
            }
        }
        Some(_) => return Err("query is neither a string nor an object".to_string()),
    }
    Ok(query)
}

/// V4 bodies are `{content, contentType, encoded}`; older versions store
/// the body directly.
fn parse_body(
    raw: Option<&Value>,
    version: SpecVersion,
    headers: &mut BTreeMap<String, String>,
) -> Result<Option<Value>, String> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let v4_body = match raw {
        Value::Object(map) if version == SpecVersion::V4 && map.contains_key("content") => map,
        _ => return Ok(Some(raw.clone())),
    };

    let content_type = v4_body.get("contentType").and_then(Value::as_str);
    let has_content_type = headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"));
    if let (Some(content_type), false) = (content_type, has_content_type) {
        headers.insert("Content-Type".to_string(), content_type.to_string());
    }
    let is_json = content_type.is_some_and(|ct| ct.contains("json"));
    let content = v4_body.get("content").cloned().unwrap_or(Value::Null);

    let encoded = match v4_body.get("encoded") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(encoding)) => encoding.eq_ignore_ascii_case("base64"),
        _ => false,
    };
    if !encoded {
        return Ok(Some(content));
    }

    let text = content.as_str().ok_or("encoded body content is not a string")?;
    let bytes = BASE64.decode(text).map_err(|e| format!("invalid base64 body: {e}"))?;
    if is_json {
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| format!("encoded JSON body does not parse: {e}"))
    } else {
        Ok(Some(Value::String(String::from_utf8_lossy(&bytes).into_owned())))
    }
}

fn parse_matching_rules(raw: Option<&Value>) -> Result<MatchingRules, String> {
    let Some(raw) = raw else {
        return Ok(MatchingRules::default());
    };
    let Value::Object(map) = raw else {
        return Err("matchingRules is not an object".to_string());
    };
    if map.keys().any(|key| key.starts_with('$')) {
        parse_flat_rules(map)
    } else {
        parse_categorised_rules(map)
    }
}

/// V2: `{"$.body.id": {...}, "$.headers.Accept": {...}, "$.path": {...}}`.
fn parse_flat_rules(map: &Map<String, Value>) -> Result<MatchingRules, String> {
    let body_root = DocPath::field("body");
    let mut rules = MatchingRules::default();

    for (key, entry) in map {
        let path = DocPath::parse(key).map_err(|e| e.to_string())?;
        let list = RuleList::from_json(entry).map_err(|e| format!("invalid matcher at '{key}': {e}"))?;
        match path.tokens() {
            [PathToken::Root, PathToken::Field(category), rest @ ..] => match (category.as_str(), rest) {
                ("body", _) => {
                    let relative = path.strip_prefix(&body_root).ok_or_else(|| format!("bad body path '{key}'"))?;
                    rules.body.insert(relative, list);
                }
                ("headers" | "header", [PathToken::Field(name), ..]) => rules.header.insert(DocPath::field(name), list),
                ("query", [PathToken::Field(name), ..]) => rules.query.insert(DocPath::field(name), list),
                ("path", []) => rules.path.insert(DocPath::root(), list),
                _ => warn!(key, "Ignoring matching rule with unknown category"),
            },
            _ => warn!(key, "Ignoring matching rule with unknown category"),
        }
    }
    Ok(rules)
}

/// V3/V4: `{"body": {"$.id": {"matchers": [...]}}, "path": {"matchers": [...]}}`.
fn parse_categorised_rules(map: &Map<String, Value>) -> Result<MatchingRules, String> {
    let mut rules = MatchingRules::default();
    for (category, entries) in map {
        match category.as_str() {
            "path" => {
                let list = RuleList::from_json(entries).map_err(|e| format!("invalid path matcher: {e}"))?;
                rules.path.insert(DocPath::root(), list);
            }
            "body" | "header" | "headers" | "query" => {
                let Value::Object(entries) = entries else {
                    return Err(format!("'{category}' rules are not an object"));
                };
                let parsed = RuleCategory::from_json(entries).map_err(|e| e.to_string())?;
                let target = match category.as_str() {
                    "body" => &mut rules.body,
                    "query" => &mut rules.query,
                    _ => &mut rules.header,
                };
                for (path, list) in parsed.iter() {
                    target.insert(path.clone(), list.clone());
                }
            }
            other => debug!(category = other, "Ignoring matching rule category"),
        }
    }
    Ok(rules)
}

fn parse_generators(raw: Option<&Value>) -> Result<Generators, String> {
    match raw {
        None | Some(Value::Null) => Ok(Generators::default()),
        Some(Value::Object(map)) => Generators::from_json(map),
        Some(_) => Err("generators is not an object".to_string()),
    }
}
