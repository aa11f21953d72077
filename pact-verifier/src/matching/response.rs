//! Matching of a captured provider response against the expected response.

use serde_json::{Value, json};

use super::body::match_body;
use super::mismatch::{MatchResult, Mismatch, MismatchKind};
use super::path::DocPath;
use super::rules::RuleCategory;
use crate::contract::Response;
use crate::provider::ProviderResponse;

/// Match status, expected headers and body.
///
/// Every expected part is checked; mismatches from all parts are returned
/// together.
#[must_use]
pub fn match_response(expected: &Response, actual: &ProviderResponse) -> MatchResult {
    let mut mismatches = Vec::new();

    if expected.status != actual.status {
        mismatches.push(
            Mismatch::at(
                MismatchKind::Status,
                "status",
                format!("Expected status {} but was {}", expected.status, actual.status),
            )
            .with_expected(json!(expected.status))
            .with_actual(json!(actual.status)),
        );
    }

    for (name, value) in &expected.headers {
        if let Some(mismatch) = match_header(name, value, actual.header(name).as_deref(), &expected.matching_rules.header) {
            mismatches.push(mismatch);
        }
    }

    mismatches.extend(match_response_body(expected, actual));
    MatchResult::new(mismatches)
}

fn match_header(name: &str, expected: &str, actual: Option<&str>, rules: &RuleCategory) -> Option<Mismatch> {
    let Some(actual) = actual else {
        return Some(
            Mismatch::at(MismatchKind::Header, name, format!("Expected header '{name}' but it was missing"))
                .with_expected(json!(expected)),
        );
    };

    if let Some(list) = rules.for_name(name) {
        let path = DocPath::field(name);
        return list.check(&path, &json!(expected), &json!(actual)).err().map(|failures| {
            let message = failures.iter().map(|m| m.message.as_str()).collect::<Vec<_>>().join("; ");
            let rule = failures.iter().filter_map(|m| m.rule.clone()).collect::<Vec<_>>().join(", ");
            Mismatch::at(MismatchKind::Header, name, format!("Header '{name}': {message}"))
                .with_expected(json!(expected))
                .with_actual(json!(actual))
                .with_rule(rule)
        });
    }

    let matches = if name.eq_ignore_ascii_case("content-type") {
        content_type_matches(expected, actual)
    } else {
        split_values(expected) == split_values(actual)
    };
    if matches {
        None
    } else {
        Some(
            Mismatch::at(
                MismatchKind::Header,
                name,
                format!("Expected header '{name}' to have value '{expected}' but was '{actual}'"),
            )
            .with_expected(json!(expected))
            .with_actual(json!(actual)),
        )
    }
}

fn split_values(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).filter(|v| !v.is_empty()).collect()
}

/// Media types must be equal; every expected parameter must be present with
/// the same value. Extra actual parameters are allowed.
fn content_type_matches(expected: &str, actual: &str) -> bool {
    let (expected_media, expected_params) = parse_content_type(expected);
    let (actual_media, actual_params) = parse_content_type(actual);
    expected_media == actual_media
        && expected_params.iter().all(|(key, value)| {
            actual_params
                .iter()
                .any(|(k, v)| k == key && v.eq_ignore_ascii_case(value))
        })
}

fn parse_content_type(value: &str) -> (String, Vec<(String, String)>) {
    let mut parts = value.split(';');
    let media = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let params = parts
        .filter_map(|p| {
            let (key, value) = p.split_once('=')?;
            Some((key.trim().to_ascii_lowercase(), value.trim().trim_matches('"').to_string()))
        })
        .collect();
    (media, params)
}

fn match_response_body(expected: &Response, actual: &ProviderResponse) -> Vec<Mismatch> {
    let Some(expected_body) = &expected.body else {
        return Vec::new();
    };

    if actual.body.is_empty() {
        let expects_nothing = matches!(expected_body, Value::Null)
            || matches!(expected_body, Value::String(s) if s.is_empty());
        if expects_nothing {
            return Vec::new();
        }
        return vec![
            Mismatch::at(MismatchKind::Body, "$", "Expected a response body but received none")
                .with_expected(expected_body.clone()),
        ];
    }

    if expected.is_json() {
        return match serde_json::from_slice::<Value>(&actual.body) {
            Ok(actual_body) => match_body(expected_body, &actual_body, &expected.matching_rules.body),
            Err(e) => vec![
                Mismatch::at(MismatchKind::Body, "$", format!("Failed to parse the response body as JSON: {e}"))
                    .with_expected(expected_body.clone())
                    .with_actual(json!(actual.body_text())),
            ],
        };
    }

    let expected_text = match expected_body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let actual_text = actual.body_text();
    let root = DocPath::root();
    if let Some(list) = expected.matching_rules.body.exact(&root) {
        return list
            .check(&root, &json!(expected_text), &json!(actual_text))
            .err()
            .unwrap_or_default();
    }
    if expected_text == actual_text {
        Vec::new()
    } else {
        vec![
            Mismatch::at(MismatchKind::Body, "$", "Expected body did not match the actual body")
                .with_expected(json!(expected_text))
                .with_actual(json!(actual_text)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::rules::{MatchRule, RuleList};

    fn expected(status: u16, body: Option<Value>) -> Response {
        let mut response = Response {
            status,
            body,
            ..Response::default()
        };
        response
            .headers
            .insert("Content-Type".into(), "application/json".into());
        response
    }

    fn actual(status: u16, content_type: &str, body: &str) -> ProviderResponse {
        ProviderResponse {
            status,
            headers: vec![("content-type".into(), content_type.into())],
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_matching_response() {
        let result = match_response(
            &expected(200, Some(json!({"id": 1}))),
            &actual(200, "application/json; charset=utf-8", "{\"id\":1,\"extra\":true}"),
        );
        assert!(result.is_match(), "{:?}", result.mismatches);
    }

    #[test]
    fn test_status_and_body_mismatches_are_combined() {
        let result = match_response(
            &expected(200, Some(json!({"id": 1}))),
            &actual(404, "application/json", "{\"id\":\"1\"}"),
        );
        assert_eq!(result.mismatches.len(), 2);
        assert_eq!(result.mismatches[0].kind, MismatchKind::Status);
        assert_eq!(result.mismatches[1].kind, MismatchKind::TypeMismatch);
        assert_eq!(result.mismatches[1].path, "$.id");
    }

    #[test]
    fn test_content_type_parameters() {
        assert!(content_type_matches("application/json", "application/json;charset=UTF-8"));
        assert!(content_type_matches("application/json; charset=utf-8", "Application/JSON; charset=UTF-8"));
        assert!(!content_type_matches("application/json; charset=utf-8", "application/json"));
        assert!(!content_type_matches("application/json", "text/plain"));
    }

    #[test]
    fn test_missing_header() {
        let mut response = expected(200, None);
        response.headers.insert("X-Request-Id".into(), "abc".into());
        let result = match_response(&response, &actual(200, "application/json", ""));
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].kind, MismatchKind::Header);
        assert_eq!(result.mismatches[0].path, "X-Request-Id");
    }

    #[test]
    fn test_header_list_normalisation_and_rules() {
        let mut response = expected(200, None);
        response.headers.insert("Allow".into(), "GET,POST".into());
        response.headers.insert("X-Trace".into(), "abc-123".into());
        response.matching_rules.header.insert(
            DocPath::field("x-trace"),
            RuleList::single(MatchRule::Regex("[a-z]+-\\d+".into())),
        );
        let mut provider = actual(200, "application/json", "");
        provider.headers.push(("allow".into(), "GET, POST".into()));
        provider.headers.push(("x-trace".into(), "zzz-999".into()));
        assert!(match_response(&response, &provider).is_match());

        provider.headers.pop();
        provider.headers.push(("x-trace".into(), "nope".into()));
        let result = match_response(&response, &provider);
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].rule.as_deref(), Some("regex([a-z]+-\\d+)"));
    }

    #[test]
    fn test_empty_and_unparseable_bodies() {
        let response = expected(200, Some(json!({"id": 1})));
        let result = match_response(&response, &actual(200, "application/json", ""));
        assert_eq!(result.mismatches[0].kind, MismatchKind::Body);

        let result = match_response(&response, &actual(200, "application/json", "<html>"));
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].kind, MismatchKind::Body);
    }

    #[test]
    fn test_text_body() {
        let mut response = Response {
            status: 200,
            body: Some(json!("pong")),
            ..Response::default()
        };
        response.headers.insert("Content-Type".into(), "text/plain".into());
        assert!(match_response(&response, &actual(200, "text/plain", "pong")).is_match());
        assert!(!match_response(&response, &actual(200, "text/plain", "ping")).is_match());

        response
            .matching_rules
            .body
            .insert(DocPath::root(), RuleList::single(MatchRule::Regex("p.ng".into())));
        assert!(match_response(&response, &actual(200, "text/plain", "ping")).is_match());
    }

    #[test]
    fn test_no_expected_body_ignores_actual() {
        let response = expected(204, None);
        assert!(match_response(&response, &actual(204, "application/json", "{\"anything\":1}")).is_match());
    }
}
