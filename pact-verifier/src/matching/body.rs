//! Recursive structural comparison of JSON bodies.
//!
//! The walk follows the expected document. At every node the rules are
//! resolved for the concrete path; without rules the node must equal the
//! expected value literally. Mismatches are accumulated, never
//! short-circuited.

use serde_json::{Map, Value};

use super::mismatch::{ElementFailure, Mismatch, MismatchKind};
use super::path::DocPath;
use super::rules::{ContainsVariant, MatchRule, RuleCategory, RuleList, describe, json_kind, values_equal};

/// Compare `actual` against `expected` under `rules`.
///
/// Returns every mismatch found, in document order.
#[must_use]
pub fn match_body(expected: &Value, actual: &Value, rules: &RuleCategory) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    BodyMatcher { rules }.compare(&DocPath::root(), expected, actual, &mut mismatches);
    mismatches
}

/// How children of a container are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Structure {
    /// No rule: keys required, arrays compared pairwise with equal length
    Literal,
    /// Equality: additionally no unexpected keys
    Strict,
    /// Type family: arrays matched element-wise against a template
    ByType,
}

struct BodyMatcher<'a> {
    rules: &'a RuleCategory,
}

impl BodyMatcher<'_> {
    fn compare(&self, path: &DocPath, expected: &Value, actual: &Value, out: &mut Vec<Mismatch>) {
        match self.rules.resolve(path) {
            None => self.compare_node(path, expected, actual, Structure::Literal, out),
            Some(resolved) if resolved.inherited => match resolved.list.inherited_rule() {
                MatchRule::Equality => self.compare_node(path, expected, actual, Structure::Strict, out),
                _ => self.compare_node(path, expected, actual, Structure::ByType, out),
            },
            Some(resolved) => self.compare_with_rules(path, expected, actual, resolved.list, out),
        }
    }

    /// Compare a node with no rules of its own, or under an inherited rule.
    fn compare_node(
        &self,
        path: &DocPath,
        expected: &Value,
        actual: &Value,
        structure: Structure,
        out: &mut Vec<Mismatch>,
    ) {
        match (expected, actual) {
            (Value::Object(e), Value::Object(a)) => self.compare_objects(path, e, a, structure, out),
            (Value::Array(e), Value::Array(a)) => self.compare_arrays(path, e, a, structure, out),
            _ if json_kind(expected) != json_kind(actual) => out.push(type_mismatch(path, expected, actual)),
            _ if structure == Structure::ByType => {}
            _ if values_equal(expected, actual) => {}
            _ => out.push(
                Mismatch::new(
                    MismatchKind::ValueMismatch,
                    path,
                    format!("Expected {} to equal {}", describe(actual), describe(expected)),
                )
                .with_expected(expected.clone())
                .with_actual(actual.clone()),
            ),
        }
    }

    fn compare_with_rules(
        &self,
        path: &DocPath,
        expected: &Value,
        actual: &Value,
        list: &RuleList,
        out: &mut Vec<Mismatch>,
    ) {
        let is_container = expected.is_object() || expected.is_array();
        if !is_container {
            if let Err(mismatches) = list.check(path, expected, actual) {
                out.extend(mismatches);
            }
            return;
        }

        // Node-level checks: container rules only look at kind or length here,
        // children are walked below.
        let node_list = RuleList {
            rules: list
                .rules
                .iter()
                .map(|rule| match rule {
                    MatchRule::Equality | MatchRule::ArrayContaining(_) => MatchRule::Type,
                    other => other.clone(),
                })
                .collect(),
            logic: list.logic,
        };
        if let Err(mismatches) = node_list.check(path, expected, actual) {
            out.extend(mismatches);
            return;
        }

        let contains = list.rules.iter().find_map(|rule| match rule {
            MatchRule::ArrayContaining(variants) => Some(variants),
            _ => None,
        });
        if let (Some(variants), Value::Array(e), Value::Array(a)) = (contains, expected, actual) {
            Self::check_contains(path, e, a, variants, out);
            return;
        }

        let structure = if list.is_equality() {
            Structure::Strict
        } else if list.cascades() {
            Structure::ByType
        } else {
            Structure::Literal
        };
        match (expected, actual) {
            (Value::Object(e), Value::Object(a)) => self.compare_objects(path, e, a, structure, out),
            (Value::Array(e), Value::Array(a)) => self.compare_arrays(path, e, a, structure, out),
            _ => {}
        }
    }

    fn compare_objects(
        &self,
        path: &DocPath,
        expected: &Map<String, Value>,
        actual: &Map<String, Value>,
        structure: Structure,
        out: &mut Vec<Mismatch>,
    ) {
        for (key, expected_value) in expected {
            let child = path.join(key);
            match actual.get(key) {
                Some(actual_value) => self.compare(&child, expected_value, actual_value, out),
                None if self.is_optional(&child, expected_value) => {}
                None => out.push(
                    Mismatch::new(
                        MismatchKind::MissingKey,
                        &child,
                        format!("Expected key '{key}' but it was missing"),
                    )
                    .with_expected(expected_value.clone()),
                ),
            }
        }

        if structure == Structure::Strict {
            for (key, actual_value) in actual {
                if !expected.contains_key(key) {
                    out.push(
                        Mismatch::new(
                            MismatchKind::UnexpectedKey,
                            &path.join(key),
                            format!("Did not expect key '{key}'"),
                        )
                        .with_actual(actual_value.clone())
                        .with_rule("equality"),
                    );
                }
            }
        }
    }

    fn compare_arrays(
        &self,
        path: &DocPath,
        expected: &[Value],
        actual: &[Value],
        structure: Structure,
        out: &mut Vec<Mismatch>,
    ) {
        if structure == Structure::ByType {
            let Some(first) = expected.first() else {
                return;
            };
            for (index, item) in actual.iter().enumerate() {
                let template = if self.rules.has_index_rule(path, index) {
                    expected.get(index).unwrap_or(first)
                } else {
                    first
                };
                self.compare(&path.join_index(index), template, item, out);
            }
            return;
        }

        if expected.len() != actual.len() {
            out.push(
                Mismatch::new(
                    MismatchKind::LengthMismatch,
                    path,
                    format!(
                        "Expected an array of length {} but received {} element(s)",
                        expected.len(),
                        actual.len()
                    ),
                )
                .with_expected(Value::Array(expected.to_vec()))
                .with_actual(Value::Array(actual.to_vec())),
            );
        }
        for (index, (e, a)) in expected.iter().zip(actual).enumerate() {
            self.compare(&path.join_index(index), e, a, out);
        }
    }

    fn check_contains(
        path: &DocPath,
        expected: &[Value],
        actual: &[Value],
        variants: &[ContainsVariant],
        out: &mut Vec<Mismatch>,
    ) {
        for variant in variants {
            let Some(template) = expected.get(variant.index) else {
                out.push(
                    Mismatch::new(
                        MismatchKind::VerificationError,
                        path,
                        format!("arrayContains variant refers to missing expected element {}", variant.index),
                    )
                    .with_rule("arrayContains"),
                );
                continue;
            };

            let mut elements = Vec::with_capacity(actual.len());
            let mut found = false;
            for (index, item) in actual.iter().enumerate() {
                let mismatches = match_body(template, item, &variant.rules);
                if mismatches.is_empty() {
                    found = true;
                    break;
                }
                elements.push(ElementFailure { index, mismatches });
            }

            if !found {
                out.push(
                    Mismatch::new(
                        MismatchKind::NoMatchingElement { elements },
                        path,
                        format!("No matching element found for {}", describe(template)),
                    )
                    .with_expected(template.clone())
                    .with_actual(Value::Array(actual.to_vec()))
                    .with_rule("arrayContains"),
                );
            }
        }
    }

    /// A key may be absent when its own rules explicitly accept null.
    fn is_optional(&self, path: &DocPath, expected: &Value) -> bool {
        self.rules.exact(path).is_some_and(|list| {
            list.rules.iter().any(|r| matches!(r, MatchRule::Null))
                && list.check(path, expected, &Value::Null).is_ok()
        })
    }
}

fn type_mismatch(path: &DocPath, expected: &Value, actual: &Value) -> Mismatch {
    Mismatch::new(
        MismatchKind::TypeMismatch,
        path,
        format!("Expected {} to be the same type as {}", describe(actual), describe(expected)),
    )
    .with_expected(expected.clone())
    .with_actual(actual.clone())
}
