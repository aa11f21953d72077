//! Property-based tests for the matcher engine.
//!
//! Tests validate:
//! - Equal documents never mismatch
//! - Every missing key is reported, and checking continues past it
//! - Minimum length bounds
//! - Type rules accept any value of the expected kind and nothing else

use pact_verifier::matching::{DocPath, MatchRule, MismatchKind, RuleCategory, RuleList, match_body};
use proptest::prelude::*;
use serde_json::{Value, json};
use test_utils::{json_object_strategy, json_value_strategy};

fn rules_at(expression: &str, rule: MatchRule) -> RuleCategory {
    let mut rules = RuleCategory::default();
    rules.insert(DocPath::parse(expression).unwrap(), RuleList::single(rule));
    rules
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Matching a document against itself yields no mismatches.
    #[test]
    fn prop_self_match_is_clean(value in json_value_strategy()) {
        let mismatches = match_body(&value, &value, &RuleCategory::default());
        prop_assert!(mismatches.is_empty(), "{mismatches:?}");
    }

    /// Removing k keys from the actual object yields exactly k MissingKey
    /// mismatches and nothing else.
    #[test]
    fn prop_each_missing_key_reported(
        expected in json_object_strategy(1, 8),
        drop in any::<prop::sample::Index>(),
        count in 1usize..8,
    ) {
        let keys: Vec<String> = expected.keys().cloned().collect();
        let k = count.min(keys.len());
        let start = drop.index(keys.len());
        let removed: Vec<&String> = (0..k).map(|i| &keys[(start + i) % keys.len()]).collect();

        let mut actual = expected.clone();
        for key in &removed {
            actual.remove(key.as_str());
        }

        let mismatches = match_body(&Value::Object(expected), &Value::Object(actual), &RuleCategory::default());
        prop_assert_eq!(mismatches.len(), k);
        prop_assert!(mismatches.iter().all(|m| m.kind == MismatchKind::MissingKey));
        for key in removed {
            let path = format!("$.{key}");
            prop_assert!(mismatches.iter().any(|m| m.path == path));
        }
    }

    /// A minimum length of 3 accepts arrays of at least 3 elements.
    #[test]
    fn prop_min_length_bound(items in prop::collection::vec(any::<i32>(), 0..8)) {
        let expected = json!({"items": [1]});
        let actual = json!({"items": items});
        let mismatches = match_body(&expected, &actual, &rules_at("$.items", MatchRule::MinLength(3)));

        if items.len() >= 3 {
            prop_assert!(mismatches.is_empty(), "{mismatches:?}");
        } else {
            prop_assert_eq!(mismatches.len(), 1);
            prop_assert_eq!(&mismatches[0].kind, &MismatchKind::MinLength);
        }
    }

    /// A type rule accepts any integer where an integer was expected.
    #[test]
    fn prop_type_rule_accepts_same_kind(expected in any::<i64>(), actual in any::<i64>()) {
        let mismatches = match_body(
            &json!({"id": expected}),
            &json!({"id": actual}),
            &rules_at("$.id", MatchRule::Type),
        );
        prop_assert!(mismatches.is_empty());
    }

    /// A type rule rejects a string that merely looks like the number.
    #[test]
    fn prop_type_rule_rejects_numeric_strings(id in any::<i64>()) {
        let mismatches = match_body(
            &json!({"id": id}),
            &json!({"id": id.to_string()}),
            &rules_at("$.id", MatchRule::Type),
        );
        prop_assert_eq!(mismatches.len(), 1);
        prop_assert_eq!(&mismatches[0].kind, &MismatchKind::TypeMismatch);
        prop_assert_eq!(mismatches[0].path.as_str(), "$.id");
    }
}
