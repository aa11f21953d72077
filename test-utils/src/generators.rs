//! Shared proptest generators for JSON documents.
//!
//! The matcher works on arbitrary `serde_json::Value` trees, so most
//! property tests start from one of these strategies.

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

/// Generate object keys.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}"
}

/// Generate JSON scalars: null, booleans, integers, finite decimals, strings.
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        (-1.0e6..1.0e6f64).prop_map(|f| json!(f)),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ]
}

/// Generate JSON scalars that are not null.
pub fn json_non_null_scalar_strategy() -> impl Strategy<Value = Value> {
    json_scalar_strategy().prop_filter("non-null", |v| !v.is_null())
}

/// Generate nested JSON documents up to three levels deep.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    json_scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::Array),
            btree_map(field_name_strategy(), inner, 0..4)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    })
}

/// Generate flat JSON objects with `min..max` scalar fields.
pub fn json_object_strategy(min: usize, max: usize) -> impl Strategy<Value = Map<String, Value>> {
    btree_map(field_name_strategy(), json_non_null_scalar_strategy(), min..max)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Generate provider state names.
pub fn provider_state_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("user 1 exists".to_string()),
        Just("no users exist".to_string()),
        Just("an order is pending".to_string()),
        "[a-z]{3,10} [a-z]{3,10} exists",
    ]
}
