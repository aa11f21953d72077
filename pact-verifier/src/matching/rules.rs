//! Matching rules: relaxations of literal equality attached to paths.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::mismatch::{Mismatch, MismatchKind};
use super::path::{DocPath, PathError, PathToken};
use crate::time_format::{self, TemporalKind};

/// A single matching rule.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchRule {
    /// Literal equality; cascades and overrides an inherited type rule
    Equality,
    /// Same JSON kind; cascades to descendants
    Type,
    /// Value rendered as a string must fully match the pattern
    Regex(String),
    /// Array has at least `n` elements, elements matched by type
    MinLength(usize),
    /// Array has at most `n` elements, elements matched by type
    MaxLength(usize),
    /// Array length within both bounds, elements matched by type
    LengthBetween {
        /// Inclusive lower bound
        min: usize,
        /// Inclusive upper bound
        max: usize,
    },
    /// Each variant must be satisfied by at least one actual element
    ArrayContaining(Vec<ContainsVariant>),
    /// Integer number
    Integer,
    /// Number with a fractional part
    Decimal,
    /// Any number
    Number,
    /// Boolean
    Boolean,
    /// JSON null
    Null,
    /// String containing the given text
    Include(String),
    /// Non-empty string, array or object of the expected kind
    NotEmpty,
    /// Semantic version string
    Semver,
    /// Date in the given pattern
    Date(String),
    /// Time in the given pattern
    Time(String),
    /// Timestamp in the given pattern
    Timestamp(String),
}

/// One element template of an `arrayContains` rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainsVariant {
    /// Index of the template element in the expected array
    pub index: usize,
    /// Rules relative to the element (`$` is the element itself)
    pub rules: RuleCategory,
}

/// How the rules of one list combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuleLogic {
    /// Every rule must pass
    #[default]
    And,
    /// At least one rule must pass
    Or,
}

/// Rules attached to one path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleList {
    /// Rules, evaluated in order
    pub rules: Vec<MatchRule>,
    /// Combination logic
    pub logic: RuleLogic,
}

/// Rules of one category (body, header, query or path) keyed by path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleCategory {
    rules: BTreeMap<DocPath, RuleList>,
}

/// Rules applied at a concrete node.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRules<'a> {
    /// The winning rule list
    pub list: &'a RuleList,
    /// True when the list was declared on an ancestor and cascades down
    pub inherited: bool,
}

/// All rule categories of a request or response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchingRules {
    /// Body rules keyed by JSON path
    pub body: RuleCategory,
    /// Header rules keyed by `$.<header-name>`
    pub header: RuleCategory,
    /// Query rules keyed by `$.<parameter>`
    pub query: RuleCategory,
    /// Rules for the request path, keyed by `$`
    pub path: RuleCategory,
}

impl MatchRule {
    /// Parse one matcher object, e.g. `{"match": "type", "min": 1}`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for unknown or incomplete matchers.
    pub fn from_json(json: &Map<String, Value>) -> Result<Self, String> {
        let usize_field = |name: &str| {
            json.get(name).and_then(Value::as_u64).and_then(|n| usize::try_from(n).ok())
        };
        let str_field = |name: &str| json.get(name).and_then(Value::as_str).map(str::to_string);
        let min = usize_field("min");
        let max = usize_field("max");

        let kind = match json.get("match").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            // V2 style: bare {"regex": ...} or {"min": n}
            None if json.contains_key("regex") => "regex".to_string(),
            None if min.is_some() || max.is_some() => "type".to_string(),
            None => return Err("matcher without a 'match' type".to_string()),
        };

        let rule = match kind.as_str() {
            "equality" => Self::Equality,
            "type" => match (min, max) {
                (Some(min), Some(max)) => Self::LengthBetween { min, max },
                (Some(min), None) => Self::MinLength(min),
                (None, Some(max)) => Self::MaxLength(max),
                (None, None) => Self::Type,
            },
            "min" | "min-type" => Self::MinLength(min.ok_or("'min' matcher without a 'min' value")?),
            "max" | "max-type" => Self::MaxLength(max.ok_or("'max' matcher without a 'max' value")?),
            "regex" => {
                let pattern = str_field("regex").ok_or("'regex' matcher without a pattern")?;
                Regex::new(&pattern).map_err(|e| format!("invalid regex '{pattern}': {e}"))?;
                Self::Regex(pattern)
            }
            "integer" => Self::Integer,
            "decimal" => Self::Decimal,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "null" => Self::Null,
            "include" => Self::Include(str_field("value").ok_or("'include' matcher without a value")?),
            "notEmpty" => Self::NotEmpty,
            "semver" => Self::Semver,
            "date" => Self::Date(
                str_field("format")
                    .or_else(|| str_field("date"))
                    .unwrap_or_else(|| time_format::DEFAULT_DATE.to_string()),
            ),
            "time" => Self::Time(
                str_field("format")
                    .or_else(|| str_field("time"))
                    .unwrap_or_else(|| time_format::DEFAULT_TIME.to_string()),
            ),
            "timestamp" | "datetime" => Self::Timestamp(
                str_field("format")
                    .or_else(|| str_field("timestamp"))
                    .or_else(|| str_field("datetime"))
                    .unwrap_or_else(|| time_format::DEFAULT_DATETIME.to_string()),
            ),
            "arrayContains" => {
                let variants = json
                    .get("variants")
                    .and_then(Value::as_array)
                    .ok_or("'arrayContains' matcher without variants")?;
                Self::ArrayContaining(
                    variants
                        .iter()
                        .enumerate()
                        .map(|(position, v)| ContainsVariant::from_json(position, v))
                        .collect::<Result<_, _>>()?,
                )
            }
            other => return Err(format!("unsupported matcher '{other}'")),
        };
        Ok(rule)
    }

    /// Whether the rule still applies to descendants of the node it is declared on.
    #[must_use]
    pub const fn cascades(&self) -> bool {
        matches!(
            self,
            Self::Equality | Self::Type | Self::MinLength(_) | Self::MaxLength(_) | Self::LengthBetween { .. }
        )
    }

    /// Check a single node against this rule, ignoring its children.
    ///
    /// Array bounds check the length here; element matching is driven by the
    /// body matcher. `ArrayContaining` is likewise evaluated there, so this
    /// only checks that the actual value is an array.
    ///
    /// # Errors
    ///
    /// Returns the mismatch describing the violation.
    pub fn check(&self, path: &DocPath, expected: &Value, actual: &Value) -> Result<(), Mismatch> {
        let fail = |kind: MismatchKind, message: String| {
            Err(Mismatch::new(kind, path, message)
                .with_expected(expected.clone())
                .with_actual(actual.clone())
                .with_rule(self.to_string()))
        };

        match self {
            Self::Equality => {
                if values_equal(expected, actual) {
                    Ok(())
                } else if json_kind(expected) != json_kind(actual) {
                    fail(
                        MismatchKind::TypeMismatch,
                        format!("Expected {} but received {}", describe(expected), describe(actual)),
                    )
                } else {
                    fail(
                        MismatchKind::ValueMismatch,
                        format!("Expected {} to equal {}", describe(actual), describe(expected)),
                    )
                }
            }
            Self::Type => check_kind(expected, actual).or_else(|message| fail(MismatchKind::TypeMismatch, message)),
            Self::Regex(pattern) => {
                let Some(text) = scalar_text(actual) else {
                    return fail(
                        MismatchKind::RegexMismatch,
                        format!("Expected {} to match '{pattern}'", describe(actual)),
                    );
                };
                let anchored = format!("^(?:{pattern})$");
                match Regex::new(&anchored) {
                    Ok(re) if re.is_match(&text) => Ok(()),
                    Ok(_) => fail(MismatchKind::RegexMismatch, format!("Expected '{text}' to match '{pattern}'")),
                    Err(e) => fail(MismatchKind::RegexMismatch, format!("Invalid regex '{pattern}': {e}")),
                }
            }
            Self::MinLength(min) => check_bounds(expected, actual, Some(*min), None).or_else(|(k, m)| fail(k, m)),
            Self::MaxLength(max) => check_bounds(expected, actual, None, Some(*max)).or_else(|(k, m)| fail(k, m)),
            Self::LengthBetween { min, max } => {
                check_bounds(expected, actual, Some(*min), Some(*max)).or_else(|(k, m)| fail(k, m))
            }
            Self::ArrayContaining(_) => {
                if actual.is_array() {
                    Ok(())
                } else {
                    fail(MismatchKind::TypeMismatch, format!("Expected an array but received {}", describe(actual)))
                }
            }
            Self::Integer => match actual {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                _ => fail(MismatchKind::TypeMismatch, format!("Expected {} to be an integer", describe(actual))),
            },
            Self::Decimal => match actual {
                Value::Number(n) if n.is_f64() => Ok(()),
                _ => fail(MismatchKind::TypeMismatch, format!("Expected {} to be a decimal number", describe(actual))),
            },
            Self::Number => match actual {
                Value::Number(_) => Ok(()),
                _ => fail(MismatchKind::TypeMismatch, format!("Expected {} to be a number", describe(actual))),
            },
            Self::Boolean => match actual {
                Value::Bool(_) => Ok(()),
                _ => fail(MismatchKind::TypeMismatch, format!("Expected {} to be a boolean", describe(actual))),
            },
            Self::Null => match actual {
                Value::Null => Ok(()),
                _ => fail(MismatchKind::TypeMismatch, format!("Expected {} to be null", describe(actual))),
            },
            Self::Include(needle) => match scalar_text(actual) {
                Some(text) if text.contains(needle.as_str()) => Ok(()),
                _ => fail(MismatchKind::ValueMismatch, format!("Expected {} to include '{needle}'", describe(actual))),
            },
            Self::NotEmpty => {
                let empty = match actual {
                    Value::String(s) => s.is_empty(),
                    Value::Array(a) => a.is_empty(),
                    Value::Object(o) => o.is_empty(),
                    Value::Null => true,
                    _ => false,
                };
                if empty {
                    fail(MismatchKind::ValueMismatch, format!("Expected {} to be non-empty", describe(actual)))
                } else {
                    check_kind(expected, actual).or_else(|message| fail(MismatchKind::TypeMismatch, message))
                }
            }
            Self::Semver => match actual.as_str() {
                Some(text) if is_semver(text) => Ok(()),
                _ => fail(
                    MismatchKind::RegexMismatch,
                    format!("Expected {} to be a semantic version", describe(actual)),
                ),
            },
            Self::Date(pattern) => check_temporal(actual, pattern, TemporalKind::Date).or_else(|m| fail(MismatchKind::FormatMismatch, m)),
            Self::Time(pattern) => check_temporal(actual, pattern, TemporalKind::Time).or_else(|m| fail(MismatchKind::FormatMismatch, m)),
            Self::Timestamp(pattern) => {
                check_temporal(actual, pattern, TemporalKind::DateTime).or_else(|m| fail(MismatchKind::FormatMismatch, m))
            }
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equality => f.write_str("equality"),
            Self::Type => f.write_str("type"),
            Self::Regex(p) => write!(f, "regex({p})"),
            Self::MinLength(n) => write!(f, "min({n})"),
            Self::MaxLength(n) => write!(f, "max({n})"),
            Self::LengthBetween { min, max } => write!(f, "min({min})/max({max})"),
            Self::ArrayContaining(v) => write!(f, "arrayContains({} variants)", v.len()),
            Self::Integer => f.write_str("integer"),
            Self::Decimal => f.write_str("decimal"),
            Self::Number => f.write_str("number"),
            Self::Boolean => f.write_str("boolean"),
            Self::Null => f.write_str("null"),
            Self::Include(s) => write!(f, "include({s})"),
            Self::NotEmpty => f.write_str("notEmpty"),
            Self::Semver => f.write_str("semver"),
            Self::Date(p) => write!(f, "date({p})"),
            Self::Time(p) => write!(f, "time({p})"),
            Self::Timestamp(p) => write!(f, "timestamp({p})"),
        }
    }
}

impl ContainsVariant {
    fn from_json(position: usize, json: &Value) -> Result<Self, String> {
        let index = json
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(position);
        let rules = match json.get("rules") {
            Some(Value::Object(map)) => RuleCategory::from_json(map).map_err(|e| e.to_string())?,
            _ => RuleCategory::default(),
        };
        Ok(Self { index, rules })
    }
}

impl RuleList {
    /// A list holding a single rule.
    #[must_use]
    pub fn single(rule: MatchRule) -> Self {
        Self { rules: vec![rule], logic: RuleLogic::And }
    }

    /// Parse `{"matchers": [...], "combine": "AND"}` or a bare V2 matcher.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid matcher.
    pub fn from_json(json: &Value) -> Result<Self, String> {
        let Value::Object(map) = json else {
            return Err("rule entry is not an object".to_string());
        };

        let logic = match map.get("combine").and_then(Value::as_str) {
            Some(c) if c.eq_ignore_ascii_case("or") => RuleLogic::Or,
            _ => RuleLogic::And,
        };

        let rules = match map.get("matchers") {
            Some(Value::Array(matchers)) => matchers
                .iter()
                .map(|m| match m {
                    Value::Object(m) => MatchRule::from_json(m),
                    _ => Err("matcher is not an object".to_string()),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err("'matchers' is not an array".to_string()),
            None => vec![MatchRule::from_json(map)?],
        };

        Ok(Self { rules, logic })
    }

    /// Whether every rule cascades to descendants.
    #[must_use]
    pub fn cascades(&self) -> bool {
        !self.rules.is_empty() && self.rules.iter().all(MatchRule::cascades)
    }

    /// Rule used for descendants: equality if declared, otherwise type.
    #[must_use]
    pub fn inherited_rule(&self) -> MatchRule {
        if self.rules.iter().any(|r| matches!(r, MatchRule::Equality)) {
            MatchRule::Equality
        } else {
            MatchRule::Type
        }
    }

    /// Whether the list requests literal equality at this node.
    #[must_use]
    pub fn is_equality(&self) -> bool {
        self.rules.iter().any(|r| matches!(r, MatchRule::Equality))
    }

    /// Check a node against the list, honouring the combine logic.
    ///
    /// # Errors
    ///
    /// Returns every failing rule's mismatch. Under `OR` these are only
    /// returned when no rule passed.
    pub fn check(&self, path: &DocPath, expected: &Value, actual: &Value) -> Result<(), Vec<Mismatch>> {
        let mut failures = Vec::new();
        for rule in &self.rules {
            match rule.check(path, expected, actual) {
                Ok(()) if self.logic == RuleLogic::Or => return Ok(()),
                Ok(()) => {}
                Err(m) => failures.push(m),
            }
        }
        if failures.is_empty() { Ok(()) } else { Err(failures) }
    }
}

impl RuleCategory {
    /// Parse `{"$.path": {"matchers": [...]}}`.
    ///
    /// Keys that are not path expressions (header and query names) are
    /// treated as single fields under the root.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid path keys or matchers.
    pub fn from_json(json: &Map<String, Value>) -> Result<Self, RuleParseError> {
        let mut category = Self::default();
        for (key, entry) in json {
            let path = if key.starts_with('$') { DocPath::parse(key)? } else { DocPath::field(key) };
            let list = RuleList::from_json(entry).map_err(|reason| RuleParseError::Matcher {
                path: key.clone(),
                reason,
            })?;
            category.insert(path, list);
        }
        Ok(category)
    }

    /// Add or replace the rules at `path`.
    pub fn insert(&mut self, path: DocPath, list: RuleList) {
        self.rules.insert(path, list);
    }

    /// Whether the category has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate over `(path, rules)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&DocPath, &RuleList)> {
        self.rules.iter()
    }

    /// Resolve the rules for a concrete node.
    ///
    /// The most specific expression wins: longest matched prefix first, then
    /// highest weight (fewest wildcards). Expressions on ancestors only count
    /// when all their rules cascade.
    #[must_use]
    pub fn resolve(&self, path: &DocPath) -> Option<ResolvedRules<'_>> {
        self.rules
            .iter()
            .filter_map(|(expr, list)| {
                let weight = expr.prefix_weight(path)?;
                let inherited = expr.len() < path.len();
                if inherited && !list.cascades() {
                    return None;
                }
                Some((expr.len(), weight, list, inherited))
            })
            .max_by_key(|(len, weight, ..)| (*len, *weight))
            .map(|(_, _, list, inherited)| ResolvedRules { list, inherited })
    }

    /// Rules declared exactly at a node (no inheritance).
    #[must_use]
    pub fn exact(&self, path: &DocPath) -> Option<&RuleList> {
        self.rules
            .iter()
            .filter(|(expr, _)| expr.matches_exactly(path))
            .max_by_key(|(expr, _)| expr.prefix_weight(path))
            .map(|(_, list)| list)
    }

    /// Whether any expression targets exactly `path` with an explicit index.
    #[must_use]
    pub fn has_index_rule(&self, path: &DocPath, index: usize) -> bool {
        let element = path.join_index(index);
        self.rules
            .keys()
            .any(|expr| expr.ends_with_index(index) && expr.matches_exactly(&element))
    }

    /// Case-insensitive lookup of a single-field key (headers).
    #[must_use]
    pub fn for_name(&self, name: &str) -> Option<&RuleList> {
        self.rules.iter().find_map(|(expr, list)| match expr.tokens() {
            [_, PathToken::Field(key)] if key.eq_ignore_ascii_case(name) => Some(list),
            _ => None,
        })
    }
}

/// Failure to parse a rule category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    /// A path key was not a valid expression
    #[error(transparent)]
    Path(#[from] PathError),
    /// A matcher definition was invalid
    #[error("invalid matcher at '{path}': {reason}")]
    Matcher {
        /// Path key the matcher was declared under
        path: String,
        /// What went wrong
        reason: String,
    },
}

/// JSON kind name used in messages and type comparison.
#[must_use]
pub const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Literal equality with numbers compared by value (`12` equals `12.0`).
#[must_use]
pub fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(e), Value::Number(a)) => {
            e == a || matches!((e.as_f64(), a.as_f64()), (Some(x), Some(y)) if (x - y).abs() < f64::EPSILON)
        }
        _ => expected == actual,
    }
}

/// `12 (Number)` style rendering for messages.
#[must_use]
pub fn describe(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > 80 {
        text.truncate(77);
        text.push_str("...");
    }
    format!("{text} ({})", json_kind(value))
}

fn check_kind(expected: &Value, actual: &Value) -> Result<(), String> {
    if json_kind(expected) == json_kind(actual) {
        Ok(())
    } else {
        Err(format!(
            "Expected {} to be the same type as {}",
            describe(actual),
            describe(expected)
        ))
    }
}

fn check_bounds(
    expected: &Value,
    actual: &Value,
    min: Option<usize>,
    max: Option<usize>,
) -> Result<(), (MismatchKind, String)> {
    let Value::Array(items) = actual else {
        return check_kind(expected, actual).map_err(|m| (MismatchKind::TypeMismatch, m));
    };
    match (min, max) {
        (Some(min), _) if items.len() < min => Err((
            MismatchKind::MinLength,
            format!("Expected an array with at least {min} element(s) but received {}", items.len()),
        )),
        (_, Some(max)) if items.len() > max => Err((
            MismatchKind::MaxLength,
            format!("Expected an array with at most {max} element(s) but received {}", items.len()),
        )),
        _ => Ok(()),
    }
}

fn check_temporal(actual: &Value, pattern: &str, kind: TemporalKind) -> Result<(), String> {
    match actual.as_str() {
        Some(text) if time_format::parses(text, pattern, kind) => Ok(()),
        _ => Err(format!("Expected {} to match the format '{pattern}'", describe(actual))),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_semver(text: &str) -> bool {
    let core = text.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
