//! Mismatch records produced by the matcher.

use serde::Serialize;
use serde_json::Value;

use super::path::DocPath;

/// What kind of discrepancy a mismatch describes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MismatchKind {
    /// Response status differs
    Status,
    /// Expected header missing or with a different value
    Header,
    /// Body missing, unparseable, or of a different content type
    Body,
    /// JSON kinds differ
    TypeMismatch,
    /// Same kind, different value
    ValueMismatch,
    /// Value does not match a regex
    RegexMismatch,
    /// Value does not match a date/time format
    FormatMismatch,
    /// Expected object key is absent
    MissingKey,
    /// Key present in actual but not allowed under an equality rule
    UnexpectedKey,
    /// Array lengths differ where no rule relaxes them
    LengthMismatch,
    /// Array shorter than a minimum length rule
    MinLength,
    /// Array longer than a maximum length rule
    MaxLength,
    /// No actual element satisfied an `arrayContains` variant
    NoMatchingElement {
        /// Failures of every actual element against the variant
        elements: Vec<ElementFailure>,
    },
    /// The interaction could not be verified (setup, transport, ...)
    VerificationError,
}

/// Why one actual array element did not satisfy a variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementFailure {
    /// Index of the actual element
    pub index: usize,
    /// Mismatches of that element against the variant
    pub mismatches: Vec<Mismatch>,
}

/// One discrepancy between expected and actual.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mismatch {
    /// Kind of discrepancy
    #[serde(flatten)]
    pub kind: MismatchKind,
    /// Location, e.g. `$.id`, `status`, or a header name
    pub path: String,
    /// Expected value, when relevant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// Actual value, when relevant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    /// Rule violated, when one was in force
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Human readable description
    pub message: String,
}

impl Mismatch {
    /// Create a mismatch at a body path.
    #[must_use]
    pub fn new(kind: MismatchKind, path: &DocPath, message: impl Into<String>) -> Self {
        Self::at(kind, path.to_string(), message)
    }

    /// Create a mismatch at a free-form location.
    #[must_use]
    pub fn at(kind: MismatchKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            expected: None,
            actual: None,
            rule: None,
            message: message.into(),
        }
    }

    /// Attach the expected value.
    #[must_use]
    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Attach the actual value.
    #[must_use]
    pub fn with_actual(mut self, actual: Value) -> Self {
        self.actual = Some(actual);
        self
    }

    /// Record the violated rule.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }
}

/// Outcome of matching one response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    /// Every discrepancy found, in document order
    pub mismatches: Vec<Mismatch>,
}

impl MatchResult {
    /// Wrap a list of mismatches.
    #[must_use]
    pub const fn new(mismatches: Vec<Mismatch>) -> Self {
        Self { mismatches }
    }

    /// True when nothing mismatched.
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }
}
