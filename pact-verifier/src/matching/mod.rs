//! Matcher engine.
//!
//! Compares actual provider responses against expected ones under the
//! contract's matching rules, accumulating every mismatch.

pub mod body;
pub mod mismatch;
pub mod path;
pub mod response;
pub mod rules;

pub use body::match_body;
pub use mismatch::{ElementFailure, MatchResult, Mismatch, MismatchKind};
pub use path::{DocPath, PathError, PathToken};
pub use response::match_response;
pub use rules::{
    ContainsVariant, MatchRule, MatchingRules, ResolvedRules, RuleCategory, RuleList, RuleLogic, RuleParseError,
};
