//! Document path expressions used to attach rules and generators to nodes.
//!
//! Expressions follow the pact flavour of JSONPath: `$`, `.name`,
//! `['name']`, `[0]`, `[*]` and `.*`. Concrete paths (the location of an
//! actual node during a walk) only contain the root, fields and indices.

use std::fmt;

/// One segment of a path expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathToken {
    /// `$`
    Root,
    /// `.name` or `['name']`
    Field(String),
    /// `[n]`
    Index(usize),
    /// `.*` matches any field or index
    Star,
    /// `[*]` matches any index
    StarIndex,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath {
    tokens: Vec<PathToken>,
}

/// Error raised for an unparseable path expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path expression '{expression}': {reason}")]
pub struct PathError {
    /// The offending expression
    pub expression: String,
    /// What went wrong
    pub reason: String,
}

impl DocPath {
    /// The root path `$`.
    #[must_use]
    pub fn root() -> Self {
        Self { tokens: vec![PathToken::Root] }
    }

    /// A single-field path `$.name`, used for header and query rule keys.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::root().join(name)
    }

    /// Parse a path expression.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if the expression does not start at `$` or has a
    /// malformed segment.
    pub fn parse(expression: &str) -> Result<Self, PathError> {
        let err = |reason: &str| PathError {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let mut chars = expression.trim().chars().peekable();
        if chars.next() != Some('$') {
            return Err(err("must start with '$'"));
        }

        let mut tokens = vec![PathToken::Root];
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        name.push(next);
                        chars.next();
                    }
                    match name.as_str() {
                        "" => return Err(err("empty field name")),
                        "*" => tokens.push(PathToken::Star),
                        _ => tokens.push(PathToken::Field(name)),
                    }
                }
                '[' => {
                    let mut inner = String::new();
                    let mut quote: Option<char> = None;
                    let mut quoted = false;
                    let mut closed = false;
                    for next in chars.by_ref() {
                        match (quote, next) {
                            (None, ']') => {
                                closed = true;
                                break;
                            }
                            (None, '\'' | '"') if inner.is_empty() && !quoted => {
                                quote = Some(next);
                                quoted = true;
                            }
                            (Some(q), c) if c == q => quote = None,
                            _ => inner.push(next),
                        }
                    }
                    if !closed {
                        return Err(err("unterminated '['"));
                    }
                    if quoted {
                        tokens.push(PathToken::Field(inner));
                    } else if inner == "*" {
                        tokens.push(PathToken::StarIndex);
                    } else {
                        let index = inner.trim().parse::<usize>().map_err(|_| err("bad index"))?;
                        tokens.push(PathToken::Index(index));
                    }
                }
                _ => return Err(err("unexpected character")),
            }
        }

        Ok(Self { tokens })
    }

    /// Append a field segment.
    #[must_use]
    pub fn join(&self, name: impl Into<String>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(PathToken::Field(name.into()));
        Self { tokens }
    }

    /// Append an index segment.
    #[must_use]
    pub fn join_index(&self, index: usize) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(PathToken::Index(index));
        Self { tokens }
    }

    /// Path segments.
    #[must_use]
    pub fn tokens(&self) -> &[PathToken] {
        &self.tokens
    }

    /// Number of segments, including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Always false: a path has at least the root segment.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Weight of this expression matched against a prefix of `concrete`.
    ///
    /// Exact segments weigh 2, wildcards 1; the result is their product.
    /// `None` when the expression is longer than the concrete path or a
    /// segment does not match.
    #[must_use]
    pub fn prefix_weight(&self, concrete: &Self) -> Option<u32> {
        if self.tokens.len() > concrete.tokens.len() {
            return None;
        }
        self.tokens
            .iter()
            .zip(&concrete.tokens)
            .try_fold(1u32, |weight, (expr, actual)| {
                token_weight(expr, actual).map(|w| weight.saturating_mul(w))
            })
    }

    /// Whether this expression matches `concrete` segment for segment.
    #[must_use]
    pub fn matches_exactly(&self, concrete: &Self) -> bool {
        self.tokens.len() == concrete.tokens.len() && self.prefix_weight(concrete).is_some()
    }

    /// Whether the last segment is exactly `[index]`.
    #[must_use]
    pub fn ends_with_index(&self, index: usize) -> bool {
        matches!(self.tokens.last(), Some(PathToken::Index(i)) if *i == index)
    }

    /// Re-root `self` if it starts with `prefix`, e.g. `$.body.a` under
    /// `$.body` becomes `$.a`.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Self) -> Option<Self> {
        if self.tokens.len() < prefix.tokens.len() || self.tokens[..prefix.tokens.len()] != prefix.tokens[..] {
            return None;
        }
        let mut tokens = vec![PathToken::Root];
        tokens.extend(self.tokens[prefix.tokens.len()..].iter().cloned());
        Some(Self { tokens })
    }
}

fn token_weight(expr: &PathToken, actual: &PathToken) -> Option<u32> {
    match (expr, actual) {
        (PathToken::Root, PathToken::Root) => Some(2),
        (PathToken::Field(a), PathToken::Field(b)) if a == b => Some(2),
        (PathToken::Index(a), PathToken::Index(b)) if a == b => Some(2),
        (PathToken::StarIndex, PathToken::Index(_)) => Some(1),
        (PathToken::Star, PathToken::Field(_) | PathToken::Index(_)) => Some(1),
        _ => None,
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            match token {
                PathToken::Root => f.write_str("$")?,
                PathToken::Field(name) if is_identifier(name) => write!(f, ".{name}")?,
                PathToken::Field(name) => write!(f, "['{name}']")?,
                PathToken::Index(i) => write!(f, "[{i}]")?,
                PathToken::Star => f.write_str(".*")?,
                PathToken::StarIndex => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':')
}
