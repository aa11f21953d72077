//! Generators: values computed at verification time.
//!
//! A generator replaces the example value recorded in the contract,
//! either randomly (ids, timestamps) or from values returned by provider
//! state handlers. Generation never touches the loaded contract; the
//! request and response are cloned first.

use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::contract::{Request, Response};
use crate::error::GeneratorError;
use crate::matching::DocPath;
use crate::time_format;

/// Upper bound on the length of generated random strings.
pub const MAX_RANDOM_LENGTH: usize = 1024;

static EXPRESSION: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}"));

/// A value generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generator {
    /// Random integer in `min..=max`
    RandomInt {
        /// Inclusive lower bound
        min: i64,
        /// Inclusive upper bound
        max: i64,
    },
    /// Random decimal with the given number of digits
    RandomDecimal {
        /// Number of digits
        digits: usize,
    },
    /// Random hexadecimal string
    RandomHexadecimal {
        /// Number of hex digits
        digits: usize,
    },
    /// Random alphanumeric string
    RandomString {
        /// Length
        size: usize,
    },
    /// Random boolean
    RandomBoolean,
    /// Random v4 UUID
    Uuid,
    /// Current date
    Date(Option<String>),
    /// Current time
    Time(Option<String>),
    /// Current date and time
    DateTime(Option<String>),
    /// Value matching a regex; the recorded example is kept
    Regex(String),
    /// Value taken from provider state handler results
    ProviderState {
        /// Expression with `${name}` placeholders
        expression: String,
        /// Type the result is converted to
        data_type: DataType,
    },
}

/// Target type of a provider state expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataType {
    /// Keep the handler value as-is when the expression is a single placeholder
    #[default]
    Raw,
    /// String
    String,
    /// Integer number
    Integer,
    /// Decimal number
    Decimal,
    /// Boolean
    Boolean,
}

impl Generator {
    /// Parse `{"type": "RandomInt", "min": 0, "max": 10}` and friends.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for unknown generator types.
    pub fn from_json(json: &Map<String, Value>) -> Result<Self, String> {
        let usize_field = |name: &str, default: usize| {
            json.get(name)
                .and_then(Value::as_u64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(default)
        };
        let format = json.get("format").and_then(Value::as_str).map(str::to_string);

        let generator = match json.get("type").and_then(Value::as_str) {
            Some("RandomInt") => Self::RandomInt {
                min: json.get("min").and_then(Value::as_i64).unwrap_or(0),
                max: json.get("max").and_then(Value::as_i64).unwrap_or(i64::from(i32::MAX)),
            },
            Some("RandomDecimal") => Self::RandomDecimal {
                digits: usize_field("digits", 10),
            },
            Some("RandomHexadecimal") => Self::RandomHexadecimal {
                digits: usize_field("digits", 10).min(MAX_RANDOM_LENGTH),
            },
            Some("RandomString") => Self::RandomString {
                size: usize_field("size", 20).min(MAX_RANDOM_LENGTH),
            },
            Some("RandomBoolean") => Self::RandomBoolean,
            Some("Uuid") => Self::Uuid,
            Some("Date") => Self::Date(format),
            Some("Time") => Self::Time(format),
            Some("DateTime") => Self::DateTime(format),
            Some("Regex") => Self::Regex(
                json.get("regex")
                    .and_then(Value::as_str)
                    .ok_or("'Regex' generator without a pattern")?
                    .to_string(),
            ),
            Some("ProviderState") => Self::ProviderState {
                expression: json
                    .get("expression")
                    .and_then(Value::as_str)
                    .ok_or("'ProviderState' generator without an expression")?
                    .to_string(),
                data_type: match json.get("dataType").and_then(Value::as_str) {
                    Some("STRING") => DataType::String,
                    Some("INTEGER") => DataType::Integer,
                    Some("DECIMAL") => DataType::Decimal,
                    Some("BOOLEAN") => DataType::Boolean,
                    _ => DataType::Raw,
                },
            },
            Some(other) => return Err(format!("unsupported generator '{other}'")),
            None => return Err("generator without a 'type'".to_string()),
        };
        Ok(generator)
    }
}

/// Generators of a request or response, by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generators {
    /// Body generators keyed by path expression
    pub body: BTreeMap<DocPath, Generator>,
    /// Header generators keyed by header name
    pub header: BTreeMap<String, Generator>,
    /// Query generators keyed by parameter name
    pub query: BTreeMap<String, Generator>,
    /// Generator for the request path
    pub path: Option<Generator>,
}

impl Generators {
    /// Parse a categorised generators object.
    ///
    /// Categories other than body, header, query and path are ignored.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid generator.
    pub fn from_json(json: &Map<String, Value>) -> Result<Self, String> {
        let mut generators = Self::default();
        for (category, entries) in json {
            match category.as_str() {
                "path" => {
                    let entry = entries.as_object().ok_or("path generator is not an object")?;
                    generators.path = Some(Generator::from_json(entry)?);
                }
                "body" => {
                    for (key, entry) in object_entries(entries, category)? {
                        let path = if key.starts_with('$') {
                            DocPath::parse(key).map_err(|e| e.to_string())?
                        } else {
                            DocPath::field(key)
                        };
                        generators.body.insert(path, Generator::from_json(entry)?);
                    }
                }
                "header" | "headers" => {
                    for (key, entry) in object_entries(entries, category)? {
                        generators.header.insert(strip_root(key), Generator::from_json(entry)?);
                    }
                }
                "query" => {
                    for (key, entry) in object_entries(entries, category)? {
                        generators.query.insert(strip_root(key), Generator::from_json(entry)?);
                    }
                }
                other => debug!(category = other, "Ignoring generator category"),
            }
        }
        Ok(generators)
    }

    /// Whether no generator is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && self.header.is_empty() && self.query.is_empty() && self.path.is_none()
    }
}

fn object_entries<'a>(
    entries: &'a Value,
    category: &str,
) -> Result<Vec<(&'a String, &'a Map<String, Value>)>, String> {
    let map = entries
        .as_object()
        .ok_or_else(|| format!("'{category}' generators are not an object"))?;
    map.iter()
        .map(|(key, entry)| {
            entry
                .as_object()
                .map(|entry| (key, entry))
                .ok_or_else(|| format!("generator '{key}' is not an object"))
        })
        .collect()
}

fn strip_root(key: &str) -> String {
    key.strip_prefix("$.").unwrap_or(key).to_string()
}

/// Values available to generators during one interaction.
///
/// Built from the maps returned by provider state setup. Never shared
/// between interactions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratorContext {
    values: Map<String, Value>,
}

impl GeneratorContext {
    /// Context with the given provider state values.
    #[must_use]
    pub const fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Merge values returned by a state handler; later keys win.
    pub fn merge(&mut self, values: Map<String, Value>) {
        self.values.extend(values);
    }

    /// Look up a provider state value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// All values.
    #[must_use]
    pub const fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Evaluate a generator against the recorded example.
///
/// # Errors
///
/// Returns [`GeneratorError`] when a provider state value is missing or
/// cannot be converted to the requested type.
pub fn generate(generator: &Generator, example: &Value, ctx: &GeneratorContext) -> Result<Value, GeneratorError> {
    let mut rng = rand::thread_rng();
    let value = match generator {
        Generator::RandomInt { min, max } => {
            let (low, high) = if min <= max { (*min, *max) } else { (*max, *min) };
            Value::from(rng.gen_range(low..=high))
        }
        Generator::RandomDecimal { digits } => random_decimal(&mut rng, *digits),
        Generator::RandomHexadecimal { digits } => Value::String(
            (0..*digits)
                .filter_map(|_| char::from_digit(rng.gen_range(0..16), 16))
                .collect(),
        ),
        Generator::RandomString { size } => Value::String(
            (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(*size)
                .map(char::from)
                .collect(),
        ),
        Generator::RandomBoolean => Value::Bool(rng.gen_bool(0.5)),
        Generator::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
        Generator::Date(format) => Value::String(time_format::format_now(
            format.as_deref().unwrap_or(time_format::DEFAULT_DATE),
        )),
        Generator::Time(format) => Value::String(time_format::format_now(
            format.as_deref().unwrap_or(time_format::DEFAULT_TIME),
        )),
        Generator::DateTime(format) => Value::String(time_format::format_now(
            format.as_deref().unwrap_or(time_format::DEFAULT_DATETIME),
        )),
        Generator::Regex(_) => example.clone(),
        Generator::ProviderState { expression, data_type } => provider_state_value(expression, *data_type, ctx)?,
    };
    Ok(value)
}

fn random_decimal(rng: &mut impl Rng, digits: usize) -> Value {
    let digits = digits.clamp(2, 15);
    let mut text: String = (0..digits)
        .map(|i| {
            let low = u32::from(i == 0);
            char::from_digit(rng.gen_range(low..10), 10).unwrap_or('1')
        })
        .collect();
    text.insert(rng.gen_range(1..digits), '.');
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map_or(Value::String(text), Value::Number)
}

fn provider_state_value(expression: &str, data_type: DataType, ctx: &GeneratorContext) -> Result<Value, GeneratorError> {
    let pattern = EXPRESSION.as_ref().map_err(|e| GeneratorError::Invalid {
        location: expression.to_string(),
        reason: e.to_string(),
    })?;

    // A lone placeholder keeps the handler's JSON type
    let lone = pattern
        .captures(expression)
        .filter(|caps| caps.get(0).is_some_and(|m| m.as_str() == expression))
        .and_then(|caps| caps.get(1).map(|name| name.as_str().trim().to_string()));
    let raw = if let Some(name) = lone {
        ctx.get(&name)
            .cloned()
            .ok_or(GeneratorError::MissingStateValue(name))?
    } else {
        let mut text = String::with_capacity(expression.len());
        let mut last = 0;
        for caps in pattern.captures_iter(expression) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let name = name.as_str().trim();
            let value = ctx
                .get(name)
                .ok_or_else(|| GeneratorError::MissingStateValue(name.to_string()))?;
            text.push_str(&expression[last..whole.start()]);
            text.push_str(&value_text(value));
            last = whole.end();
        }
        text.push_str(&expression[last..]);
        Value::String(text)
    };

    convert(raw, data_type).map_err(|reason| GeneratorError::Invalid {
        location: expression.to_string(),
        reason,
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn convert(value: Value, data_type: DataType) -> Result<Value, String> {
    match data_type {
        DataType::Raw => Ok(value),
        DataType::String => Ok(Value::String(value_text(&value))),
        DataType::Integer => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            other => value_text(other)
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("'{}' is not an integer: {e}", value_text(other))),
        },
        DataType::Decimal => match &value {
            Value::Number(_) => Ok(value),
            other => value_text(other)
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{}' is not a decimal", value_text(other))),
        },
        DataType::Boolean => match &value {
            Value::Bool(_) => Ok(value),
            other => value_text(other)
                .trim()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|e| format!("'{}' is not a boolean: {e}", value_text(other))),
        },
    }
}

/// Replace every node of `body` matched by a generator expression.
///
/// # Errors
///
/// Propagates the first generator failure.
pub fn apply_to_body(
    body: &mut Value,
    generators: &BTreeMap<DocPath, Generator>,
    ctx: &GeneratorContext,
) -> Result<(), GeneratorError> {
    for (expr, generator) in generators {
        apply_at(body, &DocPath::root(), expr, generator, ctx)?;
    }
    Ok(())
}

fn apply_at(
    value: &mut Value,
    here: &DocPath,
    expr: &DocPath,
    generator: &Generator,
    ctx: &GeneratorContext,
) -> Result<(), GeneratorError> {
    if expr.matches_exactly(here) {
        *value = generate(generator, value, ctx)?;
        return Ok(());
    }
    if here.len() >= expr.len() {
        return Ok(());
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                apply_at(child, &here.join(key), expr, generator, ctx)?;
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter_mut().enumerate() {
                apply_at(child, &here.join_index(index), expr, generator, ctx)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn generate_text(generator: &Generator, example: &str, ctx: &GeneratorContext) -> Result<String, GeneratorError> {
    generate(generator, &Value::String(example.to_string()), ctx).map(|v| value_text(&v))
}

/// A copy of `request` with its generators evaluated.
///
/// # Errors
///
/// Propagates the first generator failure.
pub fn generate_request(request: &Request, ctx: &GeneratorContext) -> Result<Request, GeneratorError> {
    let mut generated = request.clone();
    let generators = &request.generators;

    if let Some(generator) = &generators.path {
        generated.path = generate_text(generator, &request.path, ctx)?;
    }
    for (name, generator) in &generators.header {
        let existing = generated
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name));
        match existing {
            Some((_, value)) => *value = generate_text(generator, value, ctx)?,
            None => {
                let value = generate_text(generator, "", ctx)?;
                generated.headers.insert(name.clone(), value);
            }
        }
    }
    for (name, generator) in &generators.query {
        let values = generated.query.entry(name.clone()).or_insert_with(|| vec![String::new()]);
        for value in values.iter_mut() {
            *value = generate_text(generator, value, ctx)?;
        }
    }
    if let Some(body) = generated.body.as_mut() {
        apply_to_body(body, &generators.body, ctx)?;
    }
    Ok(generated)
}

/// A copy of the expected `response` with its generators evaluated.
///
/// # Errors
///
/// Propagates the first generator failure.
pub fn generate_response(response: &Response, ctx: &GeneratorContext) -> Result<Response, GeneratorError> {
    let mut generated = response.clone();
    let generators = &response.generators;

    for (name, generator) in &generators.header {
        if let Some((_, value)) = generated
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            *value = generate_text(generator, value, ctx)?;
        }
    }
    if let Some(body) = generated.body.as_mut() {
        apply_to_body(body, &generators.body, ctx)?;
    }
    Ok(generated)
}
