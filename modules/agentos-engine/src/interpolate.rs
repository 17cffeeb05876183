//! `{path}` references inside chain step parameters.
//!
//! A string that is exactly one reference resolves to the referenced value
//! with its original type. References embedded in longer text are rendered
//! as text: strings raw, everything else as compact JSON. Anything that does
//! not resolve stays literal and is reported back as an `UnresolvedReference`.
//!
//! Paths are dot-separated keys with optional `[index]` suffixes; negative
//! indices count from the end (`{team.members[-1].name}`).

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::PathError;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("reference pattern compiles"));

/// A reference that was left in place because it could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedReference {
    /// The text between the braces.
    pub expression: String,
    pub error: PathError,
}

/// Output of one `interpolate` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub value: Value,
    pub unresolved: Vec<UnresolvedReference>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(i64),
}

/// Resolves references against a context tree owned by a single chain run.
#[derive(Debug, Clone)]
pub struct Interpolator {
    context: Value,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl Interpolator {
    /// A non-object context is replaced by an empty object.
    pub fn new(context: Value) -> Self {
        let context = match context {
            Value::Object(_) => context,
            _ => Value::Object(Map::new()),
        };
        Self { context }
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn into_context(self) -> Value {
        self.context
    }

    pub fn interpolate(&self, value: &Value) -> Interpolation {
        let mut unresolved = Vec::new();
        let value = self.walk(value, &mut unresolved);
        Interpolation { value, unresolved }
    }

    /// Whether `value` contains anything that looks like a reference.
    pub fn has_interpolations(value: &Value) -> bool {
        match value {
            Value::String(s) => REFERENCE.is_match(s),
            Value::Array(items) => items.iter().any(Self::has_interpolations),
            Value::Object(map) => map.values().any(Self::has_interpolations),
            _ => false,
        }
    }

    /// Install `{result: value}` at the dotted `event_name` path.
    ///
    /// Intermediate objects are created as needed; a non-object node in the
    /// way is replaced.
    pub fn add_result(&mut self, event_name: &str, value: Value) {
        let parts: Vec<&str> = event_name.split('.').collect();
        if let Value::Object(map) = &mut self.context {
            insert_result(map, &parts, value);
        }
    }

    /// Resolve one path expression (without braces) against the context.
    pub fn resolve(&self, path: &str) -> Result<&Value, PathError> {
        let segments = parse_path(path)?;
        let mut current = &self.context;
        for segment in segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => {
                    map.get(&key).ok_or_else(|| PathError::MissingKey {
                        path: path.to_string(),
                        key,
                    })?
                }
                (Segment::Key(key), _) => {
                    return Err(PathError::MissingKey {
                        path: path.to_string(),
                        key,
                    })
                }
                (Segment::Index(index), Value::Array(items)) => {
                    let len = items.len() as i64;
                    let pos = if index < 0 { len + index } else { index };
                    if pos < 0 || pos >= len {
                        return Err(PathError::OutOfRange {
                            path: path.to_string(),
                            index,
                        });
                    }
                    &items[pos as usize]
                }
                (Segment::Index(index), _) => {
                    return Err(PathError::OutOfRange {
                        path: path.to_string(),
                        index,
                    })
                }
            };
        }
        Ok(current)
    }

    fn walk(&self, value: &Value, unresolved: &mut Vec<UnresolvedReference>) -> Value {
        match value {
            Value::String(text) => self.interpolate_string(text, unresolved),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.walk(item, unresolved))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.walk(v, unresolved)))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    fn interpolate_string(&self, text: &str, unresolved: &mut Vec<UnresolvedReference>) -> Value {
        let matches: Vec<Captures<'_>> = REFERENCE.captures_iter(text).collect();
        if matches.is_empty() {
            return Value::String(text.to_string());
        }

        if matches.len() == 1 && matches[0][0].len() == text.len() {
            let expression = &matches[0][1];
            return match self.lookup(expression, unresolved) {
                Some(value) => value.clone(),
                None => Value::String(text.to_string()),
            };
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in &matches {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            out.push_str(&text[last..whole.start]);
            match self.lookup(&caps[1], unresolved) {
                Some(Value::String(s)) => out.push_str(s),
                Some(other) => out.push_str(&other.to_string()),
                None => out.push_str(&caps[0]),
            }
            last = whole.end;
        }
        out.push_str(&text[last..]);
        Value::String(out)
    }

    fn lookup(&self, expression: &str, unresolved: &mut Vec<UnresolvedReference>) -> Option<&Value> {
        match self.resolve(expression) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(expression = %expression, error = %error, "Failed to resolve reference");
                unresolved.push(UnresolvedReference {
                    expression: expression.to_string(),
                    error,
                });
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Path parsing
// ---------------------------------------------------------------------------

/// `data[0].items[-1].name` → `data`, `0`, `items`, `-1`, `name`
fn parse_path(path: &str) -> Result<Vec<Segment>, PathError> {
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => flush_key(&mut key, &mut segments),
            '[' => {
                flush_key(&mut key, &mut segments);
                let mut raw = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => raw.push(ch),
                        None => return Err(PathError::UnmatchedBracket(path.to_string())),
                    }
                }
                let index = raw.trim().parse::<i64>().map_err(|_| PathError::InvalidIndex {
                    path: path.to_string(),
                    index: raw.clone(),
                })?;
                segments.push(Segment::Index(index));
            }
            _ => key.push(c),
        }
    }
    flush_key(&mut key, &mut segments);

    if segments.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(segments)
}

fn flush_key(key: &mut String, segments: &mut Vec<Segment>) {
    if !key.is_empty() {
        segments.push(Segment::Key(std::mem::take(key)));
    }
}

fn insert_result(map: &mut Map<String, Value>, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [leaf] => {
            let mut leaf_value = Map::new();
            leaf_value.insert("result".to_string(), value);
            map.insert(leaf.to_string(), Value::Object(leaf_value));
        }
        [head, rest @ ..] => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(inner) = child {
                insert_result(inner, rest, value);
            }
        }
    }
}
