//! Record types and dotted/indexed path lookup.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Untyped record as produced by a connector.
pub type RawRecord = Value;

/// Flat destination record: field name to final value.
pub type ConvertedRecord = Map<String, Value>;

/// A source path such as `user.mail`, `emails.0.address` or `emails[0].address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPath {
    raw: String,
    parts: Vec<String>,
}

impl RecordPath {
    /// Parse a path. Brackets are accepted as an alternative to dotted indexes.
    pub fn parse(path: &str) -> Result<Self, String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err("path is empty".to_string());
        }

        let mut parts = Vec::new();
        for piece in trimmed.split('.') {
            let mut rest = piece;
            let name_end = rest.find('[').unwrap_or(rest.len());
            let (name, brackets) = rest.split_at(name_end);
            if !name.is_empty() {
                parts.push(name.to_string());
            } else if brackets.is_empty() {
                return Err(format!("empty segment in path '{trimmed}'"));
            }
            rest = brackets;

            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(close) = stripped.find(']') else {
                    return Err(format!("unclosed '[' in path '{trimmed}'"));
                };
                let index = &stripped[..close];
                if index.parse::<usize>().is_err() {
                    return Err(format!("invalid index '{index}' in path '{trimmed}'"));
                }
                parts.push(index.to_string());
                rest = &stripped[close + 1..];
            }

            if !rest.is_empty() {
                return Err(format!("unexpected '{rest}' in path '{trimmed}'"));
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            parts,
        })
    }

    /// Look the path up in a record. Returns `None` when any segment is missing.
    #[must_use]
    pub fn lookup<'v>(&self, source: &'v Value) -> Option<&'v Value> {
        let mut current = source;

        for part in &self.parts {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    let idx: usize = part.parse().ok()?;
                    current = arr.get(idx)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// The path as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for RecordPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Whether a value counts as empty for required-field checks.
///
/// Null, blank strings, empty lists and empty maps are empty. `false` and `0`
/// are real values.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
