//! Scratch environment shared by the statements of one evaluation.
//!
//! Every root name other than `record` resolves here. The owner decides when
//! to [`Scratch::reset`]; the ingest orchestrator resets before each record.

use serde_json::{Map, Value};

use crate::ast::{FieldPath, PathSegment};
use crate::error::EvalError;

/// Mutable scratch roots (`tmp`, `result`) and the constant roots `True`,
/// `False` and `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scratch {
    roots: Map<String, Value>,
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

impl Scratch {
    /// Create a scratch environment holding the default roots.
    #[must_use]
    pub fn new() -> Self {
        let mut roots = Map::new();
        roots.insert("tmp".to_string(), Value::Object(Map::new()));
        roots.insert("result".to_string(), Value::Object(Map::new()));
        roots.insert("True".to_string(), Value::Bool(true));
        roots.insert("False".to_string(), Value::Bool(false));
        roots.insert("None".to_string(), Value::Null);
        Self { roots }
    }

    /// Drop everything written since the last reset.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Look up a root by name.
    #[must_use]
    pub fn root(&self, name: &str) -> Option<&Value> {
        self.roots.get(name)
    }

    /// Values written under `result`.
    #[must_use]
    pub fn result(&self) -> &Value {
        self.roots.get("result").unwrap_or(&Value::Null)
    }

    /// Values written under `tmp`.
    #[must_use]
    pub fn tmp(&self) -> &Value {
        self.roots.get("tmp").unwrap_or(&Value::Null)
    }

    /// All roots as one JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.roots.clone())
    }

    /// Assign a value at a nested path, creating missing intermediate maps.
    ///
    /// The record root, bare root names and list elements are never written.
    pub fn assign(&mut self, path: &FieldPath, value: Value) -> Result<(), EvalError> {
        if path.is_record() {
            return Err(EvalError::assignment(path.to_string(), "the record is read-only"));
        }
        let Some((last, parents)) = path.segments.split_last() else {
            return Err(EvalError::assignment(
                path.to_string(),
                "global names cannot be assigned",
            ));
        };

        let mut current = self
            .roots
            .entry(path.root.clone())
            .or_insert_with(|| Value::Object(Map::new()));

        for segment in parents {
            let key = key_of(path, segment)?;
            current = match current {
                Value::Object(map) => map
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                other => return Err(not_a_map(path, other)),
            };
        }

        let key = key_of(path, last)?;
        match current {
            Value::Object(map) => {
                map.insert(key.to_string(), value);
                Ok(())
            }
            other => Err(not_a_map(path, other)),
        }
    }
}

fn key_of<'p>(path: &FieldPath, segment: &'p PathSegment) -> Result<&'p str, EvalError> {
    match segment {
        PathSegment::Key(key) => Ok(key),
        PathSegment::Index(i) => Err(EvalError::assignment(
            path.to_string(),
            format!("cannot assign through list index {i}"),
        )),
    }
}

fn not_a_map(path: &FieldPath, found: &Value) -> EvalError {
    EvalError::assignment(
        path.to_string(),
        format!(
            "intermediate value is a {}, not a map",
            crate::error::json_type_name(found)
        ),
    )
}
