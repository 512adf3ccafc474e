//! Error types for filter compilation and evaluation.

use serde_json::Value;
use thiserror::Error;

use crate::parser::ParseError;

/// Runtime error while evaluating a program against one record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Operands cannot be compared with the operator.
    #[error("Cannot apply '{operator}' to {left} and {right}")]
    TypeMismatch {
        operator: String,
        left: &'static str,
        right: &'static str,
    },

    /// A function received an argument it cannot handle.
    #[error("Invalid argument to {function}(): {message}")]
    InvalidArgument { function: String, message: String },

    /// A dynamic regex pattern failed to compile.
    #[error("Invalid regex pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A converter invoked through `convert()` failed.
    #[error("Converter '{name}' failed: {message}")]
    Converter { name: String, message: String },

    /// `convert()` was called but no converter host was supplied.
    #[error("No converters available for convert('{name}')")]
    NoConverterHost { name: String },

    /// A `set` statement could not be applied.
    #[error("Cannot set '{target}': {message}")]
    Assignment { target: String, message: String },
}

impl EvalError {
    /// Create an invalid argument error.
    pub fn invalid_argument(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create an assignment error.
    pub fn assignment(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Assignment {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a type mismatch error for two operands.
    pub fn type_mismatch(operator: impl Into<String>, left: &Value, right: &Value) -> Self {
        Self::TypeMismatch {
            operator: operator.into(),
            left: json_type_name(left),
            right: json_type_name(right),
        }
    }

    /// Whether this error came from a `set` statement.
    ///
    /// Assignment failures are reported per record; every other runtime
    /// error filters the record out.
    #[must_use]
    pub fn is_assignment(&self) -> bool {
        matches!(self, EvalError::Assignment { .. })
    }
}

/// Combined error for one-shot compile-and-evaluate helpers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("Compile error: {0}")]
    Compile(#[from] ParseError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),
}

/// Get the type name of a JSON value for error messages.
#[must_use]
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
