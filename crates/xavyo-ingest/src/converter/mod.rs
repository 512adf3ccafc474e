//! Named value converters.
//!
//! A converter is a pure function `(field, record, value, params) -> value`.
//! The [`ConverterRegistry`] resolves names lazily from the built-in
//! catalogue (plus anything registered explicitly) and caches the result.
//! Unknown names are rejected when the mapping table is built, never while
//! records are flowing.

mod builtin;

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use xavyo_record_filter::ConverterHost;

pub use builtin::BUILTIN_CONVERTERS;

/// Converter parameters as declared in a field mapping.
pub type ConverterParams = Map<String, Value>;

/// Errors raised by converters.
///
/// Bad input values are not errors: converters log and return the original
/// value. These cover misconfiguration and lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConverterError {
    /// No converter with this name exists.
    #[error("Unknown converter '{name}'")]
    Unknown { name: String },

    /// A parameter is missing or has the wrong type.
    #[error("Converter '{converter}' parameter '{param}': {message}")]
    InvalidParam {
        converter: String,
        param: String,
        message: String,
    },

    /// The converter could not produce a value.
    #[error("Converter '{converter}' failed: {message}")]
    Failed { converter: String, message: String },
}

impl ConverterError {
    /// Create an invalid parameter error.
    pub fn invalid_param(
        converter: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParam {
            converter: converter.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create a conversion failure.
    pub fn failed(converter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            converter: converter.into(),
            message: message.into(),
        }
    }
}

/// A named value transformation.
pub trait Converter: Send + Sync {
    /// Converter name as referenced in mappings.
    fn name(&self) -> &str;

    /// Convert one field value.
    fn convert(
        &self,
        field: &str,
        record: &Value,
        value: Value,
        params: &ConverterParams,
    ) -> Result<Value, ConverterError>;
}

impl fmt::Debug for dyn Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter").field("name", &self.name()).finish()
    }
}

/// Signature of a function-backed converter.
pub type ConvertFn =
    fn(&str, &Value, Value, &ConverterParams) -> Result<Value, ConverterError>;

/// Converter backed by a plain function.
#[derive(Debug, Clone, Copy)]
pub struct FnConverter {
    name: &'static str,
    func: ConvertFn,
}

impl FnConverter {
    /// Wrap a function as a converter.
    #[must_use]
    pub const fn new(name: &'static str, func: ConvertFn) -> Self {
        Self { name, func }
    }
}

impl Converter for FnConverter {
    fn name(&self) -> &str {
        self.name
    }

    fn convert(
        &self,
        field: &str,
        record: &Value,
        value: Value,
        params: &ConverterParams,
    ) -> Result<Value, ConverterError> {
        (self.func)(field, record, value, params)
    }
}

/// Registry of converters owned by one engine instance.
#[derive(Default)]
pub struct ConverterRegistry {
    resolved: DashMap<String, Arc<dyn Converter>>,
    custom: DashMap<String, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// Create a registry backed by the built-in catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom converter. Custom names shadow built-ins.
    pub fn register(&self, converter: Arc<dyn Converter>) {
        let name = converter.name().to_string();
        self.resolved.remove(&name);
        self.custom.insert(name, converter);
    }

    /// Resolve a converter by name, caching it on first use.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Converter>, ConverterError> {
        if let Some(converter) = self.resolved.get(name) {
            return Ok(Arc::clone(converter.value()));
        }

        let converter: Arc<dyn Converter> = if let Some(custom) = self.custom.get(name) {
            Arc::clone(custom.value())
        } else {
            let builtin = BUILTIN_CONVERTERS
                .iter()
                .find(|c| c.name() == name)
                .ok_or_else(|| ConverterError::Unknown {
                    name: name.to_string(),
                })?;
            Arc::new(*builtin)
        };

        debug!(converter = %name, "Resolved converter");
        self.resolved
            .insert(name.to_string(), Arc::clone(&converter));
        Ok(converter)
    }

    /// Whether a name can be resolved.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.custom.contains_key(name) || BUILTIN_CONVERTERS.iter().any(|c| c.name() == name)
    }

    /// Names of all available converters, sorted.
    #[must_use]
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_CONVERTERS
            .iter()
            .map(|c| c.name().to_string())
            .chain(self.custom.iter().map(|e| e.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Number of converters resolved so far.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.resolved.len()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("cached", &self.resolved.len())
            .field("custom", &self.custom.len())
            .finish()
    }
}

impl ConverterHost for ConverterRegistry {
    fn invoke(
        &self,
        name: &str,
        record: &Value,
        value: Value,
        params: &Map<String, Value>,
    ) -> Result<Value, String> {
        let converter = self.resolve(name).map_err(|e| e.to_string())?;
        converter
            .convert("filter", record, value, params)
            .map_err(|e| e.to_string())
    }
}
