//! Per-record conversion through a [`MappingTable`].

use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use xavyo_record_filter::Scratch;

use super::{FieldMapping, MappingTable, ValueSource};
use crate::record::{is_empty_value, ConvertedRecord};
use crate::template::{TemplateError, TemplateRenderer};

/// Result of converting one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    /// All required fields present.
    Converted(ConvertedRecord),
    /// Required fields were empty. The record is skipped, not errored.
    Dropped { missing: Vec<String> },
}

impl ConversionOutcome {
    /// The converted record, if any.
    #[must_use]
    pub fn into_record(self) -> Option<ConvertedRecord> {
        match self {
            ConversionOutcome::Converted(record) => Some(record),
            ConversionOutcome::Dropped { .. } => None,
        }
    }
}

/// Per-record conversion failure. The record is reported to the destination
/// as errored and the run continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Cannot render computed field '{field}': {reason}")]
    Render {
        field: String,
        reason: TemplateError,
    },
}

/// Applies a mapping table to raw records.
#[derive(Clone)]
pub struct ConversionPipeline {
    table: Arc<MappingTable>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl ConversionPipeline {
    /// Create a pipeline over a built table.
    pub fn new(table: Arc<MappingTable>, renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { table, renderer }
    }

    /// The mapping table.
    #[must_use]
    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Convert one raw record.
    ///
    /// Fields are processed in table order. Computed templates see `record`,
    /// `config`, the scratch roots `tmp` and `result`, and `fields` (values
    /// converted so far).
    pub fn convert(
        &self,
        raw: &Value,
        scratch: &Scratch,
    ) -> Result<ConversionOutcome, ConversionError> {
        let mut converted = ConvertedRecord::new();
        let mut missing = Vec::new();

        for field in self.table.fields() {
            let resolved = self.resolve(field, raw, scratch, &converted)?;
            let value = self.finish(field, raw, resolved);

            if field.required && is_empty_value(&value) {
                missing.push(field.name.clone());
            }
            converted.insert(field.name.clone(), value);
        }

        if !missing.is_empty() {
            warn!(
                missing_fields = ?missing,
                record = %raw,
                "Record dropped, required fields missing"
            );
            return Ok(ConversionOutcome::Dropped { missing });
        }

        Ok(ConversionOutcome::Converted(converted))
    }

    fn resolve(
        &self,
        field: &FieldMapping,
        raw: &Value,
        scratch: &Scratch,
        converted: &ConvertedRecord,
    ) -> Result<Value, ConversionError> {
        Ok(match &field.source {
            ValueSource::Path(path) => path.lookup(raw).cloned().unwrap_or(Value::Null),
            ValueSource::Config { value, .. } | ValueSource::Fixed(value) => value.clone(),
            ValueSource::Computed(template) => {
                let context = json!({
                    "record": raw,
                    "config": self.table.config_values(),
                    "tmp": scratch.tmp(),
                    "result": scratch.result(),
                    "fields": converted,
                });
                self.renderer
                    .render_to_native(template, &context)
                    .map_err(|reason| ConversionError::Render {
                        field: field.name.clone(),
                        reason,
                    })?
            }
        })
    }

    /// Apply converter and type coercion. Failures null the field.
    fn finish(&self, field: &FieldMapping, raw: &Value, value: Value) -> Value {
        let value = match &field.converter {
            Some(converter) => {
                match converter.convert(&field.name, raw, value, &field.params) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(
                            field = %field.name,
                            converter = converter.name(),
                            error = %e,
                            "Converter failed, field set to null"
                        );
                        Value::Null
                    }
                }
            }
            None => value,
        };

        match field.target_type.coerce(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    field = %field.name,
                    target_type = %field.target_type,
                    error = %e,
                    "Type coercion failed, field set to null"
                );
                Value::Null
            }
        }
    }
}

impl std::fmt::Debug for ConversionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionPipeline")
            .field("fields", &self.table.len())
            .finish_non_exhaustive()
    }
}
