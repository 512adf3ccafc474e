//! Declarative field mappings.
//!
//! A mapping says, for one destination field, where its value comes from
//! (`source` path, `config` key, `fixed` literal or `computed` template) and
//! what happens to it afterwards (converter, type coercion, required check).
//!
//! Mappings arrive in three layers: class defaults, server-declared defaults
//! and local overrides. [`MappingLayers::merge`] folds them per field and per
//! key, and [`MappingTable::build`] validates the result into a read-only
//! table used by the [`ConversionPipeline`].

mod pipeline;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::converter::{Converter, ConverterParams, ConverterRegistry};
use crate::record::RecordPath;
use crate::sync::error::{SyncError, SyncResult};
use crate::template::TemplateRenderer;

pub use pipeline::{ConversionError, ConversionOutcome, ConversionPipeline};

/// Destination type a field value is coerced to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    /// Leave the value as produced.
    #[default]
    Raw,
}

impl TargetType {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::String => "string",
            TargetType::Integer => "integer",
            TargetType::Float => "float",
            TargetType::Boolean => "boolean",
            TargetType::List => "list",
            TargetType::Raw => "raw",
        }
    }

    /// Coerce a value to this type. Null stays null.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            TargetType::Raw => Ok(value),
            TargetType::String => Ok(match value {
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            }),
            TargetType::Integer => coerce_integer(&value).map(Value::from),
            TargetType::Float => coerce_float(&value).map(Value::from),
            TargetType::Boolean => coerce_boolean(&value).map(Value::Bool),
            TargetType::List => Ok(match value {
                Value::Array(items) => Value::Array(items),
                other => Value::Array(vec![other]),
            }),
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(TargetType::String),
            "integer" => Ok(TargetType::Integer),
            "float" => Ok(TargetType::Float),
            "boolean" => Ok(TargetType::Boolean),
            "list" => Ok(TargetType::List),
            "raw" => Ok(TargetType::Raw),
            _ => Err(format!("Unknown target type: {s}")),
        }
    }
}

fn coerce_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .ok_or_else(|| format!("{n} is out of integer range")),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                        .ok_or(())
                })
                .map_err(|()| format!("'{s}' is not an integer"))
        }
        other => Err(format!("cannot convert {other} to integer")),
    }
}

fn coerce_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{n} is not a float")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{s}' is not a float")),
        other => Err(format!("cannot convert {other} to float")),
    }
}

fn coerce_boolean(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "on" | "1" => Ok(true),
            "false" | "no" | "n" | "off" | "0" => Ok(false),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        other => Err(format!("cannot convert {other} to boolean")),
    }
}

/// Declaration of one destination field, as written in a mapping layer.
///
/// Every key is optional so that layers can override individual keys. The
/// four source kinds form one group: a layer naming any of them replaces the
/// whole group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldSpec {
    /// Dotted/indexed path into the raw record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Key into the connector configuration values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// Literal value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed: Option<Value>,
    /// Template rendered per record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed: Option<String>,
    /// Converter applied to the resolved value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converter: Option<String>,
    /// Converter parameters. Merged per key across layers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ConverterParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub target_type: Option<TargetType>,
}

impl FieldSpec {
    /// Field sourced from a record path.
    pub fn source(path: impl Into<String>) -> Self {
        Self {
            source: Some(path.into()),
            ..Self::default()
        }
    }

    /// Field with a literal value.
    pub fn fixed(value: Value) -> Self {
        Self {
            fixed: Some(value),
            ..Self::default()
        }
    }

    /// Field rendered from a template.
    pub fn computed(template: impl Into<String>) -> Self {
        Self {
            computed: Some(template.into()),
            ..Self::default()
        }
    }

    /// Set the converter.
    #[must_use]
    pub fn with_converter(mut self, name: impl Into<String>) -> Self {
        self.converter = Some(name.into());
        self
    }

    /// Add a converter parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Mark the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = Some(true);
        self
    }

    /// Set the target type.
    #[must_use]
    pub fn with_type(mut self, target_type: TargetType) -> Self {
        self.target_type = Some(target_type);
        self
    }

    fn source_kinds(&self) -> usize {
        usize::from(self.source.is_some())
            + usize::from(self.config.is_some())
            + usize::from(self.fixed.is_some())
            + usize::from(self.computed.is_some())
    }

    /// Overlay `other` on top of this spec.
    fn merged_with(&self, other: &FieldSpec) -> FieldSpec {
        let mut merged = self.clone();

        if other.source_kinds() > 0 {
            merged.source.clone_from(&other.source);
            merged.config.clone_from(&other.config);
            merged.fixed.clone_from(&other.fixed);
            merged.computed.clone_from(&other.computed);
        }
        if other.converter.is_some() {
            merged.converter.clone_from(&other.converter);
        }
        if let Some(params) = &other.params {
            let target = merged.params.get_or_insert_with(Map::new);
            for (key, value) in params {
                target.insert(key.clone(), value.clone());
            }
        }
        if other.required.is_some() {
            merged.required = other.required;
        }
        if other.target_type.is_some() {
            merged.target_type = other.target_type;
        }

        merged
    }
}

/// One mapping layer: destination field name to spec, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingLayer {
    fields: Vec<(String, FieldSpec)>,
}

impl MappingLayer {
    /// Create an empty layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a layer from a JSON object of field specs.
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let Value::Object(map) = value else {
            return Err(SyncError::configuration(
                "Mapping layer must be an object of field specs",
            ));
        };

        let mut layer = Self::new();
        for (name, spec) in map {
            let spec: FieldSpec = serde_json::from_value(spec.clone()).map_err(|e| {
                SyncError::configuration(format!("Invalid mapping for field '{name}': {e}"))
            })?;
            layer.insert(name.clone(), spec);
        }
        Ok(layer)
    }

    /// Add or replace a field. Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, spec: FieldSpec) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = spec,
            None => self.fields.push((name, spec)),
        }
    }

    /// Builder form of [`MappingLayer::insert`].
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.insert(name, spec);
        self
    }

    /// Get a field spec by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Iterate fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(n, s)| (n.as_str(), s))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for MappingLayer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, spec) in &self.fields {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MappingLayer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        MappingLayer::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// The three mapping layers, lowest precedence first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingLayers {
    /// Defaults shipped with the connector class.
    pub class_defaults: MappingLayer,
    /// Defaults declared by the destination server.
    pub server_defaults: MappingLayer,
    /// Local overrides.
    pub local_overrides: MappingLayer,
}

impl MappingLayers {
    /// Layers with only local mappings.
    #[must_use]
    pub fn local(layer: MappingLayer) -> Self {
        Self {
            local_overrides: layer,
            ..Self::default()
        }
    }

    /// Merge the layers. Later layers win per key; fields keep the position
    /// of their first declaration.
    #[must_use]
    pub fn merge(&self) -> MappingLayer {
        let mut merged = MappingLayer::new();

        for layer in [&self.class_defaults, &self.server_defaults, &self.local_overrides] {
            for (name, spec) in layer.iter() {
                let next = match merged.get(name) {
                    Some(existing) => existing.merged_with(spec),
                    None => spec.clone(),
                };
                merged.insert(name, next);
            }
        }

        merged
    }
}

/// Where a field's value comes from, after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    Path(RecordPath),
    /// Config values are resolved once when the table is built.
    Config { key: String, value: Value },
    Fixed(Value),
    Computed(String),
}

/// A validated field mapping.
#[derive(Clone)]
pub struct FieldMapping {
    pub name: String,
    pub source: ValueSource,
    pub converter: Option<Arc<dyn Converter>>,
    pub params: ConverterParams,
    pub required: bool,
    pub target_type: TargetType,
}

impl fmt::Debug for FieldMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMapping")
            .field("name", &self.name)
            .field("source", &self.source)
            .field(
                "converter",
                &self.converter.as_ref().map(|c| c.name().to_string()),
            )
            .field("params", &self.params)
            .field("required", &self.required)
            .field("target_type", &self.target_type)
            .finish()
    }
}

/// Read-only table of validated mappings, in field order.
#[derive(Debug, Clone)]
pub struct MappingTable {
    fields: Vec<FieldMapping>,
    config_values: Value,
}

impl MappingTable {
    /// Merge and validate mapping layers.
    ///
    /// Fails with a configuration error when a field has zero or several
    /// source kinds, a source path is malformed, a converter is unknown or a
    /// computed template does not parse.
    pub fn build(
        layers: &MappingLayers,
        config_values: &Value,
        registry: &ConverterRegistry,
        renderer: &dyn TemplateRenderer,
    ) -> SyncResult<Self> {
        let merged = layers.merge();
        let mut fields = Vec::with_capacity(merged.len());

        for (name, spec) in merged.iter() {
            fields.push(Self::build_field(name, spec, config_values, registry, renderer)?);
        }

        debug!(fields = fields.len(), "Built mapping table");
        Ok(Self {
            fields,
            config_values: config_values.clone(),
        })
    }

    fn build_field(
        name: &str,
        spec: &FieldSpec,
        config_values: &Value,
        registry: &ConverterRegistry,
        renderer: &dyn TemplateRenderer,
    ) -> SyncResult<FieldMapping> {
        let kinds = spec.source_kinds();
        if kinds != 1 {
            return Err(SyncError::configuration(format!(
                "Field '{name}' must set exactly one source kind (found {kinds})"
            )));
        }

        let source = if let Some(path) = &spec.source {
            ValueSource::Path(RecordPath::parse(path).map_err(|e| {
                SyncError::configuration(format!("Field '{name}': {e}"))
            })?)
        } else if let Some(key) = &spec.config {
            let path = RecordPath::parse(key)
                .map_err(|e| SyncError::configuration(format!("Field '{name}': {e}")))?;
            ValueSource::Config {
                key: key.clone(),
                value: path.lookup(config_values).cloned().unwrap_or(Value::Null),
            }
        } else if let Some(template) = &spec.computed {
            renderer.validate(template).map_err(|e| {
                SyncError::configuration(format!("Field '{name}' computed template: {e}"))
            })?;
            ValueSource::Computed(template.clone())
        } else {
            ValueSource::Fixed(spec.fixed.clone().unwrap_or(Value::Null))
        };

        let converter = match &spec.converter {
            Some(converter) => Some(registry.resolve(converter).map_err(|e| {
                SyncError::configuration(format!("Field '{name}': {e}"))
            })?),
            None => None,
        };

        Ok(FieldMapping {
            name: name.to_string(),
            source,
            converter,
            params: spec.params.clone().unwrap_or_default(),
            required: spec.required.unwrap_or(false),
            target_type: spec.target_type.unwrap_or_default(),
        })
    }

    /// Field mappings in order.
    #[must_use]
    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    /// Get a field mapping by destination name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Connector configuration values visible to templates.
    #[must_use]
    pub fn config_values(&self) -> &Value {
        &self.config_values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
