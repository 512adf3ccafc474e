//! Engine assembly.
//!
//! [`SyncEngine::builder`] collects the filter, mapping layers, converters,
//! template renderer and run settings. [`SyncEngineBuilder::build`] is where
//! every configuration error surfaces: invalid settings, filter syntax,
//! unknown converters and malformed mappings all fail here, before a run
//! touches the destination.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use xavyo_record_filter::{EvalContext, FilterCache, FilterProgram, Scratch};

use super::config::SyncConfig;
use super::error::{SyncError, SyncResult};
use crate::converter::ConverterRegistry;
use crate::mapping::{ConversionOutcome, ConversionPipeline, MappingLayers, MappingTable};
use crate::record::ConvertedRecord;
use crate::template::{RhaiTemplateRenderer, TemplateRenderer};

/// What happened to one raw record before delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The filter rejected the record.
    FilteredOut,
    /// Ready for delivery.
    Converted(ConvertedRecord),
    /// Required fields were empty.
    Dropped { missing: Vec<String> },
    /// Filter assignment or conversion failed; reported to the destination.
    Errored { error: String },
}

/// Builder for [`SyncEngine`].
#[derive(Default)]
pub struct SyncEngineBuilder {
    filter: Option<String>,
    layers: MappingLayers,
    converters: Option<Arc<ConverterRegistry>>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    filter_cache: Option<Arc<FilterCache>>,
    config: SyncConfig,
    config_values: Value,
}

impl SyncEngineBuilder {
    /// Filter program applied to every record. Blank means no filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_mapping_layers(mut self, layers: MappingLayers) -> Self {
        self.layers = layers;
        self
    }

    /// Use a prepared converter registry (for custom converters).
    #[must_use]
    pub fn with_converters(mut self, converters: Arc<ConverterRegistry>) -> Self {
        self.converters = Some(converters);
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Share compiled filters across engines.
    #[must_use]
    pub fn with_filter_cache(mut self, cache: Arc<FilterCache>) -> Self {
        self.filter_cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Connector configuration values, read by `config` mappings and
    /// templates.
    #[must_use]
    pub fn with_config_values(mut self, values: Value) -> Self {
        self.config_values = values;
        self
    }

    /// Validate everything and assemble the engine.
    pub fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;

        let converters = self.converters.unwrap_or_default();
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(RhaiTemplateRenderer::new()));

        let filter = match self.filter.as_deref().map(str::trim) {
            Some(source) if !source.is_empty() => {
                let compiled = match &self.filter_cache {
                    Some(cache) => cache.get_or_compile(source),
                    None => FilterProgram::compile(source).map(Arc::new),
                };
                let program =
                    compiled.map_err(|e| SyncError::configuration(format!("Invalid filter: {e}")))?;

                for name in program.converter_names() {
                    if !converters.contains(&name) {
                        return Err(SyncError::configuration(format!(
                            "Filter references unknown converter '{name}'"
                        )));
                    }
                }
                debug!(fields = ?program.referenced_fields(), "Compiled record filter");
                Some(program)
            }
            _ => None,
        };

        let table = MappingTable::build(
            &self.layers,
            &self.config_values,
            &converters,
            renderer.as_ref(),
        )?;

        info!(
            fields = table.len(),
            filter = filter.is_some(),
            delivery_mode = %self.config.delivery_mode,
            workers = self.config.workers,
            "Sync engine built"
        );

        Ok(SyncEngine {
            config: self.config,
            filter,
            pipeline: ConversionPipeline::new(Arc::new(table), renderer),
            converters,
            scratch: Scratch::new(),
        })
    }
}

/// Filter, conversion and delivery for one connector.
///
/// The engine owns its scratch environment, so one engine runs one portion
/// at a time.
pub struct SyncEngine {
    pub(super) config: SyncConfig,
    pub(super) filter: Option<Arc<FilterProgram>>,
    pub(super) pipeline: ConversionPipeline,
    pub(super) converters: Arc<ConverterRegistry>,
    pub(super) scratch: Scratch,
}

impl SyncEngine {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn filter(&self) -> Option<&FilterProgram> {
        self.filter.as_deref()
    }

    #[must_use]
    pub fn pipeline(&self) -> &ConversionPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Filter and convert one raw record.
    ///
    /// The scratch environment is reset first, so each record starts from
    /// the same state.
    pub fn prepare(&mut self, raw: &Value) -> RecordOutcome {
        self.scratch.reset();

        if let Some(program) = &self.filter {
            let ctx = EvalContext::new(raw)
                .with_converters(self.converters.as_ref())
                .with_missing(&self.config.missing_value);

            match program.check(ctx, &mut self.scratch) {
                Ok(true) => {}
                Ok(false) => return RecordOutcome::FilteredOut,
                Err(e) => {
                    return RecordOutcome::Errored {
                        error: format!("Filter failed: {e}"),
                    }
                }
            }
        }

        match self.pipeline.convert(raw, &self.scratch) {
            Ok(ConversionOutcome::Converted(record)) => RecordOutcome::Converted(record),
            Ok(ConversionOutcome::Dropped { missing }) => RecordOutcome::Dropped { missing },
            Err(e) => RecordOutcome::Errored {
                error: e.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field(
                "filter",
                &self.filter.as_ref().map(|p| p.source().to_string()),
            )
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}
