//! # Record Ingest Engine
//!
//! Moves records from external data sources into the xavyo platform.
//!
//! This crate provides:
//! - Named value converters with a lazily resolved registry
//! - Layered, declarative field mappings and the per-record conversion pipeline
//! - Sandboxed templating for computed fields
//! - The sync orchestrator: batching, bounded concurrent delivery, retries and
//!   the portion protocol
//!
//! Record filtering uses the `xavyo-record-filter` language.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌───────────────────┐
//! │   Producer   │────►│    Filter    │────►│ ConversionPipeline│
//! │ (vendor API) │     │ (FilterProg) │     │  (MappingTable)   │
//! └──────────────┘     └──────────────┘     └─────────┬─────────┘
//!                                                     │
//!                      ┌──────────────┐     ┌─────────▼─────────┐
//!                      │ Destination  │◄────│  Batcher + Pool   │
//!                      │    Sink      │     │  (ResilientSink)  │
//!                      └──────────────┘     └───────────────────┘
//! ```

pub mod converter;
pub mod logging;
pub mod mapping;
pub mod record;
pub mod sync;
pub mod template;

pub use converter::{Converter, ConverterError, ConverterParams, ConverterRegistry, FnConverter};
pub use mapping::{
    ConversionError, ConversionOutcome, ConversionPipeline, FieldSpec, MappingLayer, MappingLayers,
    MappingTable, TargetType,
};
pub use record::{ConvertedRecord, RawRecord, RecordPath};
pub use sync::{
    DeliveryError, DeliveryMode, DestinationSink, PortionId, PortionInfo, ProducedRecord,
    ProducerError, RecordOutcome, RecordProducer, ResilientSink, RunContext, RunState, RunSummary,
    SyncConfig, SyncEngine, SyncError, SyncResult, UploadPayload,
};
pub use template::{RhaiTemplateRenderer, TemplateError, TemplateRenderer};
