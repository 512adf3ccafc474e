//! Sync orchestration.
//!
//! Moves records from a [`RecordProducer`] into a [`DestinationSink`]:
//!
//! ```text
//! ┌──────────┐    ┌────────┐    ┌─────────┐    ┌─────────┐    ┌──────────────┐
//! │ Producer │───►│ Filter │───►│ Mapping │───►│ Batcher │───►│ DeliveryPool │
//! └──────────┘    └────────┘    └─────────┘    └─────────┘    └──────┬───────┘
//!                                                                    ▼
//!                                                            finalize portion
//! ```
//!
//! ## Portions
//!
//! Each run delivers into one portion, identified by a fresh [`PortionId`].
//! A run closes its portion exactly once:
//!
//! - uploads happened: `finalize_portion`
//! - nothing was uploaded: a synthetic successful ("empty") portion
//! - fatal error or cancellation: a synthetic failed portion, marked fatal
//!   when the destination never accepted an upload
//! - the destination does not track portions: nothing, logged
//!
//! Authentication failures end the run before any portion activity.
//!
//! ## Example
//!
//! ```ignore
//! let mut engine = SyncEngine::builder()
//!     .with_filter(r#"AND { record.status == "active"; }"#)
//!     .with_mapping_layers(layers)
//!     .with_config(SyncConfig::default())
//!     .build()?;
//!
//! let sink = Arc::new(ResilientSink::new(client, engine.config().retry.clone()));
//! let summary = engine.run(&mut producer, sink, &RunContext::new("svc-1")).await?;
//! ```

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
mod orchestrator;
pub mod pool;
pub mod resilient;
pub mod traits;
pub mod types;

pub use batch::{Batcher, FlushReason};
pub use config::{DeliveryMode, RetryConfig, SyncConfig};
pub use engine::{RecordOutcome, SyncEngine, SyncEngineBuilder};
pub use error::{DeliveryError, ProducerError, SyncError, SyncResult};
pub use pool::{DeliveryPool, DeliveryStats};
pub use resilient::{ResilientSink, RetryExecutor};
pub use traits::{DestinationSink, RecordProducer};
pub use types::{
    FinalizeOutcome, LoadOptions, PortionId, PortionInfo, ProducedRecord, RunContext, RunState,
    RunSummary, UploadPayload,
};
