//! Collaborator traits: record producers and destination sinks.

use async_trait::async_trait;

use super::error::{DeliveryError, ProducerError};
use super::types::{LoadOptions, PortionId, PortionInfo, ProducedRecord, UploadPayload};

/// Source of raw records, one per vendor API.
///
/// The sequence is lazy, finite and not restartable: once `next_record`
/// returns `Ok(None)` the producer is exhausted.
#[async_trait]
pub trait RecordProducer: Send {
    /// Authenticate against the source.
    ///
    /// Authentication and connectivity errors stop the run before any portion
    /// activity.
    async fn authenticate(&mut self) -> Result<(), ProducerError>;

    /// Prepare the record stream.
    async fn load_records(&mut self, _options: &LoadOptions) -> Result<(), ProducerError> {
        Ok(())
    }

    /// Pull the next record.
    async fn next_record(&mut self) -> Result<Option<ProducedRecord>, ProducerError>;
}

/// The central platform receiving converted records.
#[async_trait]
pub trait DestinationSink: Send + Sync {
    /// Deliver one payload into a portion.
    async fn upload(&self, portion_id: PortionId, payload: UploadPayload)
        -> Result<(), DeliveryError>;

    /// Close a portion that received uploads.
    async fn finalize_portion(&self, portion_id: PortionId) -> Result<(), DeliveryError>;

    /// Record a failed run as an already finalized portion.
    async fn create_synthetic_finalized_failed_portion(
        &self,
        service_id: &str,
        correlation_id: &str,
        error: &str,
        is_fatal: bool,
    ) -> Result<(), DeliveryError>;

    /// Record a run that delivered nothing as an already finalized portion.
    async fn create_synthetic_finalized_successful_portion(
        &self,
        service_id: &str,
        correlation_id: &str,
    ) -> Result<(), DeliveryError>;

    /// Current destination view of the run, including cancellation.
    async fn get_portion_info(&self, correlation_id: &str) -> Result<PortionInfo, DeliveryError>;

    /// Whether this destination keeps record-level portion accounting.
    /// When false, finalize is a logged no-op.
    fn tracks_portions(&self) -> bool {
        true
    }
}
