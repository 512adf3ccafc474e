//! Sync run types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::{SyncError, SyncResult};
use crate::record::{ConvertedRecord, RawRecord};

/// Identifier of the portion a run delivers into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortionId(Uuid);

impl PortionId {
    /// Create a new random PortionId.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a PortionId from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PortionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PortionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identity of a run as seen by the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Destination-side service (connector instance) id.
    pub service_id: String,
    /// Correlation id shared by all calls of this run.
    pub correlation_id: String,
}

impl RunContext {
    /// Create a context with a fresh correlation id.
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Use an explicit correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Options passed to a producer before streaming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// The run stops after this many processed records; producers may use it
    /// to size their pages.
    pub limit: Option<usize>,
    pub correlation_id: String,
}

/// One item from a producer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProducedRecord {
    Record(RawRecord),
    /// The producer could not fully read this record.
    Failed { record: RawRecord, error: String },
}

/// What a delivery task hands to the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadPayload {
    /// One converted record (singular mode).
    Record(ConvertedRecord),
    /// A flushed batch (bulk mode).
    Batch(Vec<ConvertedRecord>),
    /// A record that failed conversion, reported with its error.
    Failed { record: RawRecord, error: String },
}

impl UploadPayload {
    /// Number of records carried.
    #[must_use]
    pub fn record_count(&self) -> usize {
        match self {
            UploadPayload::Record(_) | UploadPayload::Failed { .. } => 1,
            UploadPayload::Batch(records) => records.len(),
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, UploadPayload::Failed { .. })
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            UploadPayload::Record(_) => "record",
            UploadPayload::Batch(_) => "batch",
            UploadPayload::Failed { .. } => "failed",
        }
    }
}

/// Destination view of a portion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortionInfo {
    /// The destination asked for the run to stop.
    #[serde(default)]
    pub canceled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_received: Option<u64>,
}

/// Run lifecycle.
///
/// ```text
/// Idle -> Authorizing -> Streaming -> Draining -> Finalized
///              |             |           |
///              +-> Finalized +-> Aborted +-> Aborted
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Authorizing,
    Streaming,
    Draining,
    Finalized,
    Aborted,
}

impl RunState {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Authorizing => "authorizing",
            RunState::Streaming => "streaming",
            RunState::Draining => "draining",
            RunState::Finalized => "finalized",
            RunState::Aborted => "aborted",
        }
    }

    /// Check if the run has ended.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finalized | RunState::Aborted)
    }

    /// Check if a transition is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Authorizing)
                | (RunState::Authorizing, RunState::Streaming | RunState::Finalized)
                | (RunState::Streaming, RunState::Draining | RunState::Aborted)
                | (RunState::Draining, RunState::Finalized | RunState::Aborted)
        )
    }

    /// Move to `next`, rejecting invalid transitions.
    pub fn transition(&mut self, next: RunState) -> SyncResult<()> {
        if !self.can_transition_to(next) {
            return Err(SyncError::invalid_state_transition(
                self.as_str(),
                next.as_str(),
            ));
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(RunState::Idle),
            "authorizing" => Ok(RunState::Authorizing),
            "streaming" => Ok(RunState::Streaming),
            "draining" => Ok(RunState::Draining),
            "finalized" => Ok(RunState::Finalized),
            "aborted" => Ok(RunState::Aborted),
            _ => Err(format!("Unknown run state: {s}")),
        }
    }
}

/// How the portion was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// `finalize_portion` was called for a portion with uploads.
    Finalized,
    /// No uploads; a synthetic successful portion was created.
    Empty,
    /// A synthetic failed portion was created.
    Failed,
    /// The sink does not track portions; nothing was called.
    Skipped,
    /// The run never reached the portion stage (auth failure, dry run).
    NotStarted,
}

/// Summary of one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub portion_id: PortionId,
    pub correlation_id: String,
    /// Items pulled from the producer.
    pub fetched: usize,
    /// Records the filter rejected.
    pub filtered_out: usize,
    /// Records that reached conversion.
    pub processed: usize,
    /// Records that converted successfully.
    pub converted: usize,
    /// Records dropped for missing required fields.
    pub dropped: usize,
    /// Records reported to the destination as failed.
    pub errored: usize,
    /// Records accepted by the destination.
    pub delivered: usize,
    /// Upload calls that succeeded.
    pub delivery_calls: usize,
    /// Records the destination rejected individually.
    pub rejected: usize,
    /// Delivery tasks still running when the join timed out.
    pub abandoned_tasks: usize,
    pub state: RunState,
    pub finalize: FinalizeOutcome,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    /// Create a new empty summary.
    #[must_use]
    pub fn new(portion_id: PortionId, correlation_id: impl Into<String>) -> Self {
        Self {
            portion_id,
            correlation_id: correlation_id.into(),
            fetched: 0,
            filtered_out: 0,
            processed: 0,
            converted: 0,
            dropped: 0,
            errored: 0,
            delivered: 0,
            delivery_calls: 0,
            rejected: 0,
            abandoned_tasks: 0,
            state: RunState::Idle,
            finalize: FinalizeOutcome::NotStarted,
            dry_run: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Run duration in milliseconds, once finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_transitions() {
        let mut state = RunState::Idle;
        state.transition(RunState::Authorizing).unwrap();
        state.transition(RunState::Streaming).unwrap();
        state.transition(RunState::Draining).unwrap();
        state.transition(RunState::Finalized).unwrap();
        assert!(state.is_terminal());

        let mut state = RunState::Idle;
        let err = state.transition(RunState::Streaming).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        assert_eq!(state, RunState::Idle);

        assert!(RunState::Authorizing.can_transition_to(RunState::Finalized));
        assert!(!RunState::Authorizing.can_transition_to(RunState::Aborted));
        assert!(!RunState::Finalized.can_transition_to(RunState::Aborted));
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            RunState::Idle,
            RunState::Authorizing,
            RunState::Streaming,
            RunState::Draining,
            RunState::Finalized,
            RunState::Aborted,
        ] {
            assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        }
    }

    #[test]
    fn test_payload_counts() {
        let record = json!({"A": 1}).as_object().unwrap().clone();
        assert_eq!(UploadPayload::Record(record.clone()).record_count(), 1);
        assert_eq!(
            UploadPayload::Batch(vec![record.clone(), record]).record_count(),
            2
        );
        let failed = UploadPayload::Failed {
            record: json!({"id": 1}),
            error: "boom".into(),
        };
        assert!(failed.is_failure());
        assert_eq!(failed.kind(), "failed");
    }

    #[test]
    fn test_portion_info_deserialize() {
        let info: PortionInfo = serde_json::from_str(r#"{"canceled": true}"#).unwrap();
        assert!(info.canceled);
        assert_eq!(info.records_received, None);
    }
}
