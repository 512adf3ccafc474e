//! Sync error types.

use thiserror::Error;

/// Errors that end or prevent a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration error (mapping, converter, filter or settings).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Producer authentication failed.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Producer could not reach its source.
    #[error("Connectivity error: {message}")]
    Connectivity { message: String },

    /// Producer failed while listing records.
    #[error("Producer error: {message}")]
    Producer { message: String },

    /// Destination rejected the run or retries were exhausted.
    #[error("Delivery error: {message}")]
    Delivery { message: String },

    /// The destination asked for the run to stop.
    #[error("Sync cancelled for correlation {correlation_id}")]
    Cancelled { correlation_id: String },

    /// Invalid state transition.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    /// Create a producer error.
    pub fn producer(message: impl Into<String>) -> Self {
        Self::Producer {
            message: message.into(),
        }
    }

    /// Create a delivery error.
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(correlation_id: impl Into<String>) -> Self {
        Self::Cancelled {
            correlation_id: correlation_id.into(),
        }
    }

    /// Create an invalid state transition error.
    pub fn invalid_state_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the run failed before any portion activity.
    #[must_use]
    pub fn is_pre_portion(&self) -> bool {
        matches!(
            self,
            SyncError::Configuration { .. }
                | SyncError::Authentication { .. }
                | SyncError::Connectivity { .. }
        )
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by a record producer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProducerError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("connection failed: {message}")]
    Connectivity { message: String },

    #[error("record fetch failed: {message}")]
    Fetch { message: String },
}

impl ProducerError {
    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    /// Create a fetch error.
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }
}

impl From<ProducerError> for SyncError {
    fn from(err: ProducerError) -> Self {
        match err {
            ProducerError::Authentication { message } => SyncError::Authentication { message },
            ProducerError::Connectivity { message } => SyncError::Connectivity { message },
            ProducerError::Fetch { message } => SyncError::Producer { message },
        }
    }
}

/// Errors returned by a destination sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The destination rejected this payload only; the run continues.
    #[error("record rejected: {message}")]
    Rejected { message: String },

    /// Network failure or 5xx; may succeed on retry.
    #[error("transient delivery failure: {message}")]
    Transient { message: String },

    /// The destination refuses the whole run.
    #[error("fatal delivery failure: {message}")]
    Fatal { message: String },
}

impl DeliveryError {
    /// Create a per-record rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Check if this error is transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient { .. })
    }

    /// Whether only the affected payload failed.
    #[must_use]
    pub fn is_per_record(&self) -> bool {
        matches!(self, DeliveryError::Rejected { .. })
    }
}

impl From<DeliveryError> for SyncError {
    fn from(err: DeliveryError) -> Self {
        SyncError::delivery(err.to_string())
    }
}
