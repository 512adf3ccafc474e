//! Structured JSON logging setup using tracing.
//!
//! Hosts embedding the engine call [`init_logging`] once at startup. Every
//! run logs through `tracing` with structured fields (`portion_id`,
//! `correlation_id`, counters), so the JSON output can be aggregated per run.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::sync::error::{SyncError, SyncResult};

/// Initialize the tracing subscriber with JSON logging.
///
/// `RUST_LOG` takes precedence over `filter` (e.g. `"info,xavyo_ingest=debug"`).
/// Fails if the filter is invalid or a subscriber is already installed.
pub fn init_logging(filter: &str) -> SyncResult<()> {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| SyncError::configuration(format!("Invalid log filter '{filter}': {e}")))?;

    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .try_init()
        .map_err(|e| SyncError::internal(format!("Logging already initialized: {e}")))?;

    tracing::info!(filter = %filter, "Logging initialized");
    Ok(())
}

/// Initialize logging for tests (with simpler output). Safe to call
/// repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_logging_does_not_panic() {
        init_test_logging();
        init_test_logging();
    }
}
