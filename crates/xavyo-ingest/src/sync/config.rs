//! Sync run configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::error::{SyncError, SyncResult};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "XAVYO_INGEST_";

/// How converted records are handed to the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One upload call per record.
    Singular,
    /// Records are buffered and uploaded in batches.
    #[default]
    Bulk,
}

impl DeliveryMode {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Singular => "singular",
            DeliveryMode::Bulk => "bulk",
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "singular" => Ok(DeliveryMode::Singular),
            "bulk" => Ok(DeliveryMode::Bulk),
            _ => Err(format!("Unknown delivery mode: {s}")),
        }
    }
}

/// Retry behaviour for transient delivery failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay before first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// No retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Settings for one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Singular or bulk delivery.
    pub delivery_mode: DeliveryMode,
    /// Upper bound on records per batch.
    pub batch_size: usize,
    /// Flush threshold. Defaults to `batch_size`.
    pub send_size: Option<usize>,
    /// Concurrent delivery tasks. `0` delivers inline.
    pub workers: usize,
    /// How long to wait for in-flight deliveries before finalizing.
    pub join_timeout_secs: u64,
    /// Stop after this many processed records.
    pub record_count: Option<usize>,
    /// Poll the destination for cancellation every N fetched records.
    pub cancel_check_every: usize,
    /// Filter and convert without uploading.
    pub dry_run: bool,
    /// Value returned by the filter language for missing paths.
    pub missing_value: Value,
    /// Retry policy for transient delivery errors.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Get the join timeout as Duration.
    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    /// Flush threshold actually used.
    #[must_use]
    pub fn effective_send_size(&self) -> usize {
        match self.delivery_mode {
            DeliveryMode::Singular => 1,
            DeliveryMode::Bulk => self.send_size.unwrap_or(self.batch_size).min(self.batch_size),
        }
    }

    /// Check if this configuration is valid.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size < 1 || self.batch_size > 10_000 {
            return Err(SyncError::configuration(
                "Batch size must be between 1 and 10000",
            ));
        }
        if let Some(send_size) = self.send_size {
            if send_size < 1 || send_size > self.batch_size {
                return Err(SyncError::configuration(
                    "Send size must be between 1 and batch size",
                ));
            }
        }
        if self.workers > 256 {
            return Err(SyncError::configuration("Workers cannot exceed 256"));
        }
        if self.join_timeout_secs < 1 {
            return Err(SyncError::configuration(
                "Join timeout must be at least 1 second",
            ));
        }
        if self.cancel_check_every < 1 {
            return Err(SyncError::configuration(
                "Cancellation check interval must be at least 1 record",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(SyncError::configuration(
                "Backoff multiplier must be at least 1.0",
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(SyncError::configuration(
                "Initial retry delay cannot exceed max delay",
            ));
        }
        Ok(())
    }

    /// Apply `XAVYO_INGEST_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> SyncResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognised names: `XAVYO_INGEST_WORKERS`, `XAVYO_INGEST_BATCH_SIZE`,
    /// `XAVYO_INGEST_RECORD_COUNT` and `XAVYO_INGEST_DRY_RUN`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> SyncResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value.trim().to_string()))
        };

        if let Some((name, value)) = var("WORKERS") {
            self.workers = parse_number(&name, &value)?;
            debug!(workers = self.workers, "Applied override");
        }
        if let Some((name, value)) = var("BATCH_SIZE") {
            self.batch_size = parse_number(&name, &value)?;
            debug!(batch_size = self.batch_size, "Applied override");
        }
        if let Some((name, value)) = var("RECORD_COUNT") {
            self.record_count = if value.is_empty() {
                None
            } else {
                Some(parse_number(&name, &value)?)
            };
            debug!(record_count = ?self.record_count, "Applied override");
        }
        if let Some((name, value)) = var("DRY_RUN") {
            self.dry_run = match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(SyncError::configuration(format!(
                        "{name} must be a boolean, got '{value}'"
                    )))
                }
            };
            debug!(dry_run = self.dry_run, "Applied override");
        }

        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> SyncResult<usize> {
    value.parse().map_err(|_| {
        SyncError::configuration(format!("{name} must be a non-negative integer, got '{value}'"))
    })
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::Bulk,
            batch_size: 100,
            send_size: None,
            workers: 4,
            join_timeout_secs: 300,
            record_count: None,
            cancel_check_every: 100,
            dry_run: false,
            missing_value: Value::Null,
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_send_size(), 100);
        assert_eq!(config.join_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_validation() {
        let config = SyncConfig {
            batch_size: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            send_size: Some(500),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            cancel_check_every: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_send_size() {
        let config = SyncConfig {
            send_size: Some(25),
            ..SyncConfig::default()
        };
        assert_eq!(config.effective_send_size(), 25);

        let config = SyncConfig {
            delivery_mode: DeliveryMode::Singular,
            ..SyncConfig::default()
        };
        assert_eq!(config.effective_send_size(), 1);
    }

    #[test]
    fn test_delivery_mode_round_trip() {
        for mode in [DeliveryMode::Singular, DeliveryMode::Bulk] {
            assert_eq!(mode.as_str().parse::<DeliveryMode>().unwrap(), mode);
        }
        assert!("stream".parse::<DeliveryMode>().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"workers": 0, "delivery_mode": "singular"}"#).unwrap();
        assert_eq!(config.workers, 0);
        assert_eq!(config.delivery_mode, DeliveryMode::Singular);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("XAVYO_INGEST_WORKERS", "8"),
            ("XAVYO_INGEST_BATCH_SIZE", "50"),
            ("XAVYO_INGEST_RECORD_COUNT", "1000"),
            ("XAVYO_INGEST_DRY_RUN", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config
            .apply_overrides_from(|name| vars.get(name).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.record_count, Some(1000));
        assert!(config.dry_run);

        let mut config = SyncConfig::default();
        let err = config
            .apply_overrides_from(|name| {
                (name == "XAVYO_INGEST_WORKERS").then(|| "many".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains("XAVYO_INGEST_WORKERS"));
    }
}
