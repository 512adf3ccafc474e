//! Retry with exponential backoff for destination calls.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::RetryConfig;
use super::error::DeliveryError;
use super::traits::DestinationSink;
use super::types::{PortionId, PortionInfo, UploadPayload};

/// Retry executor with exponential backoff.
///
/// Only transient errors are retried. Running out of attempts turns the last
/// transient error into a fatal one.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Calculate delay for a given attempt (0-indexed).
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay().as_millis() as f64
            * self
                .config
                .backoff_multiplier
                .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        let delay_ms = base_delay.min(self.config.max_delay().as_millis() as f64);

        let final_delay = if self.config.jitter {
            // up to 25%
            delay_ms * (1.0 + jitter_fraction() * 0.25)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Execute an operation with retries.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut call: F) -> Result<T, DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DeliveryError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.config.max_retries => {
                    warn!(
                        operation,
                        attempts = attempt + 1,
                        error = %e,
                        "Retries exhausted, escalating to fatal"
                    );
                    return Err(DeliveryError::fatal(format!(
                        "{operation} failed after {} attempts: {e}",
                        attempt + 1
                    )));
                }
                Err(e) => {
                    let delay = self.calculate_delay(attempt);
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Cheap jitter source in `[0, 1)`.
fn jitter_fraction() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos(),
    );
    (hasher.finish() as f64) / (u64::MAX as f64 + 1.0)
}

/// Sink wrapper that retries transient failures.
#[derive(Debug)]
pub struct ResilientSink<S> {
    inner: S,
    retry: RetryExecutor,
}

impl<S> ResilientSink<S> {
    /// Wrap a sink.
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self {
            inner,
            retry: RetryExecutor::new(config),
        }
    }

    /// The wrapped sink.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: DestinationSink> DestinationSink for ResilientSink<S> {
    async fn upload(
        &self,
        portion_id: PortionId,
        payload: UploadPayload,
    ) -> Result<(), DeliveryError> {
        self.retry
            .execute("upload", || self.inner.upload(portion_id, payload.clone()))
            .await
    }

    async fn finalize_portion(&self, portion_id: PortionId) -> Result<(), DeliveryError> {
        self.retry
            .execute("finalize_portion", || self.inner.finalize_portion(portion_id))
            .await
    }

    async fn create_synthetic_finalized_failed_portion(
        &self,
        service_id: &str,
        correlation_id: &str,
        error: &str,
        is_fatal: bool,
    ) -> Result<(), DeliveryError> {
        self.retry
            .execute("create_synthetic_finalized_failed_portion", || {
                self.inner.create_synthetic_finalized_failed_portion(
                    service_id,
                    correlation_id,
                    error,
                    is_fatal,
                )
            })
            .await
    }

    async fn create_synthetic_finalized_successful_portion(
        &self,
        service_id: &str,
        correlation_id: &str,
    ) -> Result<(), DeliveryError> {
        self.retry
            .execute("create_synthetic_finalized_successful_portion", || {
                self.inner
                    .create_synthetic_finalized_successful_portion(service_id, correlation_id)
            })
            .await
    }

    async fn get_portion_info(&self, correlation_id: &str) -> Result<PortionInfo, DeliveryError> {
        self.retry
            .execute("get_portion_info", || self.inner.get_portion_info(correlation_id))
            .await
    }

    fn tracks_portions(&self) -> bool {
        self.inner.tracks_portions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = executor
            .execute("upload", || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DeliveryError::transient("503"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_fatal() {
        let executor = RetryExecutor::new(fast_config(2));
        let calls = Arc::new(AtomicUsize::new(0));

        let err = executor
            .execute("upload", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DeliveryError::transient("timeout"))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Fatal { .. }));
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejections_are_not_retried() {
        let executor = RetryExecutor::new(fast_config(5));
        let calls = Arc::new(AtomicUsize::new(0));

        let err = executor
            .execute("upload", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DeliveryError::rejected("bad field"))
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_per_record());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let executor = RetryExecutor::new(RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        });
        assert_eq!(executor.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(executor.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(executor.calculate_delay(20), Duration::from_secs(10));
    }
}
