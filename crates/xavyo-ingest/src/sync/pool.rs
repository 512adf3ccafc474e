//! Bounded-concurrency delivery.
//!
//! Each upload runs as a tokio task holding a semaphore permit, so at most
//! `workers` uploads are in flight. With `workers = 0` uploads run inline on
//! the caller. [`DeliveryPool::join`] waits for in-flight tasks up to a
//! timeout and abandons whatever is still running.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use super::error::{DeliveryError, SyncError, SyncResult};
use super::traits::DestinationSink;
use super::types::{PortionId, UploadPayload};

/// Outcome of one upload call.
#[derive(Debug)]
struct DeliveryReport {
    kind: &'static str,
    records: usize,
    failure_report: bool,
    result: Result<(), DeliveryError>,
}

/// Counters accumulated from finished uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Converted records accepted by the destination.
    pub delivered: usize,
    /// Upload calls that succeeded, failure reports included.
    pub delivery_calls: usize,
    /// Failed-record reports accepted by the destination.
    pub failures_reported: usize,
    /// Records the destination rejected individually.
    pub rejected: usize,
    /// Uploads still in flight when the join timed out.
    pub abandoned: usize,
}

impl DeliveryStats {
    /// Whether any upload reached, or may still reach, the destination.
    #[must_use]
    pub fn touched_portion(&self) -> bool {
        self.delivery_calls > 0 || self.rejected > 0 || self.abandoned > 0
    }
}

/// Delivery worker pool for one portion.
pub struct DeliveryPool {
    sink: Arc<dyn DestinationSink>,
    portion_id: PortionId,
    workers: usize,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<DeliveryReport>,
    stats: DeliveryStats,
    fatal: Option<DeliveryError>,
}

impl DeliveryPool {
    /// Create a pool. `workers = 0` delivers synchronously.
    pub fn new(sink: Arc<dyn DestinationSink>, portion_id: PortionId, workers: usize) -> Self {
        Self {
            sink,
            portion_id,
            workers,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            tasks: JoinSet::new(),
            stats: DeliveryStats::default(),
            fatal: None,
        }
    }

    /// Hand a payload to the destination.
    ///
    /// Waits for a free worker slot when all are busy. Finished tasks are
    /// reaped on every call so fatal errors surface promptly.
    pub async fn dispatch(&mut self, payload: UploadPayload) -> SyncResult<()> {
        let kind = payload.kind();
        let records = payload.record_count();
        let failure_report = payload.is_failure();

        if self.workers == 0 {
            let result = self.sink.upload(self.portion_id, payload).await;
            self.record(DeliveryReport {
                kind,
                records,
                failure_report,
                result,
            });
            return Ok(());
        }

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| SyncError::internal(format!("delivery pool closed: {e}")))?;

        let sink = Arc::clone(&self.sink);
        let portion_id = self.portion_id;
        self.tasks.spawn(async move {
            let _permit = permit; // Hold permit until task completes
            let result = sink.upload(portion_id, payload).await;
            DeliveryReport {
                kind,
                records,
                failure_report,
                result,
            }
        });
        debug!(portion_id = %self.portion_id, kind, records, "Dispatched delivery");

        self.reap();
        Ok(())
    }

    /// Collect tasks that already finished.
    pub fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record_joined(joined);
        }
    }

    /// Wait for in-flight uploads. Returns the number of tasks abandoned
    /// because the timeout elapsed.
    pub async fn join(&mut self, timeout: Duration) -> usize {
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = self.tasks.join_next().await {
                self.record_joined(joined);
            }
        })
        .await;

        if drained.is_ok() {
            return 0;
        }

        let abandoned = self.tasks.len();
        warn!(
            portion_id = %self.portion_id,
            abandoned,
            timeout_secs = timeout.as_secs(),
            "Delivery join timed out, abandoning in-flight uploads"
        );
        self.tasks.detach_all();
        self.stats.abandoned += abandoned;
        abandoned
    }

    fn record_joined(&mut self, joined: Result<DeliveryReport, JoinError>) {
        match joined {
            Ok(report) => self.record(report),
            Err(e) => {
                error!(portion_id = %self.portion_id, error = %e, "Delivery task panicked");
                if self.fatal.is_none() {
                    self.fatal = Some(DeliveryError::fatal(format!("delivery task failed: {e}")));
                }
            }
        }
    }

    fn record(&mut self, report: DeliveryReport) {
        match report.result {
            Ok(()) => {
                self.stats.delivery_calls += 1;
                if report.failure_report {
                    self.stats.failures_reported += report.records;
                } else {
                    self.stats.delivered += report.records;
                }
            }
            Err(e) if e.is_per_record() => {
                warn!(
                    portion_id = %self.portion_id,
                    kind = report.kind,
                    records = report.records,
                    error = %e,
                    "Destination rejected payload"
                );
                self.stats.rejected += report.records;
            }
            Err(e) => {
                error!(
                    portion_id = %self.portion_id,
                    kind = report.kind,
                    records = report.records,
                    error = %e,
                    "Fatal delivery error"
                );
                if self.fatal.is_none() {
                    self.fatal = Some(e);
                }
            }
        }
    }

    /// First fatal error seen, if any.
    #[must_use]
    pub fn fatal_error(&self) -> Option<&DeliveryError> {
        self.fatal.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    /// Tasks spawned and not yet collected.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

impl std::fmt::Debug for DeliveryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPool")
            .field("portion_id", &self.portion_id)
            .field("workers", &self.workers)
            .field("in_flight", &self.tasks.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::PortionInfo;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        uploads: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        reject_failed: bool,
        delay_ms: u64,
    }

    #[async_trait]
    impl DestinationSink for CountingSink {
        async fn upload(
            &self,
            _portion_id: PortionId,
            payload: UploadPayload,
        ) -> Result<(), DeliveryError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.reject_failed && payload.is_failure() {
                return Err(DeliveryError::rejected("bad record"));
            }
            Ok(())
        }

        async fn finalize_portion(&self, _portion_id: PortionId) -> Result<(), DeliveryError> {
            Ok(())
        }

        async fn create_synthetic_finalized_failed_portion(
            &self,
            _service_id: &str,
            _correlation_id: &str,
            _error: &str,
            _is_fatal: bool,
        ) -> Result<(), DeliveryError> {
            Ok(())
        }

        async fn create_synthetic_finalized_successful_portion(
            &self,
            _service_id: &str,
            _correlation_id: &str,
        ) -> Result<(), DeliveryError> {
            Ok(())
        }

        async fn get_portion_info(
            &self,
            _correlation_id: &str,
        ) -> Result<PortionInfo, DeliveryError> {
            Ok(PortionInfo::default())
        }
    }

    fn batch(n: usize) -> UploadPayload {
        UploadPayload::Batch(
            (0..n)
                .map(|i| {
                    let mut record = Map::new();
                    record.insert("ID".to_string(), json!(i));
                    record
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let sink = Arc::new(CountingSink {
            delay_ms: 20,
            ..CountingSink::default()
        });
        let mut pool = DeliveryPool::new(sink.clone(), PortionId::new(), 2);

        for _ in 0..6 {
            pool.dispatch(batch(10)).await.unwrap();
        }
        assert_eq!(pool.join(Duration::from_secs(5)).await, 0);

        assert_eq!(sink.uploads.load(Ordering::SeqCst), 6);
        assert!(sink.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.stats().delivered, 60);
        assert_eq!(pool.stats().delivery_calls, 6);
    }

    #[tokio::test]
    async fn test_inline_delivery_with_zero_workers() {
        let sink = Arc::new(CountingSink::default());
        let mut pool = DeliveryPool::new(sink.clone(), PortionId::new(), 0);

        pool.dispatch(batch(3)).await.unwrap();
        assert_eq!(sink.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.stats().delivered, 3);
    }

    #[tokio::test]
    async fn test_rejections_are_counted_not_fatal() {
        let sink = Arc::new(CountingSink {
            reject_failed: true,
            ..CountingSink::default()
        });
        let mut pool = DeliveryPool::new(sink, PortionId::new(), 0);

        pool.dispatch(UploadPayload::Failed {
            record: json!({"id": 9}),
            error: "conversion failed".into(),
        })
        .await
        .unwrap();

        assert_eq!(pool.stats().rejected, 1);
        assert!(pool.fatal_error().is_none());
    }

    #[tokio::test]
    async fn test_join_timeout_abandons_stragglers() {
        let sink = Arc::new(CountingSink {
            delay_ms: 5_000,
            ..CountingSink::default()
        });
        let mut pool = DeliveryPool::new(sink, PortionId::new(), 2);

        pool.dispatch(batch(1)).await.unwrap();
        pool.dispatch(batch(1)).await.unwrap();

        let abandoned = pool.join(Duration::from_millis(50)).await;
        assert_eq!(abandoned, 2);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.stats().delivered, 0);
        assert_eq!(pool.stats().abandoned, 2);
        assert!(pool.stats().touched_portion());
    }
}
