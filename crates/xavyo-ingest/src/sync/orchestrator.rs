//! The sync run loop.
//!
//! ```text
//! Producer -> filter -> convert -> batch -> DeliveryPool -> finalize
//! ```
//!
//! A run authenticates the producer, streams records through
//! [`SyncEngine::prepare`], hands converted records to the delivery pool
//! (one per call in singular mode, in batches in bulk mode), then drains the
//! pool and closes the portion exactly once.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::batch::Batcher;
use super::config::DeliveryMode;
use super::engine::{RecordOutcome, SyncEngine};
use super::error::{ProducerError, SyncError, SyncResult};
use super::pool::{DeliveryPool, DeliveryStats};
use super::traits::{DestinationSink, RecordProducer};
use super::types::{
    FinalizeOutcome, LoadOptions, PortionId, ProducedRecord, RunContext, RunState, RunSummary,
    UploadPayload,
};

/// Why streaming stopped early.
enum StopReason {
    Exhausted,
    LimitReached,
    Failed(SyncError),
}

/// Per-run bookkeeping.
struct Run<'a> {
    ctx: &'a RunContext,
    sink: Arc<dyn DestinationSink>,
    state: RunState,
    summary: RunSummary,
    pool: Option<DeliveryPool>,
    batcher: Batcher,
    since_cancel_check: usize,
}

impl Run<'_> {
    fn transition(&mut self, next: RunState) -> SyncResult<()> {
        self.state.transition(next)?;
        self.summary.state = next;
        debug!(state = %next, "Run state changed");
        Ok(())
    }

    fn stats(&self) -> DeliveryStats {
        self.pool.as_ref().map(DeliveryPool::stats).unwrap_or_default()
    }

    /// Send a payload, or skip it in dry-run mode.
    async fn dispatch(&mut self, payload: UploadPayload) -> SyncResult<()> {
        match &mut self.pool {
            Some(pool) => pool.dispatch(payload).await,
            None => {
                debug!(
                    kind = payload.kind(),
                    records = payload.record_count(),
                    "Dry run, upload skipped"
                );
                Ok(())
            }
        }
    }

    /// Fatal error raised by an earlier delivery, if any.
    fn delivery_failure(&self) -> Option<SyncError> {
        self.pool
            .as_ref()
            .and_then(DeliveryPool::fatal_error)
            .map(|e| SyncError::from(e.clone()))
    }

    /// Poll the destination for cancellation every `every` fetched records.
    async fn cancellation_requested(&mut self, every: usize) -> bool {
        if self.pool.is_none() {
            return false;
        }
        self.since_cancel_check += 1;
        if self.since_cancel_check < every {
            return false;
        }
        self.since_cancel_check = 0;

        match self.sink.get_portion_info(&self.ctx.correlation_id).await {
            Ok(info) => info.canceled,
            Err(e) => {
                warn!(error = %e, "Cancellation check failed, continuing");
                false
            }
        }
    }

    fn log_summary(&mut self) {
        self.summary.finished_at = Some(Utc::now());
        let s = &self.summary;
        info!(
            portion_id = %s.portion_id,
            correlation_id = %s.correlation_id,
            state = %s.state,
            finalize = ?s.finalize,
            fetched = s.fetched,
            filtered_out = s.filtered_out,
            processed = s.processed,
            converted = s.converted,
            dropped = s.dropped,
            errored = s.errored,
            delivered = s.delivered,
            delivery_calls = s.delivery_calls,
            rejected = s.rejected,
            abandoned_tasks = s.abandoned_tasks,
            dry_run = s.dry_run,
            duration_ms = s.duration_ms().unwrap_or_default(),
            "Sync run finished"
        );
    }
}

impl SyncEngine {
    /// Run one sync: authenticate, stream, deliver and finalize.
    ///
    /// Returns the run summary, or the error that ended the run. Every run
    /// logs exactly one summary line and, unless it stopped before
    /// streaming or runs dry, closes the portion exactly once.
    #[instrument(
        skip(self, producer, sink, ctx),
        fields(service_id = %ctx.service_id, correlation_id = %ctx.correlation_id)
    )]
    pub async fn run(
        &mut self,
        producer: &mut dyn RecordProducer,
        sink: Arc<dyn DestinationSink>,
        ctx: &RunContext,
    ) -> SyncResult<RunSummary> {
        let portion_id = PortionId::new();
        let dry_run = self.config.dry_run;

        let mut run = Run {
            ctx,
            pool: (!dry_run)
                .then(|| DeliveryPool::new(Arc::clone(&sink), portion_id, self.config.workers)),
            sink,
            state: RunState::Idle,
            summary: RunSummary::new(portion_id, ctx.correlation_id.clone()),
            batcher: Batcher::new(self.config.effective_send_size()),
            since_cancel_check: 0,
        };
        run.summary.dry_run = dry_run;

        info!(
            portion_id = %portion_id,
            delivery_mode = %self.config.delivery_mode,
            workers = self.config.workers,
            dry_run,
            "Starting sync run"
        );

        run.transition(RunState::Authorizing)?;
        let options = LoadOptions {
            limit: self.config.record_count,
            correlation_id: ctx.correlation_id.clone(),
        };
        let stop = match Self::authorize(producer, &options).await.map_err(SyncError::from) {
            Ok(()) => None,
            Err(e) if e.is_pre_portion() => {
                error!(error = %e, "Producer authorization failed");
                run.transition(RunState::Finalized)?;
                run.log_summary();
                return Err(e);
            }
            Err(e) => {
                error!(error = %e, "Producer failed to load records");
                Some(StopReason::Failed(e))
            }
        };

        run.transition(RunState::Streaming)?;
        let stop = match stop {
            Some(stop) => stop,
            None => self.stream(&mut run, producer).await,
        };

        run.transition(RunState::Draining)?;
        let failure = match stop {
            StopReason::Failed(e) => Some(e),
            StopReason::Exhausted | StopReason::LimitReached => {
                match run.batcher.finish() {
                    Some((batch, reason)) => {
                        debug!(records = batch.len(), ?reason, "Flushing final batch");
                        run.dispatch(UploadPayload::Batch(batch)).await.err()
                    }
                    None => None,
                }
            }
        };

        if let Some(pool) = &mut run.pool {
            run.summary.abandoned_tasks = pool.join(self.config.join_timeout()).await;
        }
        let failure = failure.or_else(|| run.delivery_failure());

        let stats = run.stats();
        run.summary.delivered = stats.delivered;
        run.summary.delivery_calls = stats.delivery_calls;
        run.summary.rejected = stats.rejected;

        match failure {
            Some(err) => {
                Self::finalize_failed(&mut run, &err, &stats).await;
                run.transition(RunState::Aborted)?;
                run.log_summary();
                Err(err)
            }
            None => match Self::finalize(&mut run, portion_id, &stats).await {
                Ok(()) => {
                    run.transition(RunState::Finalized)?;
                    run.log_summary();
                    Ok(run.summary)
                }
                Err(err) => {
                    run.transition(RunState::Aborted)?;
                    run.log_summary();
                    Err(err)
                }
            },
        }
    }

    async fn authorize(
        producer: &mut dyn RecordProducer,
        options: &LoadOptions,
    ) -> Result<(), ProducerError> {
        producer.authenticate().await?;
        producer.load_records(options).await
    }

    /// Pull records until the producer is exhausted, the limit is reached or
    /// something stops the run.
    async fn stream(&mut self, run: &mut Run<'_>, producer: &mut dyn RecordProducer) -> StopReason {
        loop {
            if let Some(limit) = self.config.record_count {
                if run.summary.processed >= limit {
                    info!(limit, "Record limit reached");
                    return StopReason::LimitReached;
                }
            }

            let item = match producer.next_record().await {
                Ok(Some(item)) => item,
                Ok(None) => return StopReason::Exhausted,
                Err(e) => {
                    error!(error = %e, "Producer failed while listing records");
                    return StopReason::Failed(e.into());
                }
            };
            run.summary.fetched += 1;

            let payload = match item {
                ProducedRecord::Failed { record, error } => {
                    run.summary.processed += 1;
                    run.summary.errored += 1;
                    warn!(error = %error, "Producer reported a failed record");
                    Some(UploadPayload::Failed { record, error })
                }
                ProducedRecord::Record(raw) => match self.prepare(&raw) {
                    RecordOutcome::FilteredOut => {
                        run.summary.filtered_out += 1;
                        debug!("Record filtered out");
                        None
                    }
                    RecordOutcome::Dropped { .. } => {
                        run.summary.processed += 1;
                        run.summary.dropped += 1;
                        None
                    }
                    RecordOutcome::Errored { error } => {
                        run.summary.processed += 1;
                        run.summary.errored += 1;
                        warn!(error = %error, "Record failed, reporting to destination");
                        Some(UploadPayload::Failed { record: raw, error })
                    }
                    RecordOutcome::Converted(record) => {
                        run.summary.processed += 1;
                        run.summary.converted += 1;
                        match self.config.delivery_mode {
                            DeliveryMode::Singular => Some(UploadPayload::Record(record)),
                            DeliveryMode::Bulk => run
                                .batcher
                                .push(record)
                                .map(|(batch, _)| UploadPayload::Batch(batch)),
                        }
                    }
                },
            };

            if let Some(payload) = payload {
                if let Err(e) = run.dispatch(payload).await {
                    return StopReason::Failed(e);
                }
            }
            if let Some(e) = run.delivery_failure() {
                return StopReason::Failed(e);
            }
            if run.cancellation_requested(self.config.cancel_check_every).await {
                info!("Destination requested cancellation, stopping");
                return StopReason::Failed(SyncError::cancelled(run.ctx.correlation_id.clone()));
            }
        }
    }

    /// Close a run that completed.
    async fn finalize(
        run: &mut Run<'_>,
        portion_id: PortionId,
        stats: &DeliveryStats,
    ) -> SyncResult<()> {
        if run.pool.is_none() {
            info!("Dry run, portion not finalized");
            return Ok(());
        }
        if !run.sink.tracks_portions() {
            run.summary.finalize = FinalizeOutcome::Skipped;
            info!("Destination does not track portions, finalize skipped");
            return Ok(());
        }

        if stats.touched_portion() {
            run.summary.finalize = FinalizeOutcome::Finalized;
            run.sink.finalize_portion(portion_id).await.map_err(|e| {
                error!(error = %e, "Failed to finalize portion");
                SyncError::from(e)
            })
        } else {
            run.summary.finalize = FinalizeOutcome::Empty;
            run.sink
                .create_synthetic_finalized_successful_portion(
                    &run.ctx.service_id,
                    &run.ctx.correlation_id,
                )
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to create empty portion");
                    SyncError::from(e)
                })
        }
    }

    /// Close a run that failed. Errors here are logged; the original error
    /// is what the caller sees.
    async fn finalize_failed(run: &mut Run<'_>, err: &SyncError, stats: &DeliveryStats) {
        if run.pool.is_none() {
            return;
        }
        if !run.sink.tracks_portions() {
            run.summary.finalize = FinalizeOutcome::Skipped;
            info!("Destination does not track portions, failed finalize skipped");
            return;
        }

        let is_fatal = stats.delivery_calls == 0;
        run.summary.finalize = FinalizeOutcome::Failed;
        if let Err(e) = run
            .sink
            .create_synthetic_finalized_failed_portion(
                &run.ctx.service_id,
                &run.ctx.correlation_id,
                &err.to_string(),
                is_fatal,
            )
            .await
        {
            error!(error = %e, "Failed to record failed portion");
        }
    }
}
