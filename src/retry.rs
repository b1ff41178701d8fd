//! Backoff table and the background retry loop.
//!
//! Each failed record moves through three states:
//! pending-retry (`next_retry_at` set), exhausted (ceiling reached,
//! `next_retry_at` cleared) and resolved (`success`).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::types::DeliveryRecord;
use crate::worker::{metric_inc, AttemptResult, WorkerContext};

/// Minutes to wait before retry attempt `i`. The last entry repeats.
const BACKOFF_MINUTES: [i64; 5] = [1, 5, 15, 30, 60];

/// Wait before the retry with index `retry_index` (0-based).
pub fn backoff(retry_index: u32) -> Duration {
    let idx = (retry_index as usize).min(BACKOFF_MINUTES.len() - 1);
    Duration::minutes(BACKOFF_MINUTES[idx])
}

/// When the next attempt is due, or `None` once the ceiling is reached.
pub fn next_retry_at(
    retry_count: u32,
    max_retries: u32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    (retry_count < max_retries).then(|| now + backoff(retry_count))
}

/// Fold a retry attempt's result into its record.
pub fn apply_retry_result(
    record: &mut DeliveryRecord,
    result: AttemptResult,
    max_retries: u32,
    now: DateTime<Utc>,
) {
    record.retry_count += 1;
    record.success = result.success;
    record.response_status = result.status;
    record.response_body = result.body;
    record.error_message = result.error;
    record.next_retry_at = if result.success {
        None
    } else {
        next_retry_at(record.retry_count, max_retries, now)
    };
    record.updated_at = now;
}

/// What happened to one due record during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Resolved,
    Rescheduled,
    Exhausted,
    Skipped,
}

/// Counts for one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub resolved: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    pub skipped: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: RetryOutcome) {
        match outcome {
            RetryOutcome::Resolved => self.resolved += 1,
            RetryOutcome::Rescheduled => self.rescheduled += 1,
            RetryOutcome::Exhausted => self.exhausted += 1,
            RetryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Retry every record due at `now`, concurrently, and wait for all of them.
///
/// Passes are serialized and each joins its whole batch before returning,
/// so a record can never be picked up again while an attempt is running.
pub async fn retry_due(ctx: &Arc<WorkerContext>, now: DateTime<Utc>) -> TickSummary {
    // Concurrent passes queue here; the later one scans after the earlier
    // one has written its results back.
    let _pass = ctx.retry_pass.lock().await;
    let mut summary = TickSummary::default();

    let due = match ctx.storage.due_retries(now, ctx.config.max_retries).await {
        Ok(due) => due,
        Err(err) => {
            error!(error = %err, "failed to fetch deliveries due for retry");
            return summary;
        }
    };

    summary.due = due.len();
    if due.is_empty() {
        return summary;
    }
    debug!(count = due.len(), "retrying failed deliveries");

    let mut batch = JoinSet::new();
    for record in due {
        let ctx = ctx.clone();
        batch.spawn(async move { retry_one(&ctx, record, now).await });
    }

    while let Some(joined) = batch.join_next().await {
        match joined {
            Ok(outcome) => summary.record(outcome),
            Err(err) => error!(error = %err, "retry task did not complete"),
        }
    }

    summary
}

async fn retry_one(ctx: &WorkerContext, mut record: DeliveryRecord, now: DateTime<Utc>) -> RetryOutcome {
    let max_retries = ctx.config.max_retries;
    if record.success || record.retry_count >= max_retries {
        return RetryOutcome::Skipped;
    }

    let destination = match ctx.storage.get_destination(record.destination_id).await {
        Ok(Some(destination)) if destination.active => destination,
        Ok(_) => return RetryOutcome::Skipped,
        Err(err) => {
            error!(delivery_id = %record.id, error = %err, "failed to load webhook for retry");
            return RetryOutcome::Skipped;
        }
    };

    metric_inc("webhook.retry.attempted");

    // Original bytes, current secret.
    let result = ctx
        .attempt(&destination.url, &record.payload, destination.signing_secret())
        .await;

    let finished = now.max(Utc::now());
    apply_retry_result(&mut record, result, max_retries, finished);

    if let Err(err) = ctx.storage.update_delivery(&record).await {
        error!(delivery_id = %record.id, error = %err, "failed to update delivery record");
    }

    if record.success {
        info!(delivery_id = %record.id, destination_id = %destination.id, retry = record.retry_count, "retry delivered");
        RetryOutcome::Resolved
    } else if record.next_retry_at.is_some() {
        debug!(
            delivery_id = %record.id,
            retry = record.retry_count,
            status = record.response_status,
            "retry failed, rescheduled"
        );
        RetryOutcome::Rescheduled
    } else {
        metric_inc("webhook.retry.exhausted");
        warn!(delivery_id = %record.id, destination_id = %destination.id, "delivery exhausted its retries");
        RetryOutcome::Exhausted
    }
}

/// Periodic driver for [`retry_due`] with an explicit start/stop lifecycle.
pub struct RetryScheduler {
    ctx: Arc<WorkerContext>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self {
            ctx,
            stop_tx: None,
            handle: None,
        }
    }

    /// Spawn the ticking loop. Calling this while running does nothing.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let ctx = self.ctx.clone();
        let period = ctx.config.retry_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; the first scan waits a full period.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let summary = retry_due(&ctx, Utc::now()).await;
                        if summary.due > 0 {
                            info!(?summary, "retry tick finished");
                        }
                    }
                }
            }
            debug!("retry scheduler stopped");
        });

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        info!(interval_secs = period.as_secs(), "retry scheduler started");
    }

    /// Stop ticking and wait for the in-flight batch to finish.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}
