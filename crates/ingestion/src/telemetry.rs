use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared pipeline counters and gauges. Counters only grow; gauges track
/// current depth and are kept non-negative by the saturating helpers.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub(crate) queued_total: AtomicU64,
    pub(crate) processed_total: AtomicU64,
    pub(crate) retried_total: AtomicU64,
    pub(crate) dropped_total: AtomicU64,
    pub(crate) backpressured_total: AtomicU64,
    pub(crate) feed_messages_total: AtomicU64,
    pub(crate) feed_parse_rejected_total: AtomicU64,
    pub(crate) feed_reconnects_total: AtomicU64,
    pub(crate) orphaned_blocks_total: AtomicU64,
    pub(crate) gate_timeouts_total: AtomicU64,
    pub(crate) candidates_total: AtomicU64,
    pub(crate) duplicate_candidates_total: AtomicU64,
    pub(crate) resolve_retry_attempts_total: AtomicU64,
    pub(crate) tx_resolved_total: AtomicU64,
    pub(crate) tx_dropped_total: AtomicU64,
    pub(crate) tx_unexpected_status_total: AtomicU64,
    pub(crate) transfer_events_total: AtomicU64,
    pub(crate) event_backpressured_total: AtomicU64,
    pub(crate) in_queue: AtomicUsize,
    pub(crate) inflight: AtomicUsize,
    pub(crate) scheduled_retries: AtomicUsize,
    pub(crate) pending_transactions: AtomicUsize,
    pub(crate) queue_capacity: AtomicUsize,
    pub(crate) workers: AtomicUsize,
    pub(crate) max_concurrent: AtomicUsize,
    pub(crate) resolver_workers: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueMetricsSnapshot {
    pub ts_utc: DateTime<Utc>,
    pub queued_total: u64,
    pub processed_total: u64,
    pub retried_total: u64,
    pub dropped_total: u64,
    pub backpressured_total: u64,
    pub feed_messages_total: u64,
    pub feed_parse_rejected_total: u64,
    pub feed_reconnects_total: u64,
    pub orphaned_blocks_total: u64,
    pub gate_timeouts_total: u64,
    pub candidates_total: u64,
    pub duplicate_candidates_total: u64,
    pub resolve_retry_attempts_total: u64,
    pub tx_resolved_total: u64,
    pub tx_dropped_total: u64,
    pub tx_unexpected_status_total: u64,
    pub transfer_events_total: u64,
    pub event_backpressured_total: u64,
    pub in_queue: usize,
    pub inflight: usize,
    pub scheduled_retries: usize,
    pub pending_transactions: usize,
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_concurrent: usize,
    pub resolver_workers: usize,
}

impl QueueMetrics {
    pub(crate) fn set_shape(
        &self,
        queue_capacity: usize,
        workers: usize,
        max_concurrent: usize,
        resolver_workers: usize,
    ) {
        self.queue_capacity.store(queue_capacity, Ordering::Relaxed);
        self.workers.store(workers, Ordering::Relaxed);
        self.max_concurrent.store(max_concurrent, Ordering::Relaxed);
        self.resolver_workers
            .store(resolver_workers, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            ts_utc: Utc::now(),
            queued_total: self.queued_total.load(Ordering::Relaxed),
            processed_total: self.processed_total.load(Ordering::Relaxed),
            retried_total: self.retried_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            backpressured_total: self.backpressured_total.load(Ordering::Relaxed),
            feed_messages_total: self.feed_messages_total.load(Ordering::Relaxed),
            feed_parse_rejected_total: self.feed_parse_rejected_total.load(Ordering::Relaxed),
            feed_reconnects_total: self.feed_reconnects_total.load(Ordering::Relaxed),
            orphaned_blocks_total: self.orphaned_blocks_total.load(Ordering::Relaxed),
            gate_timeouts_total: self.gate_timeouts_total.load(Ordering::Relaxed),
            candidates_total: self.candidates_total.load(Ordering::Relaxed),
            duplicate_candidates_total: self.duplicate_candidates_total.load(Ordering::Relaxed),
            resolve_retry_attempts_total: self
                .resolve_retry_attempts_total
                .load(Ordering::Relaxed),
            tx_resolved_total: self.tx_resolved_total.load(Ordering::Relaxed),
            tx_dropped_total: self.tx_dropped_total.load(Ordering::Relaxed),
            tx_unexpected_status_total: self.tx_unexpected_status_total.load(Ordering::Relaxed),
            transfer_events_total: self.transfer_events_total.load(Ordering::Relaxed),
            event_backpressured_total: self.event_backpressured_total.load(Ordering::Relaxed),
            in_queue: self.in_queue.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            scheduled_retries: self.scheduled_retries.load(Ordering::Relaxed),
            pending_transactions: self.pending_transactions.load(Ordering::Relaxed),
            queue_capacity: self.queue_capacity.load(Ordering::Relaxed),
            workers: self.workers.load(Ordering::Relaxed),
            max_concurrent: self.max_concurrent.load(Ordering::Relaxed),
            resolver_workers: self.resolver_workers.load(Ordering::Relaxed),
        }
    }

    pub fn report(&self) {
        let snapshot = self.snapshot();
        info!(
            queued_total = snapshot.queued_total,
            in_queue = snapshot.in_queue,
            queue_capacity = snapshot.queue_capacity,
            processed_total = snapshot.processed_total,
            retried_total = snapshot.retried_total,
            dropped_total = snapshot.dropped_total,
            backpressured_total = snapshot.backpressured_total,
            inflight = snapshot.inflight,
            workers = snapshot.workers,
            max_concurrent = snapshot.max_concurrent,
            scheduled_retries = snapshot.scheduled_retries,
            pending_transactions = snapshot.pending_transactions,
            orphaned_blocks_total = snapshot.orphaned_blocks_total,
            gate_timeouts_total = snapshot.gate_timeouts_total,
            feed_messages_total = snapshot.feed_messages_total,
            feed_parse_rejected_total = snapshot.feed_parse_rejected_total,
            tx_resolved_total = snapshot.tx_resolved_total,
            tx_dropped_total = snapshot.tx_dropped_total,
            transfer_events_total = snapshot.transfer_events_total,
            "pipeline queue metrics"
        );
    }
}

/// Logs a metrics line every `report_seconds` until cancelled.
pub async fn run_metrics_reporter(
    metrics: std::sync::Arc<QueueMetrics>,
    report_seconds: u64,
    cancel: CancellationToken,
) {
    let mut interval = time::interval(Duration::from_secs(report_seconds.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => metrics.report(),
        }
    }
}
