use anyhow::{Context, Result};
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::{Arc, Mutex};
use whalewatch_ingestion::{QueueMetrics, QueueMetricsSnapshot};

const METRICS_PREFIX: &str = "whales_watcher";

type ReadCounter = fn(&QueueMetricsSnapshot) -> u64;
type ReadGauge = fn(&QueueMetricsSnapshot) -> usize;

/// Mirrors the pipeline's atomics into a prometheus registry at scrape time.
pub struct PrometheusExporter {
    registry: Registry,
    source: Arc<QueueMetrics>,
    counters: Vec<(IntCounter, ReadCounter)>,
    gauges: Vec<(IntGauge, ReadGauge)>,
    sync_lock: Mutex<()>,
}

impl PrometheusExporter {
    pub fn new(source: Arc<QueueMetrics>) -> Result<Self> {
        let registry = Registry::new_custom(Some(METRICS_PREFIX.to_string()), None)
            .context("failed to create prometheus registry")?;

        let counter_defs: [(&str, &str, ReadCounter); 18] = [
            ("queued_total", "Block notifications admitted", |s| s.queued_total),
            ("processed_total", "Admission tasks executed", |s| s.processed_total),
            ("retried_total", "Admission tasks rescheduled on saturation", |s| s.retried_total),
            ("dropped_total", "Admission tasks dropped", |s| s.dropped_total),
            (
                "backpressured_total",
                "Submits that found the buffer full",
                |s| s.backpressured_total,
            ),
            ("feed_messages_total", "Feed text frames received", |s| s.feed_messages_total),
            (
                "feed_parse_rejected_total",
                "Feed frames that failed to parse",
                |s| s.feed_parse_rejected_total,
            ),
            ("feed_reconnects_total", "Feed reconnect attempts", |s| s.feed_reconnects_total),
            (
                "orphaned_blocks_total",
                "Blocks found off the main chain",
                |s| s.orphaned_blocks_total,
            ),
            (
                "gate_timeouts_total",
                "Blocks that never reached confirmation depth",
                |s| s.gate_timeouts_total,
            ),
            ("candidates_total", "Candidate transactions emitted", |s| s.candidates_total),
            (
                "duplicate_candidates_total",
                "Candidate transactions suppressed as already seen",
                |s| s.duplicate_candidates_total,
            ),
            (
                "resolve_retry_attempts_total",
                "Indexer lookups retried",
                |s| s.resolve_retry_attempts_total,
            ),
            ("tx_resolved_total", "Transactions resolved as final", |s| s.tx_resolved_total),
            ("tx_dropped_total", "Transactions dropped without resolution", |s| s.tx_dropped_total),
            (
                "tx_unexpected_status_total",
                "Indexer answers with an unexpected status",
                |s| s.tx_unexpected_status_total,
            ),
            (
                "transfer_events_total",
                "Transfer events delivered to the notifier",
                |s| s.transfer_events_total,
            ),
            (
                "event_backpressured_total",
                "Event sends that found the notifier channel full",
                |s| s.event_backpressured_total,
            ),
        ];
        let gauge_defs: [(&str, &str, ReadGauge); 8] = [
            ("in_queue", "Tasks waiting in the admission buffer", |s| s.in_queue),
            ("inflight", "Tasks holding a concurrency permit", |s| s.inflight),
            ("scheduled_retries", "Tasks waiting on the retry scheduler", |s| s.scheduled_retries),
            (
                "pending_transactions",
                "Candidate transactions not yet resolved",
                |s| s.pending_transactions,
            ),
            ("queue_capacity", "Admission buffer capacity", |s| s.queue_capacity),
            ("workers", "Admission workers", |s| s.workers),
            ("max_concurrent", "Admission concurrency permits", |s| s.max_concurrent),
            ("resolver_workers", "Resolver workers", |s| s.resolver_workers),
        ];

        let mut counters = Vec::with_capacity(counter_defs.len());
        for (name, help, read) in counter_defs {
            let counter = IntCounter::new(name, help)
                .with_context(|| format!("invalid counter {name}"))?;
            registry
                .register(Box::new(counter.clone()))
                .with_context(|| format!("failed to register counter {name}"))?;
            counters.push((counter, read));
        }
        let mut gauges = Vec::with_capacity(gauge_defs.len());
        for (name, help, read) in gauge_defs {
            let gauge =
                IntGauge::new(name, help).with_context(|| format!("invalid gauge {name}"))?;
            registry
                .register(Box::new(gauge.clone()))
                .with_context(|| format!("failed to register gauge {name}"))?;
            gauges.push((gauge, read));
        }

        Ok(Self {
            registry,
            source,
            counters,
            gauges,
            sync_lock: Mutex::new(()),
        })
    }

    /// Prometheus text exposition of the current pipeline state.
    pub fn render(&self) -> Result<String> {
        self.export(&self.source.snapshot());
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .context("failed to encode metrics")
    }

    fn export(&self, snapshot: &QueueMetricsSnapshot) {
        let _guard = self
            .sync_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (counter, read) in &self.counters {
            let value = read(snapshot);
            let exported = counter.get();
            if value > exported {
                counter.inc_by(value - exported);
            }
        }
        for (gauge, read) in &self.gauges {
            gauge.set(i64::try_from(read(snapshot)).unwrap_or(i64::MAX));
        }
    }
}
