use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use whalewatch_config::{AdmissionConfig, ResolverConfig};
use whalewatch_core_types::{CandidateTx, EventEnvelope, ResolvedTransaction, TransferEvent};

use crate::classifier::TransferClassifier;
use crate::clients::{IndexerLookup, TransactionIndexer};
use crate::core::{decrement_atomic_usize, send_with_backoff, sleep_or_cancel, PollBudget};
use crate::error::{BudgetLimit, DeliveryError, RemoteError, ResolveError};
use crate::queue::OverflowQueue;
use crate::registry::AssetRegistry;
use crate::telemetry::QueueMetrics;

pub const RESOLVER_COMPONENT: &str = "resolver";

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub workers: usize,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub max_wait: Duration,
    pub send_backoff_initial_ms: u64,
    pub send_backoff_max_ms: u64,
}

impl ResolverSettings {
    pub fn from_config(config: &ResolverConfig, admission: &AdmissionConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_attempts.max(1),
            max_wait: Duration::from_secs(config.max_wait_seconds.max(1)),
            send_backoff_initial_ms: admission.submit_backoff_initial_ms.max(1),
            send_backoff_max_ms: admission
                .submit_backoff_max_ms
                .max(admission.submit_backoff_initial_ms.max(1)),
        }
    }
}

/// Fixed pool of workers that poll the indexer for each candidate until it is
/// finalized, classify it, and forward the resulting events.
pub struct ResolverPool {
    indexer: Arc<dyn TransactionIndexer>,
    classifier: Arc<TransferClassifier>,
    registry: Arc<AssetRegistry>,
    candidates: Arc<OverflowQueue<CandidateTx>>,
    events_tx: mpsc::Sender<EventEnvelope<TransferEvent>>,
    settings: ResolverSettings,
    metrics: Arc<QueueMetrics>,
    cancel: CancellationToken,
}

impl ResolverPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        indexer: Arc<dyn TransactionIndexer>,
        classifier: Arc<TransferClassifier>,
        registry: Arc<AssetRegistry>,
        candidates: Arc<OverflowQueue<CandidateTx>>,
        events_tx: mpsc::Sender<EventEnvelope<TransferEvent>>,
        settings: ResolverSettings,
        metrics: Arc<QueueMetrics>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            indexer,
            classifier,
            registry,
            candidates,
            events_tx,
            settings,
            metrics,
            cancel,
        })
    }

    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let handles = (0..self.settings.workers)
            .map(|worker_id| {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.worker_loop(worker_id).await })
            })
            .collect();
        info!(workers = self.settings.workers, "resolver workers started");
        handles
    }

    async fn worker_loop(&self, worker_id: usize) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                candidate = self.candidates.pop() => candidate,
            };
            let Some(candidate) = next else {
                debug!(worker_id, "resolver worker exiting");
                return;
            };

            let keep_running = self.process_candidate(worker_id, &candidate).await;
            decrement_atomic_usize(&self.metrics.pending_transactions);
            if !keep_running {
                return;
            }
        }
    }

    /// Returns false when the worker should stop.
    async fn process_candidate(&self, worker_id: usize, candidate: &CandidateTx) -> bool {
        let resolved = match self.resolve(candidate).await {
            Ok(resolved) => resolved,
            Err(ResolveError::Cancelled) => {
                debug!(worker_id, tx_id = %candidate.tx_id, "transaction lookup cancelled");
                return false;
            }
            Err(error) => {
                QueueMetrics::bump(&self.metrics.tx_dropped_total);
                warn!(
                    worker_id,
                    tx_id = %candidate.tx_id,
                    shard = %candidate.shard,
                    block_height = candidate.block_height,
                    error = %error,
                    "transaction dropped"
                );
                return true;
            }
        };
        QueueMetrics::bump(&self.metrics.tx_resolved_total);

        let snapshot = self.registry.snapshot();
        let events = self.classifier.classify(&resolved, candidate.shard, &snapshot);
        let correlation_id = Uuid::new_v4();
        for event in events {
            debug!(
                worker_id,
                tx_id = %event.tx_id,
                from = %event.from,
                to = %event.to,
                amount = event.amount,
                symbol = event.asset.symbol(),
                kind = event.kind.as_str(),
                "transfer event"
            );
            let envelope =
                EventEnvelope::new(RESOLVER_COMPONENT, event).with_correlation(correlation_id);
            match send_with_backoff(
                &self.events_tx,
                envelope,
                self.settings.send_backoff_initial_ms,
                self.settings.send_backoff_max_ms,
                &self.metrics.event_backpressured_total,
                &self.cancel,
            )
            .await
            {
                Ok(()) => QueueMetrics::bump(&self.metrics.transfer_events_total),
                Err(DeliveryError::Cancelled) => return false,
                Err(DeliveryError::Closed) => {
                    warn!(worker_id, "event channel closed; stopping resolver worker");
                    return false;
                }
            }
        }
        true
    }

    /// Polls the indexer until the transaction is finalized, the budget runs
    /// out, or the indexer answers with something that will not change.
    pub async fn resolve(
        &self,
        candidate: &CandidateTx,
    ) -> Result<ResolvedTransaction, ResolveError> {
        let mut budget = PollBudget::new(self.settings.max_attempts, self.settings.max_wait);
        loop {
            if let Err(exhausted) = budget.consume() {
                return Err(match exhausted.limit {
                    BudgetLimit::Attempts => ResolveError::Exhausted {
                        attempts: exhausted.attempts,
                    },
                    BudgetLimit::Deadline => ResolveError::DeadlineExceeded {
                        attempts: exhausted.attempts,
                        waited: exhausted.waited,
                    },
                });
            }

            match self.indexer.lookup_transaction(&candidate.tx_id).await {
                Ok(IndexerLookup::Found(tx)) if tx.finalized => return Ok(tx),
                Ok(IndexerLookup::Found(tx)) => {
                    debug!(
                        tx_id = %candidate.tx_id,
                        tx_type = %tx.tx_type,
                        "transaction not final yet"
                    );
                }
                Ok(IndexerLookup::NotIndexed) => {
                    debug!(
                        tx_id = %candidate.tx_id,
                        attempts = budget.attempts(),
                        "transaction not indexed yet"
                    );
                }
                Err(error) if error.is_retryable() => {
                    debug!(tx_id = %candidate.tx_id, error = %error, "indexer lookup failed");
                }
                Err(RemoteError::UnexpectedStatus { status, endpoint, body }) => {
                    QueueMetrics::bump(&self.metrics.tx_unexpected_status_total);
                    warn!(
                        tx_id = %candidate.tx_id,
                        status,
                        endpoint = %endpoint,
                        body = %body,
                        "indexer returned unexpected status"
                    );
                    return Err(ResolveError::UnexpectedStatus { status });
                }
                Err(error) => return Err(ResolveError::Malformed(error)),
            }

            QueueMetrics::bump(&self.metrics.resolve_retry_attempts_total);
            if !sleep_or_cancel(self.settings.poll_interval, &self.cancel).await {
                return Err(ResolveError::Cancelled);
            }
        }
    }
}
