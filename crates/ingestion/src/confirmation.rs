use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whalewatch_config::ConfirmationConfig;
use whalewatch_core_types::{BlockNotification, CandidateTx};

use crate::admission::{Task, TaskHandler, TaskOutcome};
use crate::clients::ChainClient;
use crate::core::{
    increment_atomic_usize, sleep_or_cancel, BudgetExhausted, PollBudget, SeenTxCache,
};
use crate::error::GateError;
use crate::queue::OverflowQueue;
use crate::telemetry::QueueMetrics;

#[derive(Debug, Clone)]
pub struct ConfirmationSettings {
    pub depth: u64,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub max_wait: Duration,
    pub seen_tx_ttl: Duration,
    pub seen_tx_limit: usize,
}

impl ConfirmationSettings {
    pub fn from_config(config: &ConfirmationConfig) -> Self {
        Self {
            depth: config.depth.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_attempts.max(1),
            max_wait: Duration::from_secs(config.max_wait_seconds.max(1)),
            seen_tx_ttl: Duration::from_secs(config.seen_tx_ttl_seconds),
            seen_tx_limit: config.seen_tx_limit.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Accepted { candidates: usize, duplicates: usize },
    Orphaned,
}

/// Holds a block back until it is `depth` blocks deep and on the main chain,
/// then hands its non-coinbase transactions to the resolver queue.
pub struct ConfirmationGate {
    chain: Arc<dyn ChainClient>,
    settings: ConfirmationSettings,
    candidates: Arc<OverflowQueue<CandidateTx>>,
    seen: Mutex<SeenTxCache>,
    metrics: Arc<QueueMetrics>,
    cancel: CancellationToken,
}

impl ConfirmationGate {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        settings: ConfirmationSettings,
        candidates: Arc<OverflowQueue<CandidateTx>>,
        metrics: Arc<QueueMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let seen = SeenTxCache::new(settings.seen_tx_limit, settings.seen_tx_ttl);
        Self {
            chain,
            settings,
            candidates,
            seen: Mutex::new(seen),
            metrics,
            cancel,
        }
    }

    pub async fn process(
        &self,
        notification: &BlockNotification,
    ) -> Result<GateOutcome, GateError> {
        let mut budget = PollBudget::new(self.settings.max_attempts, self.settings.max_wait);
        let current_height = self.wait_for_depth(notification, &mut budget).await?;

        if !self.check_main_chain(notification, &mut budget).await? {
            QueueMetrics::bump(&self.metrics.orphaned_blocks_total);
            info!(
                block_hash = %notification.hash,
                shard = %notification.shard,
                height = notification.height,
                current_height,
                "orphaned block; candidates discarded"
            );
            return Ok(GateOutcome::Orphaned);
        }

        let mut emitted = 0;
        let mut duplicates = 0;
        for candidate in extract_candidates(notification) {
            if !self.mark_fresh(&candidate.tx_id) {
                duplicates += 1;
                QueueMetrics::bump(&self.metrics.duplicate_candidates_total);
                debug!(tx_id = %candidate.tx_id, "candidate already emitted; skipping");
                continue;
            }
            let tx_id = candidate.tx_id.clone();
            let pushed = tokio::select! {
                _ = self.cancel.cancelled() => return Err(GateError::Cancelled),
                pushed = self.candidates.push(candidate) => pushed,
            };
            if pushed.is_err() {
                warn!(tx_id = %tx_id, "candidate queue closed");
                return Err(GateError::CandidateQueueClosed);
            }
            emitted += 1;
            QueueMetrics::bump(&self.metrics.candidates_total);
            increment_atomic_usize(&self.metrics.pending_transactions);
        }

        debug!(
            block_hash = %notification.hash,
            shard = %notification.shard,
            height = notification.height,
            candidates = emitted,
            duplicates,
            "block accepted"
        );
        Ok(GateOutcome::Accepted {
            candidates: emitted,
            duplicates,
        })
    }

    fn mark_fresh(&self, tx_id: &str) -> bool {
        let mut guard = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert_if_new(tx_id, Instant::now())
    }

    async fn wait_for_depth(
        &self,
        notification: &BlockNotification,
        budget: &mut PollBudget,
    ) -> Result<u64, GateError> {
        loop {
            budget.consume().map_err(timeout_error)?;
            match self.chain.current_height(notification.shard).await {
                Ok(current)
                    if current.saturating_sub(notification.height) >= self.settings.depth =>
                {
                    return Ok(current);
                }
                Ok(current) => {
                    debug!(
                        block_hash = %notification.hash,
                        height = notification.height,
                        current_height = current,
                        attempts = budget.attempts(),
                        "waiting for confirmations"
                    );
                }
                Err(error) if error.is_retryable() => {
                    debug!(
                        error = %error,
                        block_hash = %notification.hash,
                        "chain height query failed"
                    );
                }
                Err(error) => return Err(GateError::Node(error)),
            }
            if !sleep_or_cancel(self.settings.poll_interval, &self.cancel).await {
                return Err(GateError::Cancelled);
            }
        }
    }

    async fn check_main_chain(
        &self,
        notification: &BlockNotification,
        budget: &mut PollBudget,
    ) -> Result<bool, GateError> {
        loop {
            budget.consume().map_err(timeout_error)?;
            match self.chain.is_block_in_main_chain(&notification.hash).await {
                Ok(canonical) => return Ok(canonical),
                Err(error) if error.is_retryable() => {
                    debug!(
                        error = %error,
                        block_hash = %notification.hash,
                        "main chain query failed"
                    );
                }
                Err(error) => return Err(GateError::Node(error)),
            }
            if !sleep_or_cancel(self.settings.poll_interval, &self.cancel).await {
                return Err(GateError::Cancelled);
            }
        }
    }
}

fn timeout_error(exhausted: BudgetExhausted) -> GateError {
    GateError::Timeout {
        limit: exhausted.limit,
        attempts: exhausted.attempts,
        waited: exhausted.waited,
    }
}

/// Every transaction with at least one input, in block order.
pub fn extract_candidates(notification: &BlockNotification) -> Vec<CandidateTx> {
    notification
        .transactions
        .iter()
        .filter(|tx| !tx.is_coinbase())
        .map(|tx| CandidateTx {
            tx_id: tx.tx_id.clone(),
            shard: notification.shard,
            block_height: notification.height,
        })
        .collect()
}

#[async_trait]
impl TaskHandler for ConfirmationGate {
    async fn handle(&self, task: &Task) -> TaskOutcome {
        let notification = &task.notification;
        match self.process(notification).await {
            Ok(_) => TaskOutcome::Completed,
            Err(GateError::Cancelled) => {
                debug!(block_hash = %notification.hash, "confirmation wait cancelled");
                TaskOutcome::Dropped { reason: "cancelled" }
            }
            Err(error @ GateError::Timeout { .. }) => {
                QueueMetrics::bump(&self.metrics.gate_timeouts_total);
                warn!(
                    block_hash = %notification.hash,
                    shard = %notification.shard,
                    height = notification.height,
                    error = %error,
                    "block never confirmed; dropped"
                );
                TaskOutcome::Dropped {
                    reason: "confirmation_timeout",
                }
            }
            Err(error) => {
                warn!(
                    block_hash = %notification.hash,
                    error = %error,
                    "confirmation failed; block dropped"
                );
                TaskOutcome::Dropped {
                    reason: "confirmation_failed",
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BudgetLimit, RemoteError};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use whalewatch_core_types::{RawBlockTransaction, ShardPair};

    /// Height advances by `step` on every query.
    struct FakeChain {
        height: AtomicU64,
        step: u64,
        canonical: bool,
        height_calls: AtomicUsize,
        main_chain_failures: AtomicUsize,
    }

    impl FakeChain {
        fn new(height: u64, step: u64, canonical: bool) -> Self {
            Self {
                height: AtomicU64::new(height),
                step,
                canonical,
                height_calls: AtomicUsize::new(0),
                main_chain_failures: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn current_height(&self, _shard: ShardPair) -> Result<u64, RemoteError> {
            self.height_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.height.fetch_add(self.step, Ordering::SeqCst))
        }

        async fn is_block_in_main_chain(&self, _block_hash: &str) -> Result<bool, RemoteError> {
            let remaining = self.main_chain_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.main_chain_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RemoteError::Transport {
                    endpoint: "fake".to_string(),
                    message: "connection reset".to_string(),
                });
            }
            Ok(self.canonical)
        }
    }

    fn block(height: u64) -> BlockNotification {
        BlockNotification {
            hash: format!("block-{height}"),
            timestamp_ms: 1_700_000_000_000,
            shard: ShardPair::new(0, 1),
            height,
            transactions: vec![
                RawBlockTransaction {
                    tx_id: "tx-coinbase".to_string(),
                    input_count: 0,
                },
                RawBlockTransaction {
                    tx_id: "tx-transfer".to_string(),
                    input_count: 1,
                },
                RawBlockTransaction {
                    tx_id: "tx-swap".to_string(),
                    input_count: 3,
                },
            ],
        }
    }

    fn settings(max_attempts: u32) -> ConfirmationSettings {
        ConfirmationSettings {
            depth: 10,
            poll_interval: Duration::from_millis(1),
            max_attempts,
            max_wait: Duration::from_secs(30),
            seen_tx_ttl: Duration::from_secs(60),
            seen_tx_limit: 128,
        }
    }

    fn gate(
        chain: Arc<FakeChain>,
        max_attempts: u32,
    ) -> (
        ConfirmationGate,
        Arc<OverflowQueue<CandidateTx>>,
        Arc<QueueMetrics>,
    ) {
        let candidates = Arc::new(OverflowQueue::new(16));
        let metrics = Arc::new(QueueMetrics::default());
        let gate = ConfirmationGate::new(
            chain,
            settings(max_attempts),
            Arc::clone(&candidates),
            Arc::clone(&metrics),
            CancellationToken::new(),
        );
        (gate, candidates, metrics)
    }

    #[test]
    fn coinbase_transactions_are_never_candidates() {
        let candidates = extract_candidates(&block(5));
        let ids: Vec<&str> = candidates.iter().map(|c| c.tx_id.as_str()).collect();
        assert_eq!(ids, vec!["tx-transfer", "tx-swap"]);
        assert!(candidates.iter().all(|c| c.block_height == 5));
    }

    #[tokio::test]
    async fn zero_confirmations_wait_until_depth_is_reached() {
        let chain = Arc::new(FakeChain::new(100, 1, true));
        let (gate, candidates, metrics) = gate(Arc::clone(&chain), 100);

        let outcome = gate.process(&block(100)).await.expect("block confirms");
        assert_eq!(
            outcome,
            GateOutcome::Accepted {
                candidates: 2,
                duplicates: 0
            }
        );
        // Heights 100..=110 were observed; only the last satisfies the depth.
        assert_eq!(chain.height_calls.load(Ordering::SeqCst), 11);
        assert_eq!(candidates.len(), 2);
        assert_eq!(metrics.snapshot().pending_transactions, 2);
    }

    #[tokio::test]
    async fn unconfirmed_block_times_out_without_candidates() {
        let chain = Arc::new(FakeChain::new(100, 0, true));
        let (gate, candidates, _) = gate(chain, 5);

        let error = gate
            .process(&block(100))
            .await
            .expect_err("depth never reached");
        assert!(matches!(
            error,
            GateError::Timeout {
                limit: BudgetLimit::Attempts,
                attempts: 5,
                ..
            }
        ));
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn orphaned_block_emits_nothing() {
        let chain = Arc::new(FakeChain::new(200, 0, false));
        let (gate, candidates, metrics) = gate(chain, 10);

        let outcome = gate.process(&block(150)).await.expect("orphan is not an error");
        assert_eq!(outcome, GateOutcome::Orphaned);
        assert!(candidates.is_empty());
        assert_eq!(metrics.snapshot().orphaned_blocks_total, 1);
        assert_eq!(metrics.snapshot().pending_transactions, 0);
    }

    #[tokio::test]
    async fn transient_main_chain_errors_are_retried() {
        let chain = Arc::new(FakeChain::new(200, 0, true));
        chain.main_chain_failures.store(2, Ordering::SeqCst);
        let (gate, candidates, _) = gate(chain, 10);

        let outcome = gate.process(&block(150)).await.expect("retries succeed");
        assert!(matches!(outcome, GateOutcome::Accepted { candidates: 2, .. }));
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn repeated_notification_does_not_duplicate_candidates() {
        let chain = Arc::new(FakeChain::new(200, 0, true));
        let (gate, candidates, metrics) = gate(chain, 10);

        gate.process(&block(150)).await.expect("first pass");
        let outcome = gate.process(&block(150)).await.expect("second pass");
        assert_eq!(
            outcome,
            GateOutcome::Accepted {
                candidates: 0,
                duplicates: 2
            }
        );
        assert_eq!(candidates.len(), 2);
        assert_eq!(metrics.snapshot().duplicate_candidates_total, 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_polling() {
        let chain = Arc::new(FakeChain::new(100, 0, true));
        let candidates = Arc::new(OverflowQueue::new(4));
        let cancel = CancellationToken::new();
        let mut slow = settings(1_000);
        slow.poll_interval = Duration::from_secs(60);
        let gate = ConfirmationGate::new(
            chain,
            slow,
            candidates,
            Arc::new(QueueMetrics::default()),
            cancel.clone(),
        );
        cancel.cancel();
        let error = gate.process(&block(100)).await.expect_err("cancelled");
        assert!(matches!(error, GateError::Cancelled));
    }
}
