use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{BudgetLimit, DeliveryError};

/// Sleeps for `duration` unless cancelled first. Returns false on cancellation.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = time::sleep(duration) => true,
    }
}

/// Doubling backoff capped at `max_ms`. Returns false if cancelled mid-sleep.
pub(crate) async fn sleep_with_backoff(
    next_backoff_ms: &mut u64,
    initial_ms: u64,
    max_ms: u64,
    cancel: &CancellationToken,
) -> bool {
    let delay = (*next_backoff_ms).clamp(initial_ms, max_ms.max(initial_ms));
    let completed = sleep_or_cancel(Duration::from_millis(delay), cancel).await;
    *next_backoff_ms = delay.saturating_mul(2).min(max_ms.max(initial_ms));
    completed
}

pub(crate) fn linear_retry_delay(retries: u32, base_ms: u64) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(u64::from(retries.max(1))))
}

pub(crate) fn increment_atomic_usize(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn decrement_atomic_usize(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(1))
    });
}

/// Pushes into a bounded channel without parking the caller on a full buffer;
/// each full attempt bumps `backpressured` and backs off before trying again.
pub(crate) async fn send_with_backoff<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    initial_ms: u64,
    max_ms: u64,
    backpressured: &AtomicU64,
    cancel: &CancellationToken,
) -> Result<(), DeliveryError> {
    let mut pending = item;
    let mut next_backoff_ms = initial_ms;
    loop {
        match tx.try_send(pending) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(DeliveryError::Closed),
            Err(TrySendError::Full(returned)) => {
                pending = returned;
                backpressured.fetch_add(1, Ordering::Relaxed);
                if !sleep_with_backoff(&mut next_backoff_ms, initial_ms, max_ms, cancel).await {
                    return Err(DeliveryError::Cancelled);
                }
            }
        }
    }
}

/// Attempt and wall-clock budget shared by the polling loops.
#[derive(Debug)]
pub(crate) struct PollBudget {
    started: Instant,
    attempts: u32,
    max_attempts: u32,
    max_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BudgetExhausted {
    pub(crate) limit: BudgetLimit,
    pub(crate) attempts: u32,
    pub(crate) waited: Duration,
}

impl PollBudget {
    pub(crate) fn new(max_attempts: u32, max_wait: Duration) -> Self {
        Self {
            started: Instant::now(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
            max_wait,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Claims one more attempt, failing once either limit is reached.
    pub(crate) fn consume(&mut self) -> Result<(), BudgetExhausted> {
        let waited = self.started.elapsed();
        let limit = if self.attempts >= self.max_attempts {
            Some(BudgetLimit::Attempts)
        } else if waited >= self.max_wait {
            Some(BudgetLimit::Deadline)
        } else {
            None
        };
        match limit {
            Some(limit) => Err(BudgetExhausted {
                limit,
                attempts: self.attempts,
                waited,
            }),
            None => {
                self.attempts += 1;
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
struct SeenTxEntry {
    tx_id: String,
    seen_at: Instant,
}

/// Bounded TTL set of transaction ids already handed to the resolver.
#[derive(Debug)]
pub(crate) struct SeenTxCache {
    seen_map: HashMap<String, Instant>,
    seen_queue: VecDeque<SeenTxEntry>,
    limit: usize,
    ttl: Duration,
}

impl SeenTxCache {
    pub(crate) fn new(limit: usize, ttl: Duration) -> Self {
        Self {
            seen_map: HashMap::new(),
            seen_queue: VecDeque::new(),
            limit: limit.max(1),
            ttl,
        }
    }

    pub(crate) fn is_seen(&self, tx_id: &str, now: Instant) -> bool {
        self.seen_map
            .get(tx_id)
            .map(|seen_at| now.duration_since(*seen_at) < self.ttl)
            .unwrap_or(false)
    }

    pub(crate) fn mark(&mut self, tx_id: String, now: Instant) {
        self.seen_map.insert(tx_id.clone(), now);
        self.seen_queue.push_back(SeenTxEntry { tx_id, seen_at: now });
        self.prune(now);
    }

    /// Marks `tx_id` and reports whether it was fresh.
    pub(crate) fn insert_if_new(&mut self, tx_id: &str, now: Instant) -> bool {
        self.prune(now);
        if self.is_seen(tx_id, now) {
            return false;
        }
        self.mark(tx_id.to_string(), now);
        true
    }

    pub(crate) fn prune(&mut self, now: Instant) {
        while let Some(front) = self.seen_queue.front() {
            let expired = now.duration_since(front.seen_at) >= self.ttl;
            let over_capacity = self.seen_queue.len() > self.limit;
            if !expired && !over_capacity {
                break;
            }
            if let Some(removed) = self.seen_queue.pop_front() {
                if self
                    .seen_map
                    .get(&removed.tx_id)
                    .is_some_and(|seen_at| *seen_at == removed.seen_at)
                {
                    self.seen_map.remove(&removed.tx_id);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.seen_map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_cache_expires_entries_after_ttl() {
        let ttl = Duration::from_millis(100);
        let now = Instant::now();
        let mut cache = SeenTxCache::new(16, ttl);
        assert!(cache.insert_if_new("tx-1", now));
        assert!(!cache.insert_if_new("tx-1", now + Duration::from_millis(50)));

        cache.prune(now + Duration::from_millis(150));
        assert!(!cache.is_seen("tx-1", now + Duration::from_millis(150)));
        assert!(cache.insert_if_new("tx-1", now + Duration::from_millis(150)));
    }

    #[test]
    fn seen_cache_evicts_oldest_when_over_limit() {
        let now = Instant::now();
        let mut cache = SeenTxCache::new(2, Duration::from_secs(60));
        cache.mark("tx-1".to_string(), now);
        cache.mark("tx-2".to_string(), now);
        cache.mark("tx-3".to_string(), now);
        assert_eq!(cache.len(), 2);
        assert!(!cache.is_seen("tx-1", now));
        assert!(cache.is_seen("tx-3", now));
    }

    #[test]
    fn poll_budget_stops_at_attempt_limit() {
        let mut budget = PollBudget::new(2, Duration::from_secs(60));
        assert!(budget.consume().is_ok());
        assert!(budget.consume().is_ok());
        let exhausted = budget.consume().expect_err("third attempt exceeds limit");
        assert_eq!(exhausted.limit, BudgetLimit::Attempts);
        assert_eq!(exhausted.attempts, 2);
    }

    #[test]
    fn poll_budget_stops_at_deadline() {
        let mut budget = PollBudget::new(100, Duration::ZERO);
        let exhausted = budget.consume().expect_err("zero deadline is already exhausted");
        assert_eq!(exhausted.limit, BudgetLimit::Deadline);
    }

    #[test]
    fn linear_retry_delay_scales_with_retries() {
        assert_eq!(linear_retry_delay(1, 1_000), Duration::from_millis(1_000));
        assert_eq!(linear_retry_delay(3, 1_000), Duration::from_millis(3_000));
        assert_eq!(linear_retry_delay(0, 250), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn backoff_doubles_and_caps() {
        let cancel = CancellationToken::new();
        let mut next = 1;
        assert!(sleep_with_backoff(&mut next, 1, 4, &cancel).await);
        assert_eq!(next, 2);
        assert!(sleep_with_backoff(&mut next, 1, 4, &cancel).await);
        assert!(sleep_with_backoff(&mut next, 1, 4, &cancel).await);
        assert_eq!(next, 4);
    }

    #[tokio::test]
    async fn backoff_returns_false_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut next = 10_000;
        assert!(!sleep_with_backoff(&mut next, 10_000, 20_000, &cancel).await);
    }

    #[tokio::test]
    async fn send_with_backoff_waits_for_room() {
        let (tx, mut rx) = mpsc::channel(1);
        let backpressured = AtomicU64::new(0);
        let cancel = CancellationToken::new();
        tx.try_send(1u32).expect("first slot free");

        let drain = tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });
        send_with_backoff(&tx, 2u32, 5, 40, &backpressured, &cancel)
            .await
            .expect("send eventually succeeds");
        let (first, second) = drain.await.expect("drain task");
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
        assert!(backpressured.load(Ordering::Relaxed) >= 1);
    }
}
