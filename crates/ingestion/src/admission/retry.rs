use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

#[derive(Debug)]
struct RetryState<T> {
    due: BTreeMap<(Instant, u64), T>,
    next_seq: u64,
    closed: bool,
}

/// Delay queue for tasks bounced off a saturated worker pool. Entries come
/// out in due order; equal deadlines keep insertion order.
#[derive(Debug)]
pub(crate) struct RetryScheduler<T> {
    state: Mutex<RetryState<T>>,
    wake: Notify,
}

impl<T> RetryScheduler<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RetryState {
                due: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            wake: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RetryState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the item back if the scheduler was already closed.
    pub(crate) fn schedule(&self, item: T, delay: Duration) -> Result<(), T> {
        let mut guard = self.lock_state();
        if guard.closed {
            return Err(item);
        }
        let seq = guard.next_seq;
        guard.next_seq = guard.next_seq.wrapping_add(1);
        guard.due.insert((Instant::now() + delay, seq), item);
        drop(guard);
        self.wake.notify_one();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock_state().due.len()
    }

    /// Waits for the earliest entry to come due. `None` once closed.
    pub(crate) async fn next_due(&self) -> Option<T> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait_until = {
                let mut guard = self.lock_state();
                if guard.closed {
                    return None;
                }
                match guard.due.first_key_value().map(|((due, _), _)| *due) {
                    Some(due) if due <= Instant::now() => {
                        return guard.due.pop_first().map(|(_, item)| item);
                    }
                    other => other,
                }
            };

            match wait_until {
                Some(due) => {
                    tokio::select! {
                        _ = time::sleep_until(due) => {}
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Stops the scheduler and hands back whatever was still waiting.
    pub(crate) fn close(&self) -> Vec<T> {
        let mut guard = self.lock_state();
        guard.closed = true;
        let abandoned = std::mem::take(&mut guard.due).into_values().collect();
        drop(guard);
        self.wake.notify_waiters();
        abandoned
    }
}
