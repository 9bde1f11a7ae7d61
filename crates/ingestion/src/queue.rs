use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    Full(T),
    Closed(T),
}

#[derive(Debug)]
struct OverflowQueueState<T> {
    deque: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer multi-consumer FIFO. Closing lets consumers drain
/// what is left and then observe `None`.
#[derive(Debug)]
pub struct OverflowQueue<T> {
    state: Mutex<OverflowQueueState<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> OverflowQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(OverflowQueueState {
                deque: VecDeque::with_capacity(capacity.min(4_096)),
                closed: false,
            }),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, OverflowQueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock_state().deque.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        let mut guard = self.lock_state();
        if guard.closed {
            return Err(TryPushError::Closed(item));
        }
        if guard.deque.len() >= self.capacity {
            return Err(TryPushError::Full(item));
        }
        guard.deque.push_back(item);
        drop(guard);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Waits for space. Returns the item back if the queue is closed.
    pub async fn push(&self, item: T) -> Result<(), T> {
        let mut pending = item;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(pending) {
                Ok(()) => return Ok(()),
                Err(TryPushError::Closed(item)) => return Err(item),
                Err(TryPushError::Full(item)) => pending = item,
            }
            notified.await;
        }
    }

    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guard = self.lock_state();
                if let Some(item) = guard.deque.pop_front() {
                    let more = !guard.deque.is_empty();
                    drop(guard);
                    self.not_full.notify_one();
                    // Hand the wakeup on so a stored permit is not swallowed.
                    if more {
                        self.not_empty.notify_one();
                    }
                    return Some(item);
                }
                if guard.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        let mut guard = self.lock_state();
        guard.closed = true;
        drop(guard);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}
