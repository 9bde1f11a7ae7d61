use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whalewatch_config::AdmissionConfig;
use whalewatch_core_types::BlockNotification;

use crate::core::{
    decrement_atomic_usize, increment_atomic_usize, linear_retry_delay, sleep_with_backoff,
};
use crate::error::SubmitError;
use crate::queue::{OverflowQueue, TryPushError};
use crate::telemetry::QueueMetrics;

mod retry;

use self::retry::RetryScheduler;

/// One block notification travelling through the worker pool.
#[derive(Debug, Clone)]
pub struct Task {
    pub notification: BlockNotification,
    pub retries: u32,
    pub admitted_at: Instant,
}

impl Task {
    pub fn new(notification: BlockNotification) -> Self {
        Self {
            notification,
            retries: 0,
            admitted_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Dropped { reason: &'static str },
}

#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: &Task) -> TaskOutcome;
}

#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_concurrent: usize,
    pub retry_base_delay_ms: u64,
    pub submit_backoff_initial_ms: u64,
    pub submit_backoff_max_ms: u64,
}

impl AdmissionSettings {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            workers: config.workers.max(1),
            max_concurrent: config.max_concurrent.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms,
            submit_backoff_initial_ms: config.submit_backoff_initial_ms.max(1),
            submit_backoff_max_ms: config
                .submit_backoff_max_ms
                .max(config.submit_backoff_initial_ms.max(1)),
        }
    }
}

/// Bounded buffer in front of a worker pool whose simultaneous executions are
/// capped by a permit pool. Tasks that find every permit taken go to the
/// retry scheduler with a linearly growing delay instead of being dropped.
pub struct AdmissionQueue {
    buffer: OverflowQueue<Task>,
    permits: Arc<Semaphore>,
    retries: RetryScheduler<Task>,
    settings: AdmissionSettings,
    metrics: Arc<QueueMetrics>,
    cancel: CancellationToken,
}

impl AdmissionQueue {
    pub fn new(
        settings: AdmissionSettings,
        metrics: Arc<QueueMetrics>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer: OverflowQueue::new(settings.queue_capacity),
            permits: Arc::new(Semaphore::new(settings.max_concurrent)),
            retries: RetryScheduler::new(),
            settings,
            metrics,
            cancel,
        })
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Non-blocking enqueue. A full buffer hands the task back.
    pub fn try_submit(&self, task: Task) -> Result<(), TryPushError<Task>> {
        self.buffer.try_push(task)?;
        QueueMetrics::bump(&self.metrics.queued_total);
        increment_atomic_usize(&self.metrics.in_queue);
        Ok(())
    }

    /// Enqueues with doubling backoff while the buffer is full.
    pub async fn submit(&self, task: Task) -> Result<(), SubmitError> {
        let mut pending = task;
        let mut next_backoff_ms = self.settings.submit_backoff_initial_ms;
        loop {
            match self.try_submit(pending) {
                Ok(()) => return Ok(()),
                Err(TryPushError::Closed(_)) => return Err(SubmitError::Closed),
                Err(TryPushError::Full(returned)) => {
                    pending = returned;
                    QueueMetrics::bump(&self.metrics.backpressured_total);
                    debug!(
                        block_hash = %pending.notification.hash,
                        backoff_ms = next_backoff_ms,
                        "admission queue full; backing off"
                    );
                    if !sleep_with_backoff(
                        &mut next_backoff_ms,
                        self.settings.submit_backoff_initial_ms,
                        self.settings.submit_backoff_max_ms,
                        &self.cancel,
                    )
                    .await
                    {
                        return Err(SubmitError::Cancelled);
                    }
                }
            }
        }
    }

    /// Fire-and-forget submission: tries once inline and, if the buffer is
    /// full, moves the retry loop onto its own task so the caller never waits.
    pub fn submit_detached(self: &Arc<Self>, task: Task) {
        let task = match self.try_submit(task) {
            Ok(()) => return,
            Err(TryPushError::Closed(task)) => {
                QueueMetrics::bump(&self.metrics.dropped_total);
                warn!(
                    block_hash = %task.notification.hash,
                    "admission queue closed; block notification discarded"
                );
                return;
            }
            Err(TryPushError::Full(task)) => task,
        };
        QueueMetrics::bump(&self.metrics.backpressured_total);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let block_hash = task.notification.hash.clone();
            if let Err(error) = queue.submit(task).await {
                QueueMetrics::bump(&queue.metrics.dropped_total);
                warn!(block_hash = %block_hash, error = %error, "block notification not admitted");
            }
        });
    }

    pub fn spawn_workers<H: TaskHandler>(
        self: &Arc<Self>,
        handler: Arc<H>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.settings.workers + 1);
        for worker_id in 0..self.settings.workers {
            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            handles.push(tokio::spawn(async move {
                queue.worker_loop(worker_id, handler).await;
            }));
        }
        let queue = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            queue.retry_driver_loop().await;
        }));
        info!(
            workers = self.settings.workers,
            max_concurrent = self.settings.max_concurrent,
            queue_capacity = self.settings.queue_capacity,
            "admission workers started"
        );
        handles
    }

    /// Stops intake. Buffered tasks are still drained by the workers unless
    /// the pipeline is cancelled; retries still waiting are abandoned.
    pub fn close(&self) {
        self.buffer.close();
        let abandoned = self.retries.close();
        if !abandoned.is_empty() {
            for _ in &abandoned {
                decrement_atomic_usize(&self.metrics.scheduled_retries);
                QueueMetrics::bump(&self.metrics.dropped_total);
            }
            warn!(
                abandoned = abandoned.len(),
                "admission closed with retries still scheduled"
            );
        }
    }

    async fn worker_loop<H: TaskHandler>(&self, worker_id: usize, handler: Arc<H>) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                task = self.buffer.pop() => task,
            };
            let Some(mut task) = next else {
                debug!(worker_id, "admission worker exiting");
                return;
            };
            decrement_atomic_usize(&self.metrics.in_queue);

            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    self.schedule_retry_for(worker_id, &mut task);
                    let delay = self.retry_delay(&task);
                    if let Err(task) = self.retries.schedule(task, delay) {
                        decrement_atomic_usize(&self.metrics.scheduled_retries);
                        QueueMetrics::bump(&self.metrics.dropped_total);
                        warn!(
                            worker_id,
                            block_hash = %task.notification.hash,
                            "retry scheduler closed; task discarded"
                        );
                    }
                    continue;
                }
                Err(TryAcquireError::Closed) => return,
            };

            increment_atomic_usize(&self.metrics.inflight);
            let outcome = handler.handle(&task).await;
            decrement_atomic_usize(&self.metrics.inflight);
            drop(permit);

            match outcome {
                TaskOutcome::Completed => {
                    QueueMetrics::bump(&self.metrics.processed_total);
                    debug!(
                        worker_id,
                        block_hash = %task.notification.hash,
                        retries = task.retries,
                        elapsed_ms = task.admitted_at.elapsed().as_millis() as u64,
                        "task processed"
                    );
                }
                TaskOutcome::Dropped { reason } => {
                    QueueMetrics::bump(&self.metrics.dropped_total);
                    warn!(
                        worker_id,
                        block_hash = %task.notification.hash,
                        reason,
                        "task dropped"
                    );
                }
            }
        }
    }

    fn retry_delay(&self, task: &Task) -> Duration {
        linear_retry_delay(task.retries, self.settings.retry_base_delay_ms)
    }

    fn schedule_retry_for(&self, worker_id: usize, task: &mut Task) {
        task.retries = task.retries.saturating_add(1);
        QueueMetrics::bump(&self.metrics.retried_total);
        increment_atomic_usize(&self.metrics.scheduled_retries);
        debug!(
            worker_id,
            block_hash = %task.notification.hash,
            retries = task.retries,
            delay_ms = self.retry_delay(task).as_millis() as u64,
            "worker pool saturated; task rescheduled"
        );
    }

    async fn retry_driver_loop(&self) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                task = self.retries.next_due() => task,
            };
            let Some(task) = next else {
                debug!("retry driver exiting");
                return;
            };
            decrement_atomic_usize(&self.metrics.scheduled_retries);
            let block_hash = task.notification.hash.clone();
            if let Err(error) = self.submit(task).await {
                QueueMetrics::bump(&self.metrics.dropped_total);
                warn!(block_hash = %block_hash, error = %error, "retried task not re-admitted");
                if error == SubmitError::Cancelled {
                    return;
                }
            }
        }
    }
}

impl Drop for AdmissionQueue {
    fn drop(&mut self) {
        self.buffer.close();
        let _ = self.retries.close();
    }
}
