//! Probe task queue.
//!
//! Delivery is at-least-once: a dequeued task stays pending until it is
//! acked. A failed task is nacked and either rescheduled after its backoff or
//! reported as exhausted, in which case the caller handles the terminal
//! outcome and then acks it.

use crate::types::{ProbeTask, RetryPolicy};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Queue error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Task queue is closed")]
    Closed,
}

/// A task handed to a worker together with its retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub task: ProbeTask,
    pub policy: RetryPolicy,
}

/// Result of a negative acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Rescheduled as `attempt` after `delay`
    Retrying { attempt: u32, delay: Duration },

    /// No attempts left; the caller owns the terminal outcome
    Exhausted,

    /// The queue closed; the task is dropped without an outcome
    Abandoned,
}

/// Task queue contract
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Verify the queue can accept work
    async fn ping(&self) -> Result<(), QueueError>;

    /// Add a task. May wait for capacity.
    async fn enqueue(&self, task: ProbeTask, policy: RetryPolicy) -> Result<(), QueueError>;

    /// Next runnable task, or `None` once the queue is closed
    async fn dequeue(&self) -> Option<Delivery>;

    /// Mark a delivery as finished
    async fn ack(&self, delivery: Delivery);

    /// Report a failed delivery
    async fn nack(&self, delivery: Delivery) -> NackOutcome;

    /// Tasks enqueued and not yet acked, including scheduled retries
    fn pending(&self) -> usize;

    /// Wait until every enqueued task has reached a terminal state, or the
    /// queue closes.
    async fn wait_idle(&self);

    /// Stop accepting and handing out tasks. Queued tasks are abandoned.
    fn close(&self);
}

/// In-process bounded queue
pub struct ChannelQueue {
    tx: mpsc::Sender<Delivery>,
    rx: Mutex<mpsc::Receiver<Delivery>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    closed: CancellationToken,
}

impl ChannelQueue {
    /// Create a new queue holding at most `capacity` runnable tasks
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            closed: CancellationToken::new(),
        }
    }

    /// Tasks currently buffered in the channel
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Drop whatever is still buffered after close and stop further sends.
    fn abandon_buffered(&self, rx: &mut mpsc::Receiver<Delivery>) {
        rx.close();
        let mut abandoned = 0usize;
        while rx.try_recv().is_ok() {
            abandoned += 1;
            self.finish_one();
        }
        if abandoned > 0 {
            debug!(abandoned, "Buffered tasks abandoned");
        }
    }
}

#[async_trait]
impl TaskQueue for ChannelQueue {
    async fn ping(&self) -> Result<(), QueueError> {
        if self.closed.is_cancelled() || self.tx.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    async fn enqueue(&self, task: ProbeTask, policy: RetryPolicy) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery { task, policy };

        let sent = tokio::select! {
            result = self.tx.send(delivery) => result.is_ok(),
            _ = self.closed.cancelled() => false,
        };

        if !sent {
            self.finish_one();
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    async fn dequeue(&self) -> Option<Delivery> {
        let mut rx = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return None,
            guard = self.rx.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                self.abandon_buffered(&mut rx);
                None
            }
            delivery = rx.recv() => delivery,
        }
    }

    async fn ack(&self, delivery: Delivery) {
        debug!(address = %delivery.task.address, attempt = delivery.task.attempt, "Task acked");
        self.finish_one();
    }

    async fn nack(&self, delivery: Delivery) -> NackOutcome {
        let Delivery { task, policy } = delivery;

        if self.closed.is_cancelled() {
            self.finish_one();
            return NackOutcome::Abandoned;
        }
        if !policy.allows_retry(task.attempt) {
            return NackOutcome::Exhausted;
        }

        let delay = policy.backoff_after(task.attempt);
        let retry = Delivery {
            task: task.retry(delay),
            policy,
        };
        let attempt = retry.task.attempt;

        let tx = self.tx.clone();
        let closed = self.closed.clone();
        let pending = self.pending.clone();
        let idle = self.idle.clone();

        tokio::spawn(async move {
            let address = retry.task.address;
            let delivered = tokio::select! {
                _ = tokio::time::sleep_until(retry.task.scheduled_at) => {
                    tokio::select! {
                        result = tx.send(retry) => result.is_ok(),
                        _ = closed.cancelled() => false,
                    }
                }
                _ = closed.cancelled() => false,
            };

            if !delivered {
                warn!(address = %address, "Retry abandoned, queue closed");
                if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    idle.notify_waiters();
                }
            }
        });

        NackOutcome::Retrying { attempt, delay }
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending.load(Ordering::SeqCst) == 0 || self.closed.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.closed.cancelled() => return,
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
        // A worker blocked in dequeue holds the receiver; it drains on wakeup
        if let Ok(mut rx) = self.rx.try_lock() {
            self.abandon_buffered(&mut rx);
        }
    }
}
