//! Dispatch batcher.

use crate::metrics::MetricsRegistry;
use crate::queue::{QueueError, TaskQueue};
use crate::types::{ProbeTask, RetryPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of dispatching one discovery result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Size of each batch, in order
    pub batches: Vec<usize>,
    /// Tasks enqueued in total
    pub enqueued: usize,
}

/// Splits discovered addresses into batches and enqueues one probe task per
/// address.
///
/// Batching only shapes progress logging; every address gets the same retry
/// policy and the queue decides execution order.
pub struct DispatchBatcher {
    queue: Arc<dyn TaskQueue>,
    batch_size: usize,
    policy: RetryPolicy,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl DispatchBatcher {
    /// Create a new batcher. A batch size of zero is treated as one.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        batch_size: usize,
        policy: RetryPolicy,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            queue,
            batch_size: batch_size.max(1),
            policy,
            metrics,
        }
    }

    /// Enqueue every address. Waits for queue capacity as needed.
    ///
    /// Fails only if the queue closes part way; tasks already enqueued stay
    /// enqueued.
    pub async fn dispatch(&self, addresses: &[SocketAddr]) -> Result<DispatchSummary, QueueError> {
        let total_batches = addresses.len().div_ceil(self.batch_size);
        let mut summary = DispatchSummary::default();

        for (index, batch) in addresses.chunks(self.batch_size).enumerate() {
            for address in batch {
                self.queue.enqueue(ProbeTask::new(*address), self.policy).await?;
            }

            summary.batches.push(batch.len());
            summary.enqueued += batch.len();

            if let Some(ref m) = self.metrics {
                m.record_dispatched(batch.len());
                m.update_queue_pending(self.queue.pending());
            }

            debug!(
                batch = index + 1,
                of = total_batches,
                size = batch.len(),
                "Batch enqueued"
            );
        }

        info!(
            addresses = summary.enqueued,
            batches = summary.batches.len(),
            "Probe tasks dispatched"
        );
        Ok(summary)
    }

    /// Wait until every dispatched task has an outcome, or the queue closes
    pub async fn wait_drained(&self) {
        self.queue.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ChannelQueue;

    fn addresses(count: usize) -> Vec<SocketAddr> {
        (0..count)
            .map(|i| SocketAddr::from(([10, 0, (i / 250) as u8, (i % 250) as u8], 27015)))
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_splits_into_batches() {
        let queue = Arc::new(ChannelQueue::new(1000));
        let batcher = DispatchBatcher::new(queue.clone(), 100, RetryPolicy::default(), None);

        let summary = batcher.dispatch(&addresses(250)).await.unwrap();
        assert_eq!(summary.batches, vec![100, 100, 50]);
        assert_eq!(summary.enqueued, 250);
        assert_eq!(queue.pending(), 250);
    }

    #[tokio::test]
    async fn test_dispatch_attaches_policy() {
        let queue = Arc::new(ChannelQueue::new(10));
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: std::time::Duration::from_millis(200),
        };
        let batcher = DispatchBatcher::new(queue.clone(), 100, policy, None);

        batcher.dispatch(&addresses(1)).await.unwrap();
        let delivery = queue.dequeue().await.unwrap();
        assert_eq!(delivery.policy, policy);
        assert_eq!(delivery.task.attempt, 1);
    }

    #[tokio::test]
    async fn test_dispatch_empty() {
        let queue = Arc::new(ChannelQueue::new(10));
        let batcher = DispatchBatcher::new(queue, 100, RetryPolicy::default(), None);
        assert_eq!(
            batcher.dispatch(&[]).await.unwrap(),
            DispatchSummary::default()
        );
    }

    #[tokio::test]
    async fn test_dispatch_fails_on_closed_queue() {
        let queue = Arc::new(ChannelQueue::new(10));
        queue.close();
        let batcher = DispatchBatcher::new(queue, 100, RetryPolicy::default(), None);
        assert_eq!(
            batcher.dispatch(&addresses(3)).await,
            Err(QueueError::Closed)
        );
    }
}
