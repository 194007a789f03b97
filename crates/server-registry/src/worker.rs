//! Probe worker pool.

use crate::metrics::MetricsRegistry;
use crate::queue::{Delivery, NackOutcome, TaskQueue};
use crate::reconciler::{ProbeOutcome, StateReconciler};
use crate::types::ServerCandidate;
use server_probe::TimedProbe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// N workers consuming probe tasks
pub struct ProbePool {
    queue: Arc<dyn TaskQueue>,
    probe: TimedProbe,
    reconciler: Arc<StateReconciler>,
    concurrency: usize,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ProbePool {
    /// Create a new pool. A concurrency of zero is treated as one.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        probe: TimedProbe,
        reconciler: Arc<StateReconciler>,
        concurrency: usize,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            queue,
            probe,
            reconciler,
            concurrency: concurrency.max(1),
            metrics,
        }
    }

    /// Start the workers
    pub fn spawn(self) -> PoolHandle {
        let shutdown = CancellationToken::new();
        let worker = Arc::new(Worker {
            queue: self.queue,
            probe: self.probe,
            reconciler: self.reconciler,
            metrics: self.metrics,
        });

        let mut workers = JoinSet::new();
        for id in 0..self.concurrency {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { worker.run(id, shutdown).await });
        }

        info!(workers = self.concurrency, "Probe pool started");
        PoolHandle { workers, shutdown }
    }
}

/// Running pool
pub struct PoolHandle {
    workers: JoinSet<()>,
    shutdown: CancellationToken,
}

impl PoolHandle {
    /// Stop taking new tasks and wait up to `deadline` for in-flight probes.
    ///
    /// Probes still running at the deadline are aborted. Returns true if every
    /// worker finished on its own.
    pub async fn drain(mut self, deadline: Duration) -> bool {
        self.shutdown.cancel();

        let drained = tokio::time::timeout(deadline, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                remaining = self.workers.len(),
                "Drain deadline passed, aborting in-flight probes"
            );
            self.workers.abort_all();
            while self.workers.join_next().await.is_some() {}
        }

        info!(drained, "Probe pool stopped");
        drained
    }
}

struct Worker {
    queue: Arc<dyn TaskQueue>,
    probe: TimedProbe,
    reconciler: Arc<StateReconciler>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Worker {
    async fn run(&self, id: usize, shutdown: CancellationToken) {
        debug!(worker = id, "Worker started");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                delivery = self.queue.dequeue() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            self.process(delivery).await;
        }

        debug!(worker = id, "Worker stopped");
    }

    /// Probe one task and settle it with the queue.
    ///
    /// Exactly one outcome is reconciled per task: a Hit on success, a Miss
    /// once retries are exhausted, nothing while a retry is pending.
    async fn process(&self, delivery: Delivery) {
        let address = delivery.task.address;
        let attempt = self.probe.attempt(address).await;

        if let Some(ref m) = self.metrics {
            let result = match &attempt.outcome {
                Ok(_) => "hit",
                Err(e) => e.kind(),
            };
            m.record_probe(result, attempt.duration);
        }

        match attempt.outcome {
            Ok(metadata) => {
                let candidate = ServerCandidate::from_metadata(address, &metadata);
                self.settle(address, ProbeOutcome::Hit(candidate)).await;
                self.queue.ack(delivery).await;
            }
            Err(e) => {
                debug!(
                    address = %address,
                    attempt = delivery.task.attempt,
                    error = %e,
                    "Probe failed"
                );

                match self.queue.nack(delivery.clone()).await {
                    NackOutcome::Retrying { attempt, delay } => {
                        debug!(address = %address, attempt, delay = ?delay, "Probe rescheduled");
                    }
                    NackOutcome::Exhausted => {
                        self.settle(address, ProbeOutcome::Miss).await;
                        self.queue.ack(delivery).await;
                    }
                    NackOutcome::Abandoned => {
                        debug!(address = %address, "Probe abandoned on shutdown");
                    }
                }
            }
        }

        if let Some(ref m) = self.metrics {
            m.update_queue_pending(self.queue.pending());
        }
    }

    async fn settle(&self, address: std::net::SocketAddr, outcome: ProbeOutcome) {
        // Store errors are logged and counted by the reconciler; the address
        // is simply retried next cycle.
        let _ = self.reconciler.reconcile(address, outcome).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ChannelQueue;
    use crate::store::{MemoryStore, RegistryStore};
    use crate::types::{ProbeTask, RetryPolicy, Status};
    use async_trait::async_trait;
    use server_probe::{ProbeClient, ProbeError, ServerMetadata};
    use std::net::{IpAddr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers for `up` addresses, refuses everything else
    struct FakeClient {
        up: Vec<SocketAddr>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProbeClient for FakeClient {
        async fn query(
            &self,
            host: IpAddr,
            port: u16,
            _timeout: Duration,
        ) -> Result<ServerMetadata, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.contains(&SocketAddr::new(host, port)) {
                Ok(ServerMetadata {
                    name: "Retake Central".to_string(),
                    map: "de_mirage".to_string(),
                    max_players: 10,
                    ping: Duration::from_millis(15),
                    ..Default::default()
                })
            } else {
                Err(ProbeError::Refused("connection refused".to_string()))
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_hits_and_misses() {
        let up: SocketAddr = "10.0.0.1:27015".parse().unwrap();
        let down: SocketAddr = "10.0.0.2:27015".parse().unwrap();

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(ChannelQueue::new(16));
        let client = Arc::new(FakeClient {
            up: vec![up],
            calls: AtomicUsize::new(0),
        });
        let reconciler = Arc::new(StateReconciler::new(store.clone(), 3, None));
        let pool = ProbePool::new(
            queue.clone(),
            TimedProbe::new(client.clone(), Duration::from_secs(5)),
            reconciler,
            4,
            None,
        )
        .spawn();

        for addr in [up, down] {
            queue
                .enqueue(ProbeTask::new(addr), RetryPolicy::default())
                .await
                .unwrap();
        }
        queue.wait_idle().await;

        // One attempt for the hit, two for the miss
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        let record = store.get(up).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Online);
        assert_eq!(record.gamemode, server_probe::Gamemode::Retake);
        assert!(store.get(down).await.unwrap().is_none());

        assert!(pool.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_stuck_probe() {
        struct StuckClient;

        #[async_trait]
        impl ProbeClient for StuckClient {
            async fn query(
                &self,
                _host: IpAddr,
                _port: u16,
                _timeout: Duration,
            ) -> Result<ServerMetadata, ProbeError> {
                std::future::pending().await
            }

            fn name(&self) -> &str {
                "stuck"
            }
        }

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(ChannelQueue::new(16));
        let reconciler = Arc::new(StateReconciler::new(store, 3, None));
        // Attempt deadline far beyond the drain deadline
        let pool = ProbePool::new(
            queue.clone(),
            TimedProbe::new(Arc::new(StuckClient), Duration::from_secs(600)),
            reconciler,
            1,
            None,
        )
        .spawn();

        queue
            .enqueue(
                ProbeTask::new("10.0.0.1:27015".parse().unwrap()),
                RetryPolicy::default(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        queue.close();
        assert!(!pool.drain(Duration::from_secs(2)).await);
    }
}
