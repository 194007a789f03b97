//! Registry server lifecycle.
//!
//! Startup verifies the store and queue, then starts the probe pool, the
//! discovery poller, the reaper and the metrics endpoint. Shutdown stops the
//! tickers, closes the queue, drains in-flight probes up to the drain
//! deadline and stops the endpoint.

use crate::directory::MasterDirectory;
use crate::dispatcher::DispatchBatcher;
use crate::http_server::{AppState, MetricsServer};
use crate::metrics::MetricsRegistry;
use crate::poller::DiscoveryPoller;
use crate::queue::TaskQueue;
use crate::reaper::Reaper;
use crate::reconciler::StateReconciler;
use crate::scheduler::Scheduler;
use crate::store::RegistryStore;
use crate::types::PipelineConfig;
use crate::worker::{PoolHandle, ProbePool};
use common::{Error, Result};
use server_probe::{ProbeClient, TimedProbe};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Externally owned clients the pipeline runs against
#[derive(Clone)]
pub struct Dependencies {
    pub store: Arc<dyn RegistryStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub directory: Arc<dyn MasterDirectory>,
    pub probe_client: Arc<dyn ProbeClient>,
}

/// Server registry
pub struct RegistryServer {
    config: PipelineConfig,
    deps: Dependencies,
}

impl RegistryServer {
    /// Create a new registry server
    pub fn new(config: PipelineConfig, deps: Dependencies) -> Self {
        Self { config, deps }
    }

    /// Run until Ctrl-C, then shut down
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Run until `signal` completes, then shut down
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> Result<()> {
        let running = self.start().await?;
        signal.await;
        running.shutdown().await;
        Ok(())
    }

    /// Verify dependencies and start every component
    pub async fn start(self) -> Result<RunningServer> {
        info!("Starting server registry");
        let RegistryServer { config, deps } = self;

        deps.store
            .ping()
            .await
            .map_err(|e| Error::startup(format!("registry store: {}", e)))?;
        deps.queue
            .ping()
            .await
            .map_err(|e| Error::startup(format!("task queue: {}", e)))?;
        info!("Store and queue reachable");

        let metrics = if config.metrics_listen_addr.is_some() {
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let reconciler = Arc::new(StateReconciler::new(
            deps.store.clone(),
            config.offline_threshold,
            metrics.clone(),
        ));
        let pool = ProbePool::new(
            deps.queue.clone(),
            TimedProbe::new(deps.probe_client.clone(), config.probe_timeout),
            reconciler,
            config.worker_concurrency,
            metrics.clone(),
        )
        .spawn();

        let dispatcher = Arc::new(DispatchBatcher::new(
            deps.queue.clone(),
            config.batch_size,
            config.retry_policy,
            metrics.clone(),
        ));
        let poller = Arc::new(DiscoveryPoller::new(
            deps.directory.clone(),
            dispatcher,
            config.discovery_filter.clone(),
            metrics.clone(),
        ));
        let reaper = Arc::new(Reaper::new(
            deps.store.clone(),
            config.retention_days,
            metrics.clone(),
        ));

        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(shutdown.child_token(), metrics.clone());
        scheduler.spawn(poller.clone(), config.poll_interval);
        scheduler.spawn(reaper, config.reap_interval);

        let metrics_handle = match (&metrics, &config.metrics_listen_addr) {
            (Some(registry), Some(listen_addr)) => {
                let server = MetricsServer::new(
                    AppState {
                        registry: registry.clone(),
                        store: deps.store.clone(),
                        queue: deps.queue.clone(),
                        poller: poller.clone(),
                    },
                    listen_addr.clone(),
                );
                let token = shutdown.child_token();
                Some(tokio::spawn(async move {
                    if let Err(e) = server.run(token).await {
                        warn!(error = %e, "Metrics server error");
                    }
                }))
            }
            _ => None,
        };

        info!("All tasks spawned, server running");

        Ok(RunningServer {
            config,
            queue: deps.queue,
            poller,
            scheduler,
            pool,
            shutdown,
            metrics_handle,
        })
    }
}

/// A started registry server
pub struct RunningServer {
    config: PipelineConfig,
    queue: Arc<dyn TaskQueue>,
    poller: Arc<DiscoveryPoller>,
    scheduler: Scheduler,
    pool: PoolHandle,
    shutdown: CancellationToken,
    metrics_handle: Option<JoinHandle<()>>,
}

impl RunningServer {
    /// The discovery poller, for observing the last successful discovery
    pub fn poller(&self) -> &Arc<DiscoveryPoller> {
        &self.poller
    }

    /// Stop everything. Returns true if every in-flight task finished before
    /// the drain deadline.
    pub async fn shutdown(self) -> bool {
        info!("Shutting down server registry");
        let deadline = Instant::now() + self.config.drain_timeout;

        self.scheduler.stop();

        let abandoned = self.queue.pending();
        self.queue.close();
        info!(pending = abandoned, "Task queue closed");

        let pool_drained = self
            .pool
            .drain(deadline.saturating_duration_since(Instant::now()))
            .await;
        let jobs_drained = self
            .scheduler
            .wait(deadline.saturating_duration_since(Instant::now()))
            .await;
        if !jobs_drained {
            warn!("Periodic jobs still running at the drain deadline");
        }

        self.shutdown.cancel();
        if let Some(handle) = self.metrics_handle {
            let _ = handle.await;
        }

        info!("Server registry stopped");
        pool_drained && jobs_drained
    }
}
