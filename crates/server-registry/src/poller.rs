//! Discovery poller.

use crate::directory::{DirectoryError, MasterDirectory};
use crate::dispatcher::{DispatchBatcher, DispatchSummary};
use crate::metrics::MetricsRegistry;
use crate::scheduler::Job;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Error, Result};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{info, warn};

/// Result of one successful discovery cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Deduplicated addresses returned by the directory
    pub addresses: BTreeSet<SocketAddr>,
    /// How they were dispatched
    pub dispatch: DispatchSummary,
}

/// Queries the master directory and feeds the dispatcher
pub struct DiscoveryPoller {
    directory: Arc<dyn MasterDirectory>,
    dispatcher: Arc<DispatchBatcher>,
    filter: String,
    /// Millis since the epoch, zero until the first success
    last_success_ms: AtomicI64,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl DiscoveryPoller {
    pub fn new(
        directory: Arc<dyn MasterDirectory>,
        dispatcher: Arc<DispatchBatcher>,
        filter: String,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            directory,
            dispatcher,
            filter,
            last_success_ms: AtomicI64::new(0),
            metrics,
        }
    }

    /// Run one discovery cycle.
    ///
    /// On failure nothing changes and the error is returned; the next
    /// scheduled tick is the retry.
    pub async fn poll(&self) -> Result<PollReport> {
        let addresses = match self.directory.list(&self.filter).await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(filter = %self.filter, error = %e, "Discovery failed");
                if let Some(ref m) = self.metrics {
                    m.record_discovery_failure();
                    m.record_error("directory_unavailable");
                }
                let DirectoryError::Unavailable(reason) = e;
                return Err(Error::directory(reason));
            }
        };

        info!(count = addresses.len(), "Discovered servers");

        let ordered: Vec<SocketAddr> = addresses.iter().copied().collect();
        let dispatch = self.dispatcher.dispatch(&ordered).await.map_err(|e| {
            warn!(error = %e, "Dispatch aborted");
            Error::other(format!("dispatch aborted: {}", e))
        })?;

        let now = Utc::now();
        self.last_success_ms
            .store(now.timestamp_millis(), Ordering::SeqCst);
        if let Some(ref m) = self.metrics {
            m.record_discovery_success(addresses.len(), now.timestamp());
        }

        Ok(PollReport {
            addresses,
            dispatch,
        })
    }

    /// Time of the last successful cycle
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

#[async_trait]
impl Job for DiscoveryPoller {
    fn name(&self) -> &'static str {
        "discovery"
    }

    /// A cycle stays in flight until its probe tasks are terminal, so ticks
    /// that fire while the queue drains are skipped by the scheduler.
    async fn run(&self) {
        // Errors are logged by poll
        if self.poll().await.is_ok() {
            let started = tokio::time::Instant::now();
            self.dispatcher.wait_drained().await;
            info!(elapsed = ?started.elapsed(), "Discovery cycle drained");
        }
    }
}
