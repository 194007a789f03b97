//! Periodic single-flight jobs.

use crate::metrics::MetricsRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Work run on a fixed interval
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Run one cycle. Failures are handled and logged by the job itself.
    async fn run(&self);
}

/// Drives periodic jobs.
///
/// Each job ticks on its own interval starting immediately. A tick that fires
/// while the previous run of the same job is still going is skipped, never
/// queued. Runs are spawned so a slow run never delays the ticker.
pub struct Scheduler {
    tracker: TaskTracker,
    cancel: CancellationToken,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Scheduler {
    /// Create a new scheduler stopped by `cancel`
    pub fn new(cancel: CancellationToken, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel,
            metrics,
        }
    }

    /// Start ticking `job` every `period`
    pub fn spawn(&self, job: Arc<dyn Job>, period: Duration) {
        let tracker = self.tracker.clone();
        let cancel = self.cancel.clone();
        let metrics = self.metrics.clone();

        self.tracker.spawn(async move {
            let in_flight = Arc::new(AtomicBool::new(false));
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(job = job.name(), period = ?period, "Periodic job started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if in_flight.swap(true, Ordering::SeqCst) {
                    debug!(job = job.name(), "Previous run still in flight, skipping tick");
                    if let Some(ref m) = metrics {
                        m.record_tick_skipped(job.name());
                    }
                    continue;
                }

                let job = job.clone();
                let flight = FlightGuard(in_flight.clone());
                tracker.spawn(async move {
                    let _flight = flight;
                    job.run().await;
                });
            }

            info!(job = job.name(), "Periodic job stopped");
        });
    }

    /// Stop ticking. Runs already started are left to finish.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
    }

    /// Wait up to `deadline` for tickers and in-flight runs to finish.
    ///
    /// Returns false if the deadline passed first.
    pub async fn wait(&self, deadline: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(deadline, self.tracker.wait())
            .await
            .is_ok()
    }
}

/// Clears the in-flight flag when a run ends, including by panic
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
