//! Retention-based deletion of long-offline records.

use crate::metrics::MetricsRegistry;
use crate::scheduler::Job;
use crate::store::RegistryStore;
use crate::types::Status;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Deletes records that have been offline longer than the retention window
pub struct Reaper {
    store: Arc<dyn RegistryStore>,
    retention: ChronoDuration,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        retention_days: u32,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            store,
            retention: ChronoDuration::days(i64::from(retention_days)),
            metrics,
        }
    }

    /// Sweep at the current time
    pub async fn sweep(&self) -> Result<u64> {
        self.sweep_at(Utc::now()).await
    }

    /// Delete every offline record whose `offline_since` is at least the
    /// retention window before `now`, in one store operation.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - self.retention;

        let deleted = match self.store.delete_where(Status::Offline, cutoff).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(cutoff = %cutoff, error = %e, "Reaper sweep aborted");
                if let Some(ref m) = self.metrics {
                    m.record_error("reaper_store");
                }
                return Err(Error::reaper_store(e));
            }
        };

        info!(deleted, cutoff = %cutoff, "Reaper sweep finished");

        if let Some(ref m) = self.metrics {
            m.record_reaped(deleted);
            if let Ok(counts) = self.store.count_by_status().await {
                m.update_records_by_status(counts);
            }
        }

        Ok(deleted)
    }
}

#[async_trait]
impl Job for Reaper {
    fn name(&self) -> &'static str {
        "reaper"
    }

    async fn run(&self) {
        let _ = self.sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::test_support::record;

    #[tokio::test]
    async fn test_sweep_boundary_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let mut exactly = record("10.0.0.1:27015", Status::Offline);
        exactly.offline_since = Some(now - ChronoDuration::days(7));
        let mut almost = record("10.0.0.2:27015", Status::Offline);
        almost.offline_since = Some(now - ChronoDuration::days(7) + ChronoDuration::seconds(1));
        for r in [&exactly, &almost] {
            store.upsert(r).await.unwrap();
        }

        let reaper = Reaper::new(store.clone(), 7, None);
        assert_eq!(reaper.sweep_at(now).await.unwrap(), 1);
        assert!(store.get(exactly.address).await.unwrap().is_none());
        assert!(store.get(almost.address).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_never_touches_online() {
        let store = Arc::new(MemoryStore::new());
        let mut online = record("10.0.0.1:27015", Status::Online);
        online.first_seen = Utc::now() - ChronoDuration::days(365);
        store.upsert(&online).await.unwrap();

        let reaper = Reaper::new(store.clone(), 7, None);
        assert_eq!(reaper.sweep().await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }
}
