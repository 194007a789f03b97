//! State reconciliation.
//!
//! Applies probe outcomes to the registry store following the online/offline
//! state machine:
//!
//! | Current | Event | Next            | Effect                                          |
//! |---------|-------|-----------------|-------------------------------------------------|
//! | unknown | Hit   | online          | create, seen=1, missed=0, first_seen=now        |
//! | unknown | Miss  | unknown         | nothing                                         |
//! | online  | Hit   | online          | seen+=1, missed=0, refresh, updated_at=now      |
//! | online  | Miss  | online/offline  | missed+=1, seen=0, offline at the threshold     |
//! | offline | Hit   | online          | seen=1, missed=0, offline_since cleared, refresh|
//! | offline | Miss  | offline         | missed+=1, offline_since untouched              |
//!
//! Every reconciliation reads the current record, plans the next one with
//! [`plan`], and performs a single store write. Reconciliations for the same
//! address are serialized by [`AddressLocks`].

use crate::metrics::MetricsRegistry;
use crate::store::{RecordPatch, RegistryStore};
use crate::types::{ServerCandidate, ServerRecord, Status};
use chrono::{DateTime, Utc};
use common::{Error, Result};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Terminal result of probing one address
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The server answered
    Hit(ServerCandidate),
    /// Every attempt failed
    Miss,
}

/// What a reconciliation did to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// unknown → online
    Created,
    /// online → online on a hit
    Refreshed,
    /// offline → online
    Recovered,
    /// online → online on a miss below the threshold
    MissRecorded,
    /// online → offline
    WentOffline,
    /// offline → offline
    StillOffline,
    /// unknown → unknown
    Ignored,
}

impl Transition {
    /// (from, to) state labels
    pub fn states(&self) -> (&'static str, &'static str) {
        match self {
            Transition::Created => ("unknown", "online"),
            Transition::Refreshed | Transition::MissRecorded => ("online", "online"),
            Transition::Recovered => ("offline", "online"),
            Transition::WentOffline => ("online", "offline"),
            Transition::StillOffline => ("offline", "offline"),
            Transition::Ignored => ("unknown", "unknown"),
        }
    }
}

/// Store write planned for one reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Write the full record
    Upsert(ServerRecord),
    /// Update lifecycle fields only
    Patch(RecordPatch),
    /// Leave the store alone
    Nothing,
}

/// Decide the next state of an address.
///
/// Pure function of the current record, the outcome, the offline threshold and
/// the clock.
pub fn plan(
    current: Option<&ServerRecord>,
    outcome: ProbeOutcome,
    offline_threshold: u32,
    now: DateTime<Utc>,
) -> (Transition, Write) {
    match (current, outcome) {
        (None, ProbeOutcome::Hit(candidate)) => (
            Transition::Created,
            Write::Upsert(ServerRecord::from_candidate(candidate, now)),
        ),
        (None, ProbeOutcome::Miss) => (Transition::Ignored, Write::Nothing),
        (Some(record), ProbeOutcome::Hit(candidate)) => {
            let mut next = record.clone();
            next.refresh(candidate);
            next.missed_count = 0;
            next.updated_at = now;

            let transition = match record.status {
                Status::Online => {
                    next.seen_count = record.seen_count.saturating_add(1);
                    Transition::Refreshed
                }
                Status::Offline => {
                    next.status = Status::Online;
                    next.seen_count = 1;
                    next.offline_since = None;
                    Transition::Recovered
                }
            };
            (transition, Write::Upsert(next))
        }
        (Some(record), ProbeOutcome::Miss) => {
            let missed = record.missed_count.saturating_add(1);
            let mut patch = RecordPatch {
                seen_count: Some(0),
                missed_count: Some(missed),
                ..Default::default()
            };

            let transition = match record.status {
                Status::Online if missed >= offline_threshold => {
                    patch.status = Some(Status::Offline);
                    patch.offline_since = Some(Some(now));
                    Transition::WentOffline
                }
                Status::Online => Transition::MissRecorded,
                Status::Offline => Transition::StillOffline,
            };
            (transition, Write::Patch(patch))
        }
    }
}

/// Per-address mutual exclusion.
///
/// Entries are created on demand and removed when the last holder releases
/// them, so the map only holds addresses currently being reconciled.
#[derive(Debug, Default)]
pub struct AddressLocks {
    locks: DashMap<SocketAddr, Arc<Mutex<()>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `address`.
    pub async fn lock(&self, address: SocketAddr) -> AddressGuard<'_> {
        let mutex = self.locks.entry(address).or_default().clone();
        let guard = mutex.lock_owned().await;
        AddressGuard {
            locks: self,
            address,
            guard: Some(guard),
        }
    }

    /// Addresses with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held lock on one address
pub struct AddressGuard<'a> {
    locks: &'a AddressLocks,
    address: SocketAddr,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AddressGuard<'_> {
    fn drop(&mut self) {
        // Release first so the strong count reflects only waiters
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.address, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Applies probe outcomes to the store
pub struct StateReconciler {
    store: Arc<dyn RegistryStore>,
    offline_threshold: u32,
    locks: AddressLocks,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl StateReconciler {
    /// Create a new reconciler. A threshold of zero is treated as one.
    pub fn new(
        store: Arc<dyn RegistryStore>,
        offline_threshold: u32,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            store,
            offline_threshold: offline_threshold.max(1),
            locks: AddressLocks::new(),
            metrics,
        }
    }

    pub fn offline_threshold(&self) -> u32 {
        self.offline_threshold
    }

    /// Reconcile an outcome at the current time
    pub async fn reconcile(&self, address: SocketAddr, outcome: ProbeOutcome) -> Result<Transition> {
        self.reconcile_at(address, outcome, Utc::now()).await
    }

    /// Reconcile an outcome at `now`.
    ///
    /// On a store error the record is left as it was and the error is
    /// returned as [`Error::ReconcileStore`].
    pub async fn reconcile_at(
        &self,
        address: SocketAddr,
        outcome: ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let _guard = self.locks.lock(address).await;

        let result = self.apply(address, outcome, now).await;
        match &result {
            Ok(transition) => {
                if let Some(ref m) = self.metrics {
                    m.record_transition(*transition);
                }
            }
            Err(e) => {
                warn!(address = %address, error = %e, "Reconciliation failed, record unchanged");
                if let Some(ref m) = self.metrics {
                    m.record_error(e.kind());
                }
            }
        }
        result
    }

    async fn apply(
        &self,
        address: SocketAddr,
        outcome: ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let current = self
            .store
            .get(address)
            .await
            .map_err(|e| Error::reconcile_store(format!("{}: {}", address, e)))?;

        let (transition, write) = plan(current.as_ref(), outcome, self.offline_threshold, now);

        match write {
            Write::Upsert(record) => self.store.upsert(&record).await,
            Write::Patch(patch) => self.store.update_fields(address, &patch).await.map(|_| ()),
            Write::Nothing => Ok(()),
        }
        .map_err(|e| Error::reconcile_store(format!("{}: {}", address, e)))?;

        match transition {
            Transition::Created => info!(address = %address, "Server discovered"),
            Transition::Recovered => info!(address = %address, "Server back online"),
            Transition::WentOffline => {
                warn!(address = %address, threshold = self.offline_threshold, "Server went offline")
            }
            other => debug!(address = %address, transition = ?other, "Reconciled"),
        }

        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::test_support::record;
    use chrono::Duration as ChronoDuration;
    use server_probe::Gamemode;

    fn candidate(addr: &str) -> ServerCandidate {
        ServerCandidate {
            address: addr.parse().unwrap(),
            query_port: 27015,
            steam_id: None,
            name: "Surf Heaven".to_string(),
            map: "surf_kitsune".to_string(),
            gamemode: Gamemode::Surf,
            password: false,
            vac: true,
            version: None,
            players: 12,
            max_players: 24,
            bots: 0,
            ping_ms: 30,
        }
    }

    #[test]
    fn test_plan_unknown_miss_is_noop() {
        let (transition, write) = plan(None, ProbeOutcome::Miss, 3, Utc::now());
        assert_eq!(transition, Transition::Ignored);
        assert_eq!(write, Write::Nothing);
    }

    #[test]
    fn test_plan_unknown_hit_creates() {
        let now = Utc::now();
        let (transition, write) = plan(
            None,
            ProbeOutcome::Hit(candidate("10.0.0.1:27015")),
            3,
            now,
        );
        assert_eq!(transition, Transition::Created);
        let Write::Upsert(rec) = write else {
            panic!("expected upsert");
        };
        assert_eq!(rec.status, Status::Online);
        assert_eq!((rec.seen_count, rec.missed_count), (1, 0));
        assert_eq!(rec.first_seen, now);
    }

    #[test]
    fn test_plan_online_miss_below_threshold() {
        let rec = record("10.0.0.1:27015", Status::Online);
        let (transition, write) = plan(Some(&rec), ProbeOutcome::Miss, 3, Utc::now());
        assert_eq!(transition, Transition::MissRecorded);
        assert_eq!(
            write,
            Write::Patch(RecordPatch {
                seen_count: Some(0),
                missed_count: Some(1),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_plan_online_miss_at_threshold() {
        let now = Utc::now();
        let mut rec = record("10.0.0.1:27015", Status::Online);
        rec.seen_count = 0;
        rec.missed_count = 2;

        let (transition, write) = plan(Some(&rec), ProbeOutcome::Miss, 3, now);
        assert_eq!(transition, Transition::WentOffline);
        let Write::Patch(patch) = write else {
            panic!("expected patch");
        };
        assert_eq!(patch.status, Some(Status::Offline));
        assert_eq!(patch.offline_since, Some(Some(now)));
        assert_eq!(patch.missed_count, Some(3));
    }

    #[test]
    fn test_plan_offline_miss_keeps_offline_since() {
        let rec = record("10.0.0.1:27015", Status::Offline);
        let (transition, write) = plan(Some(&rec), ProbeOutcome::Miss, 3, Utc::now());
        assert_eq!(transition, Transition::StillOffline);
        let Write::Patch(patch) = write else {
            panic!("expected patch");
        };
        assert_eq!(patch.offline_since, None);
        assert_eq!(patch.status, None);
        assert_eq!(patch.missed_count, Some(4));
    }

    #[test]
    fn test_plan_offline_hit_recovers() {
        let rec = record("10.0.0.1:27015", Status::Offline);
        let now = rec.first_seen + ChronoDuration::hours(2);
        let (transition, write) = plan(
            Some(&rec),
            ProbeOutcome::Hit(candidate("10.0.0.1:27015")),
            3,
            now,
        );
        assert_eq!(transition, Transition::Recovered);
        let Write::Upsert(next) = write else {
            panic!("expected upsert");
        };
        assert_eq!(next.status, Status::Online);
        assert_eq!((next.seen_count, next.missed_count), (1, 0));
        assert_eq!(next.offline_since, None);
        assert_eq!(next.first_seen, rec.first_seen);
        assert_eq!(next.updated_at, now);
    }

    #[tokio::test]
    async fn test_address_locks_are_released() {
        let locks = AddressLocks::new();
        let addr: SocketAddr = "10.0.0.1:27015".parse().unwrap();
        {
            let _guard = locks.lock(addr).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_address_locks_serialize_same_address() {
        let locks = Arc::new(AddressLocks::new());
        let addr: SocketAddr = "10.0.0.1:27015".parse().unwrap();

        let guard = locks.lock(addr).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(addr).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_replayed_hit() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = StateReconciler::new(store.clone(), 3, None);
        let addr: SocketAddr = "10.0.0.1:27015".parse().unwrap();
        let t0 = Utc::now();

        reconciler
            .reconcile_at(addr, ProbeOutcome::Hit(candidate("10.0.0.1:27015")), t0)
            .await
            .unwrap();
        let first = store.get(addr).await.unwrap().unwrap();

        let t1 = t0 + ChronoDuration::minutes(5);
        let transition = reconciler
            .reconcile_at(addr, ProbeOutcome::Hit(candidate("10.0.0.1:27015")), t1)
            .await
            .unwrap();
        assert_eq!(transition, Transition::Refreshed);

        let second = store.get(addr).await.unwrap().unwrap();
        assert_eq!(second.seen_count, 2);
        assert_eq!(second.updated_at, t1);
        assert_eq!(
            ServerRecord {
                seen_count: first.seen_count,
                updated_at: first.updated_at,
                ..second
            },
            first
        );
    }
}
