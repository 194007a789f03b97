//! Integration tests for the state reconciler

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::Error;
use server_probe::Gamemode;
use server_registry::store::{OnlineFilter, Page, RecordPatch, SortOrder};
use server_registry::types::StatusCounts;
use server_registry::{
    MemoryStore, ProbeOutcome, RegistryStore, ServerCandidate, ServerRecord, SqliteStore,
    StateReconciler, Status, StoreError, Transition,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const THRESHOLD: u32 = 3;

fn addr() -> SocketAddr {
    "198.51.100.20:27015".parse().unwrap()
}

fn hit() -> ProbeOutcome {
    ProbeOutcome::Hit(ServerCandidate {
        address: addr(),
        query_port: 27015,
        steam_id: Some("90071992547409920".to_string()),
        name: "Surf Heaven".to_string(),
        map: "surf_kitsune".to_string(),
        gamemode: Gamemode::Surf,
        password: false,
        vac: true,
        version: Some("1.40.2.1".to_string()),
        players: 14,
        max_players: 32,
        bots: 2,
        ping_ms: 41,
    })
}

/// Current time at the millisecond precision the sqlite backend stores
fn now_ms() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
}

/// Both backends, so the state machine is checked against each
fn stores() -> Vec<(&'static str, Arc<dyn RegistryStore>)> {
    let memory: Arc<dyn RegistryStore> = Arc::new(MemoryStore::new());
    let sqlite: Arc<dyn RegistryStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    vec![("memory", memory), ("sqlite", sqlite)]
}

fn assert_invariants(record: &ServerRecord) {
    assert_eq!(
        record.seen_count > 0,
        record.missed_count == 0,
        "seen/missed exclusivity violated: {:?}",
        record
    );
    assert_eq!(
        record.status == Status::Offline,
        record.offline_since.is_some(),
        "offline_since out of sync with status: {:?}",
        record
    );
}

async fn step(
    reconciler: &StateReconciler,
    store: &Arc<dyn RegistryStore>,
    outcome: ProbeOutcome,
    now: DateTime<Utc>,
) -> (Transition, Option<ServerRecord>) {
    let transition = reconciler.reconcile_at(addr(), outcome, now).await.unwrap();
    let record = store.get(addr()).await.unwrap();
    if let Some(ref r) = record {
        assert_invariants(r);
    }
    (transition, record)
}

#[tokio::test]
async fn test_miss_on_unknown_creates_nothing() {
    for (backend, store) in stores() {
        let reconciler = StateReconciler::new(store.clone(), THRESHOLD, None);
        let (transition, record) = step(&reconciler, &store, ProbeOutcome::Miss, now_ms()).await;
        assert_eq!(transition, Transition::Ignored, "{}", backend);
        assert!(record.is_none(), "{}", backend);
    }
}

#[tokio::test]
async fn test_exactly_threshold_misses_take_server_offline() {
    for (backend, store) in stores() {
        let reconciler = StateReconciler::new(store.clone(), THRESHOLD, None);
        let t0 = now_ms();
        step(&reconciler, &store, hit(), t0).await;

        for i in 1..THRESHOLD {
            let (transition, record) = step(
                &reconciler,
                &store,
                ProbeOutcome::Miss,
                t0 + ChronoDuration::minutes(i as i64),
            )
            .await;
            let record = record.unwrap();
            assert_eq!(transition, Transition::MissRecorded, "{}", backend);
            assert_eq!(record.status, Status::Online, "{}", backend);
            assert_eq!(record.missed_count, i, "{}", backend);
            assert_eq!(record.seen_count, 0, "{}", backend);
        }

        let went_offline_at = t0 + ChronoDuration::minutes(THRESHOLD as i64);
        let (transition, record) =
            step(&reconciler, &store, ProbeOutcome::Miss, went_offline_at).await;
        let record = record.unwrap();
        assert_eq!(transition, Transition::WentOffline, "{}", backend);
        assert_eq!(record.status, Status::Offline, "{}", backend);
        assert_eq!(record.offline_since, Some(went_offline_at), "{}", backend);
    }
}

#[tokio::test]
async fn test_hit_below_threshold_resets_misses() {
    for (backend, store) in stores() {
        let reconciler = StateReconciler::new(store.clone(), THRESHOLD, None);
        let t0 = now_ms();
        step(&reconciler, &store, hit(), t0).await;
        for _ in 1..THRESHOLD {
            step(&reconciler, &store, ProbeOutcome::Miss, t0).await;
        }

        let (transition, record) = step(&reconciler, &store, hit(), t0).await;
        let record = record.unwrap();
        assert_eq!(transition, Transition::Refreshed, "{}", backend);
        assert_eq!(record.status, Status::Online, "{}", backend);
        assert_eq!((record.seen_count, record.missed_count), (1, 0), "{}", backend);
    }
}

#[tokio::test]
async fn test_misses_while_offline_keep_offline_since() {
    for (backend, store) in stores() {
        let reconciler = StateReconciler::new(store.clone(), THRESHOLD, None);
        let t0 = now_ms();
        step(&reconciler, &store, hit(), t0).await;
        for _ in 0..THRESHOLD {
            step(&reconciler, &store, ProbeOutcome::Miss, t0).await;
        }
        let offline_since = store.get(addr()).await.unwrap().unwrap().offline_since;

        for day in 1..=5 {
            let (transition, record) = step(
                &reconciler,
                &store,
                ProbeOutcome::Miss,
                t0 + ChronoDuration::days(day),
            )
            .await;
            let record = record.unwrap();
            assert_eq!(transition, Transition::StillOffline, "{}", backend);
            assert_eq!(record.offline_since, offline_since, "{}", backend);
            assert_eq!(record.missed_count, THRESHOLD + day as u32, "{}", backend);
        }
    }
}

#[tokio::test]
async fn test_hit_on_offline_recovers() {
    for (backend, store) in stores() {
        let reconciler = StateReconciler::new(store.clone(), THRESHOLD, None);
        let t0 = now_ms();
        step(&reconciler, &store, hit(), t0).await;
        for _ in 0..THRESHOLD + 2 {
            step(&reconciler, &store, ProbeOutcome::Miss, t0).await;
        }

        let t1 = t0 + ChronoDuration::hours(6);
        let (transition, record) = step(&reconciler, &store, hit(), t1).await;
        let record = record.unwrap();
        assert_eq!(transition, Transition::Recovered, "{}", backend);
        assert_eq!(record.status, Status::Online, "{}", backend);
        assert_eq!(record.offline_since, None, "{}", backend);
        assert_eq!((record.seen_count, record.missed_count), (1, 0), "{}", backend);
        assert_eq!(record.updated_at, t1, "{}", backend);
        // Flapping never resets first_seen
        assert_eq!(record.first_seen, t0, "{}", backend);
    }
}

#[tokio::test]
async fn test_concurrent_hits_do_not_lose_updates() {
    for (backend, store) in stores() {
        let reconciler = Arc::new(StateReconciler::new(store.clone(), THRESHOLD, None));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let reconciler = reconciler.clone();
            handles.push(tokio::spawn(async move {
                reconciler.reconcile(addr(), hit()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get(addr()).await.unwrap().unwrap();
        assert_eq!(record.seen_count, 50, "{}", backend);
    }
}

/// Delegates to a memory store, failing writes while `broken` is set
struct FlakyStore {
    inner: MemoryStore,
    broken: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk I/O error".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for FlakyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn get(&self, address: SocketAddr) -> Result<Option<ServerRecord>, StoreError> {
        self.inner.get(address).await
    }

    async fn upsert(&self, record: &ServerRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.upsert(record).await
    }

    async fn increment_seen(&self, address: SocketAddr) -> Result<Option<u32>, StoreError> {
        self.check()?;
        self.inner.increment_seen(address).await
    }

    async fn update_fields(
        &self,
        address: SocketAddr,
        patch: &RecordPatch,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.update_fields(address, patch).await
    }

    async fn delete_where(&self, status: Status, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.delete_where(status, cutoff).await
    }

    async fn query_online(
        &self,
        filter: &OnlineFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<(Vec<ServerRecord>, u64), StoreError> {
        self.inner.query_online(filter, sort, page).await
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        self.inner.count_by_status().await
    }
}

#[tokio::test]
async fn test_store_error_leaves_record_unchanged() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        broken: AtomicBool::new(false),
    });
    let reconciler = StateReconciler::new(store.clone(), THRESHOLD, None);

    reconciler.reconcile(addr(), hit()).await.unwrap();
    let before = store.get(addr()).await.unwrap().unwrap();

    store.broken.store(true, Ordering::SeqCst);
    let err = reconciler
        .reconcile(addr(), ProbeOutcome::Miss)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReconcileStore(_)));
    assert!(!err.is_fatal());

    assert_eq!(store.get(addr()).await.unwrap().unwrap(), before);
}
