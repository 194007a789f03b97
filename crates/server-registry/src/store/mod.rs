//! Registry store contract and backends.
//!
//! The store is the only component that persists state. Every method is a
//! single atomic operation at the backend's transaction boundary; callers that
//! need read-modify-write semantics serialize per address themselves (see
//! [`crate::reconciler::AddressLocks`]).

use crate::config::{StoreBackend, StoreSettings};
use crate::types::{ServerRecord, Status, StatusCounts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use server_probe::Gamemode;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt record for {address}: {reason}")]
    Corrupt { address: String, reason: String },
}

/// Partial update of lifecycle fields.
///
/// `offline_since` is doubly optional: `None` leaves the column alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<Status>,
    pub seen_count: Option<u32>,
    pub missed_count: Option<u32>,
    pub offline_since: Option<Option<DateTime<Utc>>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.seen_count.is_none()
            && self.missed_count.is_none()
            && self.offline_since.is_none()
            && self.updated_at.is_none()
    }

    /// Apply the patch to an in-memory record.
    pub fn apply_to(&self, record: &mut ServerRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(seen) = self.seen_count {
            record.seen_count = seen;
        }
        if let Some(missed) = self.missed_count {
            record.missed_count = missed;
        }
        if let Some(offline_since) = self.offline_since {
            record.offline_since = offline_since;
        }
        if let Some(updated_at) = self.updated_at {
            record.updated_at = updated_at;
        }
    }
}

/// Read-side filters for online servers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnlineFilter {
    pub gamemode: Option<Gamemode>,
    /// Case-insensitive map prefix
    pub map_prefix: Option<String>,
    /// Case-insensitive name substring
    pub name_contains: Option<String>,
    pub hide_empty: bool,
    pub hide_full: bool,
    pub hide_password: bool,
    pub vac_only: bool,
}

impl OnlineFilter {
    /// Whether an online record passes the filter.
    pub fn matches(&self, record: &ServerRecord) -> bool {
        if let Some(mode) = self.gamemode {
            if record.gamemode != mode {
                return false;
            }
        }
        if let Some(prefix) = &self.map_prefix {
            if !record
                .map
                .to_ascii_lowercase()
                .starts_with(&prefix.to_ascii_lowercase())
            {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            if !record
                .name
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase())
            {
                return false;
            }
        }
        if self.hide_empty && record.players == 0 {
            return false;
        }
        if self.hide_full && record.is_full() {
            return false;
        }
        if self.hide_password && record.password {
            return false;
        }
        if self.vac_only && !record.vac {
            return false;
        }
        true
    }
}

/// Sort order for online queries. Ties break on address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    PlayersDesc,
    PlayersAsc,
    NameAsc,
    PingAsc,
}

/// Offset pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Durable keyed storage for server records
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Verify the backend is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Fetch one record
    async fn get(&self, address: SocketAddr) -> Result<Option<ServerRecord>, StoreError>;

    /// Insert or fully replace the mutable fields of a record.
    ///
    /// `first_seen` is kept from the existing row when there is one.
    async fn upsert(&self, record: &ServerRecord) -> Result<(), StoreError>;

    /// Atomically bump `seen_count` and zero `missed_count`.
    ///
    /// Returns the new count, or `None` if no record exists.
    async fn increment_seen(&self, address: SocketAddr) -> Result<Option<u32>, StoreError>;

    /// Apply a partial update. Returns false if no record exists.
    async fn update_fields(
        &self,
        address: SocketAddr,
        patch: &RecordPatch,
    ) -> Result<bool, StoreError>;

    /// Delete every record in `status` whose `offline_since` is at or before
    /// `cutoff`, in one operation. Returns the number deleted.
    async fn delete_where(
        &self,
        status: Status,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// One page of online records plus the total number matching.
    async fn query_online(
        &self,
        filter: &OnlineFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<(Vec<ServerRecord>, u64), StoreError>;

    /// Record counts per status
    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;
}

/// Open the configured backend.
pub fn open(settings: &StoreSettings) -> Result<Arc<dyn RegistryStore>, StoreError> {
    match settings.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory registry store; records are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            info!(path = %settings.path.display(), "Using sqlite registry store");
            Ok(Arc::new(SqliteStore::open(&settings.path)?))
        }
    }
}

/// Sort records in place the way [`SortOrder`] prescribes.
pub(crate) fn sort_records(records: &mut [ServerRecord], sort: SortOrder) {
    records.sort_by(|a, b| {
        let primary = match sort {
            SortOrder::PlayersDesc => b.players.cmp(&a.players),
            SortOrder::PlayersAsc => a.players.cmp(&b.players),
            SortOrder::NameAsc => a
                .name
                .to_ascii_lowercase()
                .cmp(&b.name.to_ascii_lowercase()),
            SortOrder::PingAsc => a.ping_ms.cmp(&b.ping_ms),
        };
        primary.then_with(|| a.address.to_string().cmp(&b.address.to_string()))
    });
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn record(addr: &str, status: Status) -> ServerRecord {
        let now = Utc::now();
        ServerRecord {
            address: addr.parse().unwrap(),
            query_port: 27015,
            steam_id: None,
            name: format!("server {}", addr),
            map: "de_dust2".to_string(),
            gamemode: Gamemode::Public,
            password: false,
            vac: true,
            version: Some("1.0".to_string()),
            players: 0,
            max_players: 10,
            bots: 0,
            ping_ms: 20,
            status,
            seen_count: if status == Status::Online { 1 } else { 0 },
            missed_count: if status == Status::Offline { 3 } else { 0 },
            first_seen: now,
            updated_at: now,
            offline_since: if status == Status::Offline { Some(now) } else { None },
        }
    }
}
