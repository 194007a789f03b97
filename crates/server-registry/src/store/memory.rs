//! In-process store backed by a concurrent map.

use super::{OnlineFilter, Page, RecordPatch, RegistryStore, SortOrder, StoreError, sort_records};
use crate::types::{ServerRecord, Status, StatusCounts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;

/// Non-durable store for single-node deployments and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<SocketAddr, ServerRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of every record, in address order
    pub fn snapshot(&self) -> Vec<ServerRecord> {
        let mut all: Vec<_> = self.records.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.address);
        all
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, address: SocketAddr) -> Result<Option<ServerRecord>, StoreError> {
        Ok(self.records.get(&address).map(|r| r.value().clone()))
    }

    async fn upsert(&self, record: &ServerRecord) -> Result<(), StoreError> {
        self.records
            .entry(record.address)
            .and_modify(|existing| {
                let first_seen = existing.first_seen;
                *existing = record.clone();
                existing.first_seen = first_seen;
            })
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn increment_seen(&self, address: SocketAddr) -> Result<Option<u32>, StoreError> {
        Ok(self.records.get_mut(&address).map(|mut r| {
            r.seen_count = r.seen_count.saturating_add(1);
            r.missed_count = 0;
            r.seen_count
        }))
    }

    async fn update_fields(
        &self,
        address: SocketAddr,
        patch: &RecordPatch,
    ) -> Result<bool, StoreError> {
        match self.records.get_mut(&address) {
            Some(mut record) => {
                patch.apply_to(&mut record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_where(
        &self,
        status: Status,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut deleted = 0u64;
        self.records.retain(|_, record| {
            let expired = record.status == status
                && record.offline_since.is_some_and(|since| since <= cutoff);
            if expired {
                deleted += 1;
            }
            !expired
        });
        Ok(deleted)
    }

    async fn query_online(
        &self,
        filter: &OnlineFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<(Vec<ServerRecord>, u64), StoreError> {
        let mut matching: Vec<ServerRecord> = self
            .records
            .iter()
            .filter(|e| e.value().status == Status::Online && filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        let total = matching.len() as u64;

        sort_records(&mut matching, sort);
        let records = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();

        Ok((records, total))
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for entry in self.records.iter() {
            match entry.value().status {
                Status::Online => counts.online += 1,
                Status::Offline => counts.offline += 1,
            }
        }
        Ok(counts)
    }
}
