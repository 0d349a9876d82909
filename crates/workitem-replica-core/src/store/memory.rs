//! In-memory store implementation for testing.
//!
//! Uses `BTreeMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Counts write calls so tests can assert that a rejected page wrote nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ItemId, LocalRecord, MetadataEntry};

use super::{MetadataStore, ReplicaStore, SnapshotEntry, SnapshotStore};

/// In-memory replica, snapshot table, and metadata table.
pub struct InMemoryStore {
    records: RwLock<BTreeMap<ItemId, LocalRecord>>,
    snapshot: RwLock<Vec<SnapshotEntry>>,
    metadata: RwLock<BTreeMap<String, MetadataEntry>>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            snapshot: RwLock::new(Vec::new()),
            metadata: RwLock::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Seed the replica without counting as a write.
    pub fn with_records(records: impl IntoIterator<Item = LocalRecord>) -> Self {
        let store = Self::new();
        store
            .records
            .write()
            .unwrap()
            .extend(records.into_iter().map(|r| (r.id, r)));
        store
    }

    /// Number of replica write calls (upsert, delete, replace) so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicaStore for InMemoryStore {
    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().unwrap().len())
    }

    async fn get(&self, id: ItemId) -> Result<Option<LocalRecord>> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    async fn bulk_get(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, LocalRecord>> {
        let records = self.records.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| records.get(id).map(|r| (*id, r.clone())))
            .collect())
    }

    async fn bulk_upsert(&self, records: &[LocalRecord]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.records.write().unwrap();
        for record in records {
            stored.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn bulk_delete(&self, ids: &[ItemId]) -> Result<Vec<ItemId>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.records.write().unwrap();
        Ok(ids
            .iter()
            .filter(|id| stored.remove(*id).is_some())
            .copied()
            .collect())
    }

    async fn replace_all(&self, records: &[LocalRecord]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let fresh: BTreeMap<_, _> = records.iter().map(|r| (r.id, r.clone())).collect();
        *self.records.write().unwrap() = fresh;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<LocalRecord>> {
        Ok(self.records.read().unwrap().values().cloned().collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LocalRecord>> {
        let mut records: Vec<LocalRecord> = self.records.read().unwrap().values().cloned().collect();
        records.sort_by(|a, b| b.changed_at.cmp(&a.changed_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn load_snapshot(&self) -> Result<Vec<SnapshotEntry>> {
        Ok(self.snapshot.read().unwrap().clone())
    }

    async fn replace_snapshot(&self, entries: &[SnapshotEntry]) -> Result<()> {
        *self.snapshot.write().unwrap() = entries.to_vec();
        Ok(())
    }

    async fn clear_snapshot(&self) -> Result<()> {
        self.snapshot.write().unwrap().clear();
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn load_metadata(&self) -> Result<Vec<MetadataEntry>> {
        Ok(self.metadata.read().unwrap().values().cloned().collect())
    }

    async fn put_metadata(&self, entry: &MetadataEntry) -> Result<()> {
        self.metadata
            .write()
            .unwrap()
            .insert(entry.type_name.clone(), entry.clone());
        Ok(())
    }

    async fn clear_metadata(&self) -> Result<()> {
        self.metadata.write().unwrap().clear();
        Ok(())
    }
}
