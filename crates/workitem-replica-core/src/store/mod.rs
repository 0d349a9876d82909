//! Storage abstraction for the local replica.
//!
//! Three logical tables, each behind its own trait so components only see
//! what they own:
//!
//! | Trait | Owner | Contents |
//! |-------|-------|----------|
//! | [`ReplicaStore`] | sync orchestrator | [`LocalRecord`]s keyed by item id |
//! | [`SnapshotStore`] | index manager | opaque index snapshot chunks |
//! | [`MetadataStore`] | metadata manager | per-type [`MetadataEntry`] |
//!
//! Implementations must be `Send + Sync` and durable across restarts
//! (except [`memory::InMemoryStore`], which exists for tests).

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{ItemId, LocalRecord, MetadataEntry};

/// One key/value chunk of an exported index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,
}

/// Replica records keyed by item id.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`count`](ReplicaStore::count) | number of records (empty store ⇒ full sync) |
/// | [`get`](ReplicaStore::get) / [`bulk_get`](ReplicaStore::bulk_get) | lookup by id |
/// | [`bulk_upsert`](ReplicaStore::bulk_upsert) | write added/updated records |
/// | [`bulk_delete`](ReplicaStore::bulk_delete) | drop ids, reporting which existed |
/// | [`replace_all`](ReplicaStore::replace_all) | clear + write in one unit |
/// | [`all`](ReplicaStore::all) | full enumeration for index rebuilds |
/// | [`recent`](ReplicaStore::recent) | most recently changed records |
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    async fn count(&self) -> Result<usize>;

    async fn get(&self, id: ItemId) -> Result<Option<LocalRecord>>;

    /// Records for the ids that exist locally. Missing ids are absent from the map.
    async fn bulk_get(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, LocalRecord>>;

    async fn bulk_upsert(&self, records: &[LocalRecord]) -> Result<()>;

    /// Delete the given ids and return the subset that was present.
    async fn bulk_delete(&self, ids: &[ItemId]) -> Result<Vec<ItemId>>;

    /// Replace the entire contents atomically.
    async fn replace_all(&self, records: &[LocalRecord]) -> Result<()>;

    async fn all(&self) -> Result<Vec<LocalRecord>>;

    /// Up to `limit` records ordered by `changed_at` descending.
    async fn recent(&self, limit: usize) -> Result<Vec<LocalRecord>>;
}

/// Key/value side table holding the last exported index.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_snapshot(&self) -> Result<Vec<SnapshotEntry>>;

    /// Supersede the stored snapshot with `entries` in one unit.
    async fn replace_snapshot(&self, entries: &[SnapshotEntry]) -> Result<()>;

    async fn clear_snapshot(&self) -> Result<()>;
}

/// Persisted item type / state / icon map.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load_metadata(&self) -> Result<Vec<MetadataEntry>>;

    async fn put_metadata(&self, entry: &MetadataEntry) -> Result<()>;

    async fn clear_metadata(&self) -> Result<()>;
}
