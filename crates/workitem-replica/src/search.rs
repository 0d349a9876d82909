//! Query execution over the current index.
//!
//! 1. Look up matching ids in [`IndexManager::current_index`] (best first).
//! 2. Hydrate records from the replica, dropping ids it no longer holds.
//! 3. Stable-sort by state category so completed and removed work sinks.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use workitem_replica_core::models::{LocalRecord, MetadataMap};
use workitem_replica_core::search::sort_by_state;
use workitem_replica_core::store::ReplicaStore;

use crate::index_manager::IndexManager;

/// Records returned by the `recent-items` route.
pub const RECENT_LIMIT: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemsResponse {
    pub items: Vec<LocalRecord>,
}

pub async fn search(
    index: &IndexManager,
    replica: &dyn ReplicaStore,
    metadata: &MetadataMap,
    query: &str,
    limit: usize,
) -> Result<Vec<LocalRecord>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let current = index.current_index().await?;
    let ids = current.read().unwrap().search(query, limit)?;

    let mut found = replica.bulk_get(&ids).await?;
    let mut records: Vec<LocalRecord> = ids.iter().filter_map(|id| found.remove(id)).collect();
    sort_by_state(&mut records, metadata);

    tracing::debug!(query, hits = records.len(), "Search");
    Ok(records)
}

/// Most recently changed records, newest first.
pub async fn recent(replica: &dyn ReplicaStore) -> Result<Vec<LocalRecord>> {
    replica.recent(RECENT_LIMIT).await
}
