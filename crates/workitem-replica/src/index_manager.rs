//! Search index lifecycle.
//!
//! Two index instances, one logical "current index":
//!
//! | Instance | Source | Available |
//! |----------|--------|-----------|
//! | warm | persisted snapshot chunks | on first access after start |
//! | fresh | full scan of the replica | after the first [`IndexManager::build_index`] |
//!
//! [`IndexManager::current_index`] returns the fresh instance once one has
//! been activated, otherwise it restores (once) and returns the warm one.
//! Activation is a single pointer replacement, so a reader holds either one
//! generation or the other.
//!
//! A build persists its snapshot **before** activating the new instance,
//! and only when every planned export chunk arrived. Incremental updates
//! that arrive before the first build completes are queued and applied
//! right after activation. A queued update that fails to apply stays
//! queued, ahead of anything newer.

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};

use workitem_replica_core::index::FuzzyIndex;
use workitem_replica_core::models::{IndexedItem, ItemId, SyncSummary};
use workitem_replica_core::store::{ReplicaStore, SnapshotStore};

use crate::events::{topic, Emitter};
use crate::export::{await_export, spawn_export, ExportBuffer, ExportOutcome, ExportTiming};

/// A searchable index generation.
pub type SharedIndex = Arc<RwLock<FuzzyIndex>>;

/// Stage callbacks reported during [`IndexManager::build_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Indexing { count: usize, total: usize },
    Saving,
}

/// Result of a [`IndexManager::build_index`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new generation was activated.
    Built { items: usize, persisted: bool },
    /// Another build was already running.
    Skipped,
}

/// Result of a [`IndexManager::update_index`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Held until the first build activates.
    Queued,
}

#[derive(Default)]
struct UpdateGate {
    built: bool,
    queued: Vec<SyncSummary>,
}

pub struct IndexManager {
    replica: Arc<dyn ReplicaStore>,
    snapshots: Arc<dyn SnapshotStore>,
    emitter: Arc<dyn Emitter>,
    timing: ExportTiming,
    warm: OnceCell<SharedIndex>,
    fresh: RwLock<Option<SharedIndex>>,
    building: Mutex<()>,
    gate: Mutex<UpdateGate>,
    rev: AtomicU64,
}

impl IndexManager {
    pub fn new(
        replica: Arc<dyn ReplicaStore>,
        snapshots: Arc<dyn SnapshotStore>,
        emitter: Arc<dyn Emitter>,
        timing: ExportTiming,
    ) -> Self {
        Self {
            replica,
            snapshots,
            emitter,
            timing,
            warm: OnceCell::new(),
            fresh: RwLock::new(None),
            building: Mutex::new(()),
            gate: Mutex::new(UpdateGate::default()),
            rev: AtomicU64::new(0),
        }
    }

    /// Current change revision. Opaque; only compared for inequality.
    pub fn rev(&self) -> u64 {
        self.rev.load(Ordering::SeqCst)
    }

    /// True once a fresh build has been activated in this process.
    pub fn is_built(&self) -> bool {
        self.fresh.read().unwrap().is_some()
    }

    /// The fresh index if one is active, else the restored warm index.
    pub async fn current_index(&self) -> Result<SharedIndex> {
        if let Some(fresh) = self.fresh.read().unwrap().clone() {
            return Ok(fresh);
        }
        let warm = self
            .warm
            .get_or_try_init(|| async {
                let index = self.restore().await?;
                Ok::<_, anyhow::Error>(Arc::new(RwLock::new(index)))
            })
            .await?;
        Ok(warm.clone())
    }

    async fn restore(&self) -> Result<FuzzyIndex> {
        let started = Instant::now();
        let entries = match self.snapshots.load_snapshot().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to load index snapshot: {:#}", e);
                Vec::new()
            }
        };

        let index = if entries.is_empty() {
            FuzzyIndex::new()?
        } else {
            match FuzzyIndex::import(&entries) {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!("Discarding index snapshot: {:#}", e);
                    FuzzyIndex::new()?
                }
            }
        };

        tracing::info!(
            keys = entries.len(),
            items = index.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Restored index snapshot"
        );
        self.bump();
        Ok(index)
    }

    /// Rebuild from the whole replica, persist, then activate.
    ///
    /// A request arriving while another build runs is ignored.
    pub async fn build_index(
        &self,
        on_stage: &(dyn Fn(BuildStage) + Send + Sync),
    ) -> Result<BuildOutcome> {
        let Ok(_building) = self.building.try_lock() else {
            tracing::info!("Index build already in flight; ignoring request");
            return Ok(BuildOutcome::Skipped);
        };

        let started = Instant::now();
        let records = self.replica.all().await?;
        let total = records.len();

        let mut index = FuzzyIndex::new()?;
        for (i, record) in records.iter().enumerate() {
            index.add(&IndexedItem::from(record))?;
            if (i + 1) % 1000 == 0 || i + 1 == total {
                on_stage(BuildStage::Indexing {
                    count: i + 1,
                    total,
                });
            }
        }
        index.commit()?;
        let fresh: SharedIndex = Arc::new(RwLock::new(index));

        on_stage(BuildStage::Saving);
        let persisted = self.persist(fresh.clone()).await?;

        *self.fresh.write().unwrap() = Some(fresh);
        self.bump();

        tracing::info!(
            items = total,
            persisted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built index"
        );

        let mut gate = self.gate.lock().await;
        gate.built = true;
        let applied = self.drain(&mut gate).await?;
        if applied > 0 {
            tracing::info!(count = applied, "Applied queued index updates");
        }

        Ok(BuildOutcome::Built {
            items: total,
            persisted,
        })
    }

    async fn persist(&self, index: SharedIndex) -> Result<bool> {
        let buffer = Arc::new(ExportBuffer::new());
        let planned = spawn_export(index, buffer.clone())?;

        if await_export(&buffer, &planned, self.timing).await == ExportOutcome::TimedOut {
            tracing::warn!(
                planned = planned.len(),
                collected = buffer.len(),
                "Index export incomplete; keeping previous snapshot"
            );
            return Ok(false);
        }

        let entries = buffer.take();
        self.snapshots.replace_snapshot(&entries).await?;
        tracing::info!(keys = entries.len(), "Exported index snapshot");
        Ok(true)
    }

    /// Apply added/updated/deleted ids to the fresh index.
    ///
    /// Before the first build this queues `summary` instead.
    pub async fn update_index(&self, summary: &SyncSummary) -> Result<UpdateOutcome> {
        let mut gate = self.gate.lock().await;
        gate.queued.push(summary.clone());
        if !gate.built {
            tracing::debug!("Index not built yet; queueing update");
            return Ok(UpdateOutcome::Queued);
        }
        self.drain(&mut gate).await?;
        Ok(UpdateOutcome::Applied)
    }

    /// Apply queued summaries oldest first. A failing summary and everything
    /// after it stay queued.
    async fn drain(&self, gate: &mut UpdateGate) -> Result<usize> {
        let mut applied = 0;
        while let Some(summary) = gate.queued.first() {
            if let Err(e) = self.apply(summary).await {
                tracing::warn!(
                    pending = gate.queued.len(),
                    "Queued index update failed: {:#}",
                    e
                );
                return Err(e);
            }
            gate.queued.remove(0);
            applied += 1;
        }
        Ok(applied)
    }

    /// Summaries waiting to reach the index.
    pub async fn pending_updates(&self) -> usize {
        self.gate.lock().await.queued.len()
    }

    async fn apply(&self, summary: &SyncSummary) -> Result<()> {
        let Some(fresh) = self.fresh.read().unwrap().clone() else {
            return Ok(());
        };

        let upserted: Vec<ItemId> = summary
            .added_ids
            .iter()
            .chain(summary.updated_ids.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let records = self.replica.bulk_get(&upserted).await?;

        {
            let mut index = fresh.write().unwrap();
            for id in &summary.deleted_ids {
                index.remove(*id);
            }
            for id in &summary.added_ids {
                if let Some(record) = records.get(id) {
                    index.add(&IndexedItem::from(record))?;
                }
            }
            for id in &summary.updated_ids {
                if let Some(record) = records.get(id) {
                    index.update(&IndexedItem::from(record))?;
                }
            }
            index.commit()?;
        }

        tracing::debug!(
            added = summary.added_ids.len(),
            updated = summary.updated_ids.len(),
            deleted = summary.deleted_ids.len(),
            "Updated index"
        );
        self.bump();
        Ok(())
    }

    /// Clear the persisted snapshot. Active in-memory instances are untouched.
    pub async fn reset(&self) -> Result<()> {
        self.snapshots.clear_snapshot().await
    }

    fn bump(&self) {
        let rev = self.rev.fetch_add(1, Ordering::SeqCst) + 1;
        self.emitter
            .emit(topic::INDEX_CHANGED, serde_json::json!({ "rev": rev }));
    }
}
