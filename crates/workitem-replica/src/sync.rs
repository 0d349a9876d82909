//! Sync orchestrator.
//!
//! Brings the replica up to date with the remote and then applies the
//! result to the search index. One attempt runs at a time; a request that
//! arrives while another attempt is in flight is skipped.
//!
//! # Strategy
//!
//! ```text
//! replica empty? ── yes ──▶ full sync (replace everything)
//!       │
//!       no
//!       ▼
//! peek: newest active id drifted, or newest deleted id still local?
//!       │ no ─▶ no-op (empty summary)
//!       ▼ yes
//! incremental sync: page newest-first, stop after the first page that
//! holds an already-synced id, write the changed pages, then apply deletions
//! ```
//!
//! Full sync fetches all pages concurrently. Incremental sync pages
//! sequentially because its early exit assumes the listing is ordered by
//! change date, newest first. Each fetched page is checked against that
//! assumption; a violation disables the early exit for the rest of the
//! attempt.
//!
//! Changed records are written only after every visited page classified
//! consistent, so an aborted attempt leaves the replica untouched. After
//! any failed attempt the next one skips the peek and walks the listing.
//!
//! # Index policy
//!
//! | Request | Summary | Index action |
//! |---------|---------|--------------|
//! | `rebuild_index` | any | full rebuild |
//! | default | dirty | incremental update |
//! | default | empty | none |
//!
//! Failures never escape: they are reported as an `error` update on
//! `sync-progress` and the attempt yields an empty summary.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use workitem_replica_core::diff::{classify, split_pages};
use workitem_replica_core::models::{ItemId, LocalRecord, RemoteItem, SyncSummary, ALL_FIELDS};
use workitem_replica_core::remote::RemoteSource;
use workitem_replica_core::store::ReplicaStore;

use crate::events::{topic, Emitter};
use crate::index_manager::{BuildStage, IndexManager};
use crate::progress::{to_percent, SyncUpdate};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The replica holds a newer revision than the remote for these ids.
    #[error("Data corrupted (local revision ahead of remote for {ids:?})")]
    Inconsistent { ids: Vec<ItemId> },
}

/// Payload of the `sync` route.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub rebuild_index: bool,
}

pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteSource>,
    replica: Arc<dyn ReplicaStore>,
    index: Arc<IndexManager>,
    emitter: Arc<dyn Emitter>,
    page_size: usize,
    in_flight: Mutex<()>,
    /// Set by a failed attempt; the next attempt may not trust the peek.
    resync: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        replica: Arc<dyn ReplicaStore>,
        index: Arc<IndexManager>,
        emitter: Arc<dyn Emitter>,
        page_size: usize,
    ) -> Self {
        Self {
            remote,
            replica,
            index,
            emitter,
            page_size,
            in_flight: Mutex::new(()),
            resync: AtomicBool::new(false),
        }
    }

    fn report(&self, update: SyncUpdate) {
        update.emit(self.emitter.as_ref(), topic::SYNC_PROGRESS);
    }

    /// Run one sync attempt.
    ///
    /// Returns `None` when another attempt is already running. Otherwise
    /// returns the attempt's summary, which is empty on failure.
    pub async fn sync(&self, request: SyncRequest) -> Option<SyncSummary> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::info!("Sync already in flight; skipping");
            return None;
        };

        match self.run(request).await {
            Ok(summary) => {
                self.resync.store(false, Ordering::SeqCst);
                self.report(SyncUpdate::success(summary.message()));
                Some(summary)
            }
            Err(e) => {
                self.resync.store(true, Ordering::SeqCst);
                tracing::error!("Sync failed: {:#}", e);
                self.report(SyncUpdate::error(e.to_string()));
                Some(SyncSummary::default())
            }
        }
    }

    async fn run(&self, request: SyncRequest) -> Result<SyncSummary> {
        let summary = if self.replica.count().await? == 0 {
            self.full_sync().await?
        } else {
            self.incremental_sync().await?
        };

        if request.rebuild_index {
            self.report(SyncUpdate::progress("Building index..."));
            let on_stage = |stage: BuildStage| match stage {
                BuildStage::Indexing { count, total } => self.report(SyncUpdate::progress(
                    format!("Building index... {}", to_percent(count, total)),
                )),
                BuildStage::Saving => self.report(SyncUpdate::progress("Saving index...")),
            };
            self.index.build_index(&on_stage).await?;
        } else if summary.is_dirty() {
            self.report(SyncUpdate::progress("Updating index..."));
            self.index.update_index(&summary).await?;
        }

        Ok(summary)
    }

    async fn full_sync(&self) -> Result<SyncSummary> {
        self.report(SyncUpdate::progress("Fetching ids..."));
        let ids = self.remote.list_active_ids(None).await?;
        let pages = split_pages(&ids, self.page_size);
        self.report(SyncUpdate::progress(format!(
            "Fetching ids... found {} items, {} pages",
            ids.len(),
            pages.len()
        )));

        let mut pending: FuturesUnordered<_> = pages
            .iter()
            .enumerate()
            .map(|(i, page)| async move { (i, self.remote.get_items(&ALL_FIELDS, page).await) })
            .collect();

        let mut fetched: Vec<Vec<RemoteItem>> = vec![Vec::new(); pages.len()];
        let mut done = 0;
        while let Some((i, result)) = pending.next().await {
            fetched[i] = result?;
            done += pages[i].len();
            self.report(SyncUpdate::progress(format!(
                "Fetching content... {}",
                to_percent(done, ids.len())
            )));
        }

        let records: Vec<LocalRecord> = fetched
            .iter()
            .flatten()
            .map(LocalRecord::from_remote)
            .collect();
        self.replica.replace_all(&records).await?;

        tracing::info!(items = records.len(), pages = pages.len(), "Full sync complete");
        Ok(SyncSummary {
            added_ids: records.iter().map(|r| r.id).collect(),
            ..Default::default()
        })
    }

    async fn incremental_sync(&self) -> Result<SyncSummary> {
        if self.resync.load(Ordering::SeqCst) {
            tracing::info!("Previous sync failed; skipping peek");
        } else {
            self.report(SyncUpdate::progress("Peeking changes..."));
            if !self.peek_is_changed().await? {
                tracing::debug!("No drift detected");
                return Ok(SyncSummary::default());
            }
        }

        self.report(SyncUpdate::progress("Fetching ids..."));
        let (ids, deleted_ids) = futures::try_join!(
            self.remote.list_active_ids(None),
            self.remote.list_deleted_ids(None)
        )?;
        let pages = split_pages(&ids, self.page_size);
        self.report(SyncUpdate::progress(format!(
            "Fetching item ids... found {} items, {} pages",
            ids.len(),
            pages.len()
        )));

        let mut summary = SyncSummary::default();
        let mut changed: Vec<LocalRecord> = Vec::new();
        let mut ordering = OrderingCheck::default();
        let mut done = 0;

        for (i, page) in pages.iter().enumerate() {
            let items = in_request_order(page, self.remote.get_items(&ALL_FIELDS, page).await?);
            let local = self
                .replica
                .bulk_get(&items.iter().map(|item| item.id).collect::<Vec<_>>())
                .await?;

            let diff = classify(&items, &local);
            tracing::debug!(
                page = i,
                added = diff.added.len(),
                updated = diff.updated.len(),
                unchanged = diff.unchanged.len(),
                "Page classified"
            );
            if !diff.is_consistent() {
                return Err(SyncError::Inconsistent {
                    ids: diff.inconsistent,
                }
                .into());
            }

            let records: Vec<LocalRecord> = items.iter().map(LocalRecord::from_remote).collect();
            ordering.observe(&records);

            changed.extend(
                records
                    .into_iter()
                    .filter(|r| diff.added.contains(&r.id) || diff.updated.contains(&r.id)),
            );

            summary.added_ids.extend(&diff.added);
            summary.updated_ids.extend(&diff.updated);

            done += page.len();
            self.report(SyncUpdate::progress(format!(
                "Fetching content... {}",
                to_percent(done, ids.len())
            )));

            if diff.has_unchanged() && ordering.trusted() {
                tracing::debug!(page = i, "Reached synced items; stopping");
                break;
            }
        }

        self.replica.bulk_upsert(&changed).await?;
        summary.deleted_ids = self.replica.bulk_delete(&deleted_ids).await?.into_iter().collect();

        tracing::info!(
            added = summary.added_ids.len(),
            updated = summary.updated_ids.len(),
            deleted = summary.deleted_ids.len(),
            "Incremental sync complete"
        );
        Ok(summary)
    }

    /// Cheap drift check on the newest active and newest deleted ids.
    pub async fn peek_is_changed(&self) -> Result<bool> {
        let (upserted, deleted) =
            futures::try_join!(self.peek_upsertion(), self.peek_deletion())?;
        Ok(upserted || deleted)
    }

    async fn peek_upsertion(&self) -> Result<bool> {
        let ids = self.remote.list_active_ids(Some(1)).await?;
        // An empty remote or a missing local copy is treated as drift.
        let Some(&newest) = ids.first() else {
            return Ok(true);
        };
        let Some(local) = self.replica.get(newest).await? else {
            return Ok(true);
        };
        let items = self.remote.get_items(&ALL_FIELDS, &[newest]).await?;
        Ok(items
            .first()
            .map_or(true, |item| item.revision != local.revision))
    }

    async fn peek_deletion(&self) -> Result<bool> {
        let ids = self.remote.list_deleted_ids(Some(1)).await?;
        let Some(&newest) = ids.first() else {
            return Ok(false);
        };
        Ok(self.replica.get(newest).await?.is_some())
    }
}

/// Reorder a batch response to match the requested id order.
fn in_request_order(requested: &[ItemId], items: Vec<RemoteItem>) -> Vec<RemoteItem> {
    let mut by_id: HashMap<ItemId, RemoteItem> = items.into_iter().map(|i| (i.id, i)).collect();
    requested.iter().filter_map(|id| by_id.remove(id)).collect()
}

/// Tracks whether the listing has been newest-first so far.
#[derive(Default)]
struct OrderingCheck {
    last: Option<DateTime<Utc>>,
    violated: bool,
}

impl OrderingCheck {
    fn observe(&mut self, records: &[LocalRecord]) {
        for record in records {
            if let Some(last) = self.last {
                if record.changed_at > last && !self.violated {
                    tracing::warn!(
                        id = record.id,
                        "Remote listing is not ordered newest-first; early exit disabled"
                    );
                    self.violated = true;
                }
            }
            self.last = Some(record.changed_at);
        }
    }

    fn trusted(&self) -> bool {
        !self.violated
    }
}
