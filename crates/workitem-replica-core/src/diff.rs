//! Page-level diff classifier.
//!
//! Reconciles one page of remote items against the replica's current copy.
//! Revision is the only trust signal: equal revisions are `Unchanged` even
//! when other fields differ textually.
//!
//! | Local record | Revisions | Outcome |
//! |--------------|-----------|---------|
//! | absent | any | [`DiffOutcome::Added`] |
//! | present | remote > local | [`DiffOutcome::Updated`] |
//! | present | remote == local | [`DiffOutcome::Unchanged`] |
//! | present | remote < local | [`DiffOutcome::Inconsistent`] |
//!
//! An `Inconsistent` outcome means the replica is ahead of the remote. There
//! is no reconciliation strategy for that, so callers must reject the whole
//! page rather than apply the consistent part of it.

use std::collections::HashMap;

use crate::models::{ItemId, LocalRecord, RemoteItem};

/// Classification of a single remote item against local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    Added,
    Updated,
    Unchanged,
    Inconsistent,
}

/// Classify one remote item.
pub fn classify_item(remote: &RemoteItem, local: Option<&LocalRecord>) -> DiffOutcome {
    match local {
        None => DiffOutcome::Added,
        Some(local) if remote.revision > local.revision => DiffOutcome::Updated,
        Some(local) if remote.revision == local.revision => DiffOutcome::Unchanged,
        Some(_) => DiffOutcome::Inconsistent,
    }
}

/// Ids of one page partitioned by outcome, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDiff {
    pub added: Vec<ItemId>,
    pub updated: Vec<ItemId>,
    pub unchanged: Vec<ItemId>,
    pub inconsistent: Vec<ItemId>,
}

impl PageDiff {
    pub fn is_consistent(&self) -> bool {
        self.inconsistent.is_empty()
    }

    /// True when at least one id was already synced at its current revision.
    pub fn has_unchanged(&self) -> bool {
        !self.unchanged.is_empty()
    }

    pub fn outcome_of(&self, id: ItemId) -> Option<DiffOutcome> {
        if self.added.contains(&id) {
            Some(DiffOutcome::Added)
        } else if self.updated.contains(&id) {
            Some(DiffOutcome::Updated)
        } else if self.unchanged.contains(&id) {
            Some(DiffOutcome::Unchanged)
        } else if self.inconsistent.contains(&id) {
            Some(DiffOutcome::Inconsistent)
        } else {
            None
        }
    }
}

/// Partition a page of remote items against the local lookup.
///
/// Pure and deterministic; input order is irrelevant to the outcome of each id.
pub fn classify(remote_items: &[RemoteItem], local: &HashMap<ItemId, LocalRecord>) -> PageDiff {
    let mut diff = PageDiff::default();
    for item in remote_items {
        let bucket = match classify_item(item, local.get(&item.id)) {
            DiffOutcome::Added => &mut diff.added,
            DiffOutcome::Updated => &mut diff.updated,
            DiffOutcome::Unchanged => &mut diff.unchanged,
            DiffOutcome::Inconsistent => &mut diff.inconsistent,
        };
        bucket.push(item.id);
    }
    diff
}

/// Split ids into consecutive pages of at most `size` ids.
pub fn split_pages(ids: &[ItemId], size: usize) -> Vec<Vec<ItemId>> {
    ids.chunks(size.max(1)).map(<[ItemId]>::to_vec).collect()
}
