//! Shared fixtures for the integration tests: a scripted remote, record
//! builders, and a fast context over the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use workitem_replica::context::{AppContext, ContextOptions};
use workitem_replica::events::PushEvent;
use workitem_replica::export::ExportTiming;
use workitem_replica_core::models::{
    field, IconRef, ItemId, ItemTypeDefinition, LocalRecord, RemoteItem, StateDefinition,
};
use workitem_replica_core::remote::{IconFetcher, RemoteError, RemoteSource};
use workitem_replica_core::store::memory::InMemoryStore;

/// A remote item with every projected field populated.
pub fn item(id: ItemId, revision: i64, title: &str, changed_secs: i64) -> RemoteItem {
    let changed = Utc
        .timestamp_opt(changed_secs, 0)
        .single()
        .unwrap()
        .to_rfc3339();
    let fields: BTreeMap<String, serde_json::Value> = [
        (field::TITLE, json!(title)),
        (field::WORK_ITEM_TYPE, json!("Bug")),
        (field::CHANGED_DATE, json!(changed)),
        (field::ASSIGNED_TO, json!({ "displayName": "Ada Lovelace" })),
        (field::STATE, json!("Active")),
        (field::ITERATION_PATH, json!("Project\\Sprint 1")),
        (field::TAGS, json!("backend; triage")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    RemoteItem {
        id,
        revision,
        fields,
    }
}

pub fn record(id: ItemId, revision: i64, title: &str, changed_secs: i64) -> LocalRecord {
    LocalRecord::from_remote(&item(id, revision, title, changed_secs))
}

/// `count` items numbered `1..=count`, newest first (highest id is newest).
pub fn numbered_items(count: i64) -> Vec<RemoteItem> {
    (1..=count)
        .rev()
        .map(|id| item(id, 1, &format!("item {id}"), 10_000 + id))
        .collect()
}

pub fn item_type(name: &str, icon_url: &str, disabled: bool) -> ItemTypeDefinition {
    ItemTypeDefinition {
        name: name.to_string(),
        icon: IconRef {
            id: format!("icon_{}", name.to_lowercase()),
            url: icon_url.to_string(),
        },
        is_disabled: disabled,
        states: vec![
            StateDefinition {
                name: "New".to_string(),
                color: "b2b2b2".to_string(),
                category: "Proposed".to_string(),
            },
            StateDefinition {
                name: "Active".to_string(),
                color: "007acc".to_string(),
                category: "InProgress".to_string(),
            },
            StateDefinition {
                name: "Closed".to_string(),
                color: "339933".to_string(),
                category: "Completed".to_string(),
            },
        ],
    }
}

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

#[derive(Default)]
pub struct CallCounts {
    pub active: AtomicUsize,
    pub deleted: AtomicUsize,
    pub get_items: AtomicUsize,
    pub types: AtomicUsize,
    pub icons: AtomicUsize,
}

#[derive(Default)]
struct RemoteState {
    active: Vec<RemoteItem>,
    deleted: Vec<ItemId>,
    types: Vec<ItemTypeDefinition>,
    icons: HashMap<String, Vec<u8>>,
    failure: Option<u16>,
    get_items_log: Vec<Vec<ItemId>>,
}

/// Scripted remote. Listings are returned in the order the items were
/// scripted; the caller decides whether that order is newest-first.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<RemoteState>,
    delay: Duration,
    pub calls: CallCounts,
}

impl MockRemote {
    pub fn new(active: Vec<RemoteItem>) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                active,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Every batch fetch sleeps for `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace (or add) `item` and move it to the front of the listing.
    pub fn touch(&self, item: RemoteItem) {
        let mut state = self.state.lock().unwrap();
        state.active.retain(|i| i.id != item.id);
        state.active.insert(0, item);
    }

    pub fn delete(&self, id: ItemId) {
        let mut state = self.state.lock().unwrap();
        state.active.retain(|i| i.id != id);
        state.deleted.insert(0, id);
    }

    pub fn set_types(&self, types: Vec<ItemTypeDefinition>) {
        self.state.lock().unwrap().types = types;
    }

    pub fn set_icon(&self, url: &str, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .icons
            .insert(url.to_string(), bytes.to_vec());
    }

    /// Make every call fail with `status` (`None` heals the remote).
    pub fn fail_with(&self, status: Option<u16>) {
        self.state.lock().unwrap().failure = status;
    }

    pub fn reset_calls(&self) {
        for counter in [
            &self.calls.active,
            &self.calls.deleted,
            &self.calls.get_items,
            &self.calls.types,
            &self.calls.icons,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.state.lock().unwrap().get_items_log.clear();
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Ids requested by each batch fetch since the last reset.
    pub fn get_items_log(&self) -> Vec<Vec<ItemId>> {
        self.state.lock().unwrap().get_items_log.clone()
    }

    fn check(&self) -> Result<(), RemoteError> {
        match self.state.lock().unwrap().failure {
            Some(status) => Err(RemoteError::from_status(status)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn list_active_ids(&self, limit: Option<usize>) -> Result<Vec<ItemId>, RemoteError> {
        self.calls.active.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let state = self.state.lock().unwrap();
        let ids = state.active.iter().map(|i| i.id);
        Ok(match limit {
            Some(limit) => ids.take(limit).collect(),
            None => ids.collect(),
        })
    }

    async fn list_deleted_ids(&self, limit: Option<usize>) -> Result<Vec<ItemId>, RemoteError> {
        self.calls.deleted.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .deleted
            .iter()
            .copied()
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn get_items(
        &self,
        _fields: &[&str],
        ids: &[ItemId],
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        self.calls.get_items.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.get_items_log.push(ids.to_vec());
        // Reverse so callers cannot rely on the response order.
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| state.active.iter().find(|i| i.id == *id).cloned())
            .collect())
    }

    async fn list_types(&self) -> Result<Vec<ItemTypeDefinition>, RemoteError> {
        self.calls.types.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.state.lock().unwrap().types.clone())
    }
}

#[async_trait]
impl IconFetcher for MockRemote {
    async fn fetch_icon(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.calls.icons.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .icons
            .get(url)
            .cloned()
            .ok_or(RemoteError::Http { status: 404 })
    }
}

pub fn fast_timing() -> ExportTiming {
    ExportTiming {
        poll: Duration::from_millis(5),
        grace: Duration::from_millis(5),
        max_wait: Duration::from_secs(5),
    }
}

pub async fn context(
    store: Arc<InMemoryStore>,
    remote: Arc<MockRemote>,
    page_size: usize,
) -> AppContext {
    AppContext::assemble(
        store,
        remote,
        ContextOptions {
            page_size,
            search_limit: 100,
            export: fast_timing(),
        },
    )
    .await
    .unwrap()
}

/// Every event currently buffered for `receiver`.
pub fn drain(receiver: &mut broadcast::Receiver<PushEvent>) -> Vec<PushEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Messages of `type` updates published on `topic`.
pub fn messages(events: &[PushEvent], topic: &str, kind: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.topic == topic && e.payload["type"] == kind)
        .filter_map(|e| e.payload["message"].as_str().map(str::to_string))
        .collect()
}
