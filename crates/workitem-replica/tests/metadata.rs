//! Metadata manager: icon dedup, persistence, and the sync-metadata flow.

mod common;

use std::sync::Arc;

use common::{drain, item_type, messages, MockRemote, PNG_BYTES};
use workitem_replica::events::{topic, EventBus};
use workitem_replica::metadata::{icon_data_url, MetadataManager, MetadataUpdateSummary};
use workitem_replica_core::models::StateCategory;
use workitem_replica_core::store::memory::InMemoryStore;
use workitem_replica_core::store::MetadataStore;

const BUG_ICON: &str = "https://icons.example/bug.png";
const TASK_ICON: &str = "https://icons.example/task.png";

fn remote_with_types() -> Arc<MockRemote> {
    let remote = Arc::new(MockRemote::default());
    remote.set_types(vec![
        item_type("Bug", BUG_ICON, false),
        item_type("Defect", BUG_ICON, false),
        item_type("Task", TASK_ICON, false),
        item_type("Legacy", "https://icons.example/legacy.png", true),
    ]);
    remote.set_icon(BUG_ICON, PNG_BYTES);
    remote.set_icon(TASK_ICON, b"<svg xmlns='http://www.w3.org/2000/svg'/>");
    remote
}

async fn load(store: &Arc<InMemoryStore>, remote: &Arc<MockRemote>, events: &EventBus) -> MetadataManager {
    MetadataManager::load(store.clone(), remote.clone(), Arc::new(events.clone()))
        .await
        .unwrap()
}

#[tokio::test]
async fn icons_are_fetched_once_per_url() {
    let store = Arc::new(InMemoryStore::new());
    let remote = remote_with_types();
    let manager = load(&store, &remote, &EventBus::new()).await;

    let summary = manager.sync_metadata(remote.as_ref()).await.unwrap();
    assert_eq!(
        summary,
        MetadataUpdateSummary {
            type_count: 3,
            new_fetch_count: 2
        }
    );
    assert_eq!(MockRemote::count(&remote.calls.icons), 2);
    assert_eq!(manager.cached_icon_count().await, 2);

    let summary = manager.sync_metadata(remote.as_ref()).await.unwrap();
    assert_eq!(summary.new_fetch_count, 0);
    assert_eq!(MockRemote::count(&remote.calls.icons), 2);
}

#[tokio::test]
async fn map_skips_disabled_types() {
    let store = Arc::new(InMemoryStore::new());
    let remote = remote_with_types();
    let manager = load(&store, &remote, &EventBus::new()).await;
    manager.sync_metadata(remote.as_ref()).await.unwrap();

    let map = manager.map();
    let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
    names.sort();
    assert_eq!(names, vec!["Bug", "Defect", "Task"]);

    let bug = &map["Bug"];
    assert_eq!(bug.icon_url, BUG_ICON);
    assert_eq!(bug.icon_data_url, icon_data_url(PNG_BYTES));
    assert!(bug.icon_data_url.starts_with("data:image/png;base64,"));
    assert_eq!(bug.states["Closed"].category, StateCategory::Completed);
    assert!(map["Task"].icon_data_url.starts_with("data:image/svg+xml;base64,"));
}

#[tokio::test]
async fn persisted_entries_seed_the_next_process() {
    let store = Arc::new(InMemoryStore::new());
    let remote = remote_with_types();
    let first = load(&store, &remote, &EventBus::new()).await;
    first.sync_metadata(remote.as_ref()).await.unwrap();
    assert_eq!(store.load_metadata().await.unwrap().len(), 3);

    let fresh_remote = remote_with_types();
    let second = load(&store, &fresh_remote, &EventBus::new()).await;
    assert_eq!(second.map().len(), 3);
    assert_eq!(second.cached_icon_count().await, 2);

    let summary = second.sync_metadata(fresh_remote.as_ref()).await.unwrap();
    assert_eq!(summary.new_fetch_count, 0);
    assert_eq!(MockRemote::count(&fresh_remote.calls.icons), 0);
}

#[tokio::test]
async fn icon_failure_fails_the_update() {
    let store = Arc::new(InMemoryStore::new());
    let remote = Arc::new(MockRemote::default());
    remote.set_types(vec![item_type("Bug", "https://icons.example/missing.png", false)]);
    let events = EventBus::new();
    let mut receiver = events.subscribe();
    let manager = load(&store, &remote, &events).await;

    assert!(manager.sync_metadata(remote.as_ref()).await.is_none());
    assert!(manager.map().is_empty());

    let events = drain(&mut receiver);
    assert_eq!(
        messages(&events, topic::SYNC_METADATA_PROGRESS, "error"),
        vec!["Status code: 404".to_string()]
    );
}

#[tokio::test]
async fn progress_and_change_events_are_published() {
    let store = Arc::new(InMemoryStore::new());
    let remote = remote_with_types();
    let events = EventBus::new();
    let mut receiver = events.subscribe();
    let manager = load(&store, &remote, &events).await;

    manager.sync_metadata(remote.as_ref()).await.unwrap();

    let events = drain(&mut receiver);
    let progress = messages(&events, topic::SYNC_METADATA_PROGRESS, "progress");
    assert_eq!(
        progress,
        vec![
            "Fetching metadata...",
            "Fetching icons...",
            "Fetching icons... 1/3",
            "Fetching icons... 2/3",
            "Fetching icons... 3/3",
        ]
    );
    assert_eq!(
        messages(&events, topic::SYNC_METADATA_PROGRESS, "success"),
        vec!["Sync metadata... Success!".to_string()]
    );
    // Once on load and once after the update.
    let changes = events
        .iter()
        .filter(|e| e.topic == topic::METADATA_CHANGED)
        .count();
    assert_eq!(changes, 2);
}

#[tokio::test]
async fn reset_forgets_icons() {
    let store = Arc::new(InMemoryStore::new());
    let remote = remote_with_types();
    let manager = load(&store, &remote, &EventBus::new()).await;
    manager.sync_metadata(remote.as_ref()).await.unwrap();

    manager.reset().await.unwrap();
    assert!(store.load_metadata().await.unwrap().is_empty());
    assert_eq!(manager.cached_icon_count().await, 0);

    let summary = manager.sync_metadata(remote.as_ref()).await.unwrap();
    assert_eq!(summary.new_fetch_count, 2);
}
