//! SQLite store round-trips against a temporary database file.

mod common;

use std::collections::BTreeMap;
use tempfile::TempDir;

use common::{item_type, record, PNG_BYTES};
use workitem_replica::sqlite_store::SqliteStore;
use workitem_replica::{db, migrate};
use workitem_replica_core::models::{MetadataEntry, StateCategory};
use workitem_replica_core::store::{MetadataStore, ReplicaStore, SnapshotEntry, SnapshotStore};

async fn open(tmp: &TempDir) -> SqliteStore {
    let pool = db::connect_path(&tmp.path().join("data").join("replica.sqlite"))
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    SqliteStore::new(pool)
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    migrate::run_migrations(store.pool()).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn records_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let original = record(7, 3, "Login fails on Safari", 1_700_000_000);
    store.bulk_upsert(&[original.clone()]).await.unwrap();

    let loaded = store.get(7).await.unwrap().unwrap();
    assert_eq!(loaded, original);
    assert_eq!(loaded.tags, vec!["backend", "triage"]);
    assert_eq!(loaded.assignee, "Ada Lovelace");
    assert!(store.get(8).await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_overwrites_and_bulk_get_skips_missing() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store
        .bulk_upsert(&[record(1, 1, "first", 10), record(2, 1, "second", 20)])
        .await
        .unwrap();
    store.bulk_upsert(&[record(1, 2, "first v2", 30)]).await.unwrap();

    let found = store.bulk_get(&[1, 2, 3]).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[&1].revision, 2);
    assert_eq!(found[&1].title, "first v2");
    assert!(store.bulk_get(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn bulk_delete_reports_present_ids() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store
        .bulk_upsert(&[record(1, 1, "a", 0), record(2, 1, "b", 0)])
        .await
        .unwrap();

    let mut removed = store.bulk_delete(&[2, 9, 1]).await.unwrap();
    removed.sort();
    assert_eq!(removed, vec![1, 2]);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn replace_all_supersedes_contents() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store
        .bulk_upsert(&[record(1, 1, "old", 0), record(2, 1, "old", 0)])
        .await
        .unwrap();

    store
        .replace_all(&[record(3, 1, "new", 0), record(4, 1, "new", 0)])
        .await
        .unwrap();

    let ids: Vec<i64> = store.all().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 4]);
}

#[tokio::test]
async fn recent_orders_by_change_time() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store
        .bulk_upsert(&[
            record(1, 1, "a", 300),
            record(2, 1, "b", 100),
            record(3, 1, "c", 300),
            record(4, 1, "d", 200),
        ])
        .await
        .unwrap();

    let ids: Vec<i64> = store.recent(3).await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 1, 4]);
}

#[tokio::test]
async fn snapshot_is_replaced_wholesale() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    let entry = |key: &str, value: &str| SnapshotEntry {
        key: key.to_string(),
        value: value.to_string(),
    };

    store
        .replace_snapshot(&[entry("cfg", "{}"), entry("reg", "{\"1\":[]}")])
        .await
        .unwrap();
    store.replace_snapshot(&[entry("cfg", "{\"v\":2}")]).await.unwrap();

    assert_eq!(store.load_snapshot().await.unwrap(), vec![entry("cfg", "{\"v\":2}")]);

    store.clear_snapshot().await.unwrap();
    assert!(store.load_snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn metadata_round_trips_with_icon_bytes() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    let bug = MetadataEntry::from_definition(
        &item_type("Bug", "https://icons.example/bug.png", false),
        PNG_BYTES.to_vec(),
    );

    store.put_metadata(&bug).await.unwrap();
    store.put_metadata(&bug).await.unwrap();

    let loaded = store.load_metadata().await.unwrap();
    assert_eq!(loaded, vec![bug]);
    assert_eq!(loaded[0].icon_bytes, PNG_BYTES);
    let categories: BTreeMap<&str, StateCategory> = loaded[0]
        .states
        .iter()
        .map(|(name, state)| (name.as_str(), state.category))
        .collect();
    assert_eq!(categories["Active"], StateCategory::InProgress);

    store.clear_metadata().await.unwrap();
    assert!(store.load_metadata().await.unwrap().is_empty());
}
