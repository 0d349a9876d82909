//! SQLite-backed replica, snapshot, and metadata stores.
//!
//! One [`SqliteStore`] implements all three storage traits over the
//! tables created by [`crate::migrate`]:
//!
//! | Trait | Table |
//! |-------|-------|
//! | [`ReplicaStore`] | `work_items` |
//! | [`SnapshotStore`] | `index_snapshot` |
//! | [`MetadataStore`] | `item_types` |
//!
//! Multi-row writes run inside a transaction so a failed write leaves the
//! previous contents in place.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::{BTreeMap, HashMap};

use workitem_replica_core::models::{ItemId, LocalRecord, MetadataEntry, StateMetadata};
use workitem_replica_core::store::{MetadataStore, ReplicaStore, SnapshotEntry, SnapshotStore};

const RECORD_COLUMNS: &str =
    "id, rev, title, type_name, changed_at, assignee, state, iteration_path, tags_json";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn row_to_record(row: &SqliteRow) -> Result<LocalRecord> {
    let changed_at: i64 = row.get("changed_at");
    let tags_json: String = row.get("tags_json");
    Ok(LocalRecord {
        id: row.get("id"),
        revision: row.get("rev"),
        title: row.get("title"),
        type_name: row.get("type_name"),
        changed_at: DateTime::<Utc>::from_timestamp_millis(changed_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        assignee: row.get("assignee"),
        state: row.get("state"),
        iteration_path: row.get("iteration_path"),
        tags: serde_json::from_str(&tags_json).context("Corrupt tags_json column")?,
    })
}

async fn insert_records(tx: &mut Transaction<'_, Sqlite>, records: &[LocalRecord]) -> Result<()> {
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO work_items (id, rev, title, type_name, changed_at,
                                    assignee, state, iteration_path, tags_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                rev = excluded.rev,
                title = excluded.title,
                type_name = excluded.type_name,
                changed_at = excluded.changed_at,
                assignee = excluded.assignee,
                state = excluded.state,
                iteration_path = excluded.iteration_path,
                tags_json = excluded.tags_json
            "#,
        )
        .bind(record.id)
        .bind(record.revision)
        .bind(&record.title)
        .bind(&record.type_name)
        .bind(record.changed_at.timestamp_millis())
        .bind(&record.assignee)
        .bind(&record.state)
        .bind(&record.iteration_path)
        .bind(serde_json::to_string(&record.tags)?)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ReplicaStore for SqliteStore {
    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn get(&self, id: ItemId) -> Result<Option<LocalRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM work_items WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn bulk_get(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, LocalRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT {} FROM work_items WHERE id IN ({})",
            RECORD_COLUMNS,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| row_to_record(row).map(|r| (r.id, r)))
            .collect()
    }

    async fn bulk_upsert(&self, records: &[LocalRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        insert_records(&mut tx, records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn bulk_delete(&self, ids: &[ItemId]) -> Result<Vec<ItemId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = Vec::new();
        for id in ids {
            let result = sqlx::query("DELETE FROM work_items WHERE id = ?")
                .bind(*id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                removed.push(*id);
            }
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn replace_all(&self, records: &[LocalRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM work_items").execute(&mut *tx).await?;
        insert_records(&mut tx, records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<LocalRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM work_items ORDER BY id ASC",
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LocalRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM work_items ORDER BY changed_at DESC, id DESC LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn load_snapshot(&self) -> Result<Vec<SnapshotEntry>> {
        let rows = sqlx::query("SELECT key, value FROM index_snapshot ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| SnapshotEntry {
                key: row.get("key"),
                value: row.get("value"),
            })
            .collect())
    }

    async fn replace_snapshot(&self, entries: &[SnapshotEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_snapshot")
            .execute(&mut *tx)
            .await?;
        for entry in entries {
            sqlx::query("INSERT INTO index_snapshot (key, value) VALUES (?, ?)")
                .bind(&entry.key)
                .bind(&entry.value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear_snapshot(&self) -> Result<()> {
        sqlx::query("DELETE FROM index_snapshot")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn load_metadata(&self) -> Result<Vec<MetadataEntry>> {
        let rows = sqlx::query(
            "SELECT name, icon_url, icon_bytes, states_json FROM item_types ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let states_json: String = row.get("states_json");
                let states: BTreeMap<String, StateMetadata> =
                    serde_json::from_str(&states_json).context("Corrupt states_json column")?;
                Ok(MetadataEntry {
                    type_name: row.get("name"),
                    icon_url: row.get("icon_url"),
                    icon_bytes: row.get("icon_bytes"),
                    states,
                })
            })
            .collect()
    }

    async fn put_metadata(&self, entry: &MetadataEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO item_types (name, icon_url, icon_bytes, states_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                icon_url = excluded.icon_url,
                icon_bytes = excluded.icon_bytes,
                states_json = excluded.states_json
            "#,
        )
        .bind(&entry.type_name)
        .bind(&entry.icon_url)
        .bind(&entry.icon_bytes)
        .bind(serde_json::to_string(&entry.states)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_metadata(&self) -> Result<()> {
        sqlx::query("DELETE FROM item_types")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
