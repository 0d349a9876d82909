//! Schema creation. Idempotent: every statement is `IF NOT EXISTS`.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_items (
            id INTEGER PRIMARY KEY,
            rev INTEGER NOT NULL,
            title TEXT NOT NULL,
            type_name TEXT NOT NULL,
            changed_at INTEGER NOT NULL,
            assignee TEXT NOT NULL,
            state TEXT NOT NULL,
            iteration_path TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Index snapshot chunks, superseded as a unit on every export
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_snapshot (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_types (
            name TEXT PRIMARY KEY,
            icon_url TEXT NOT NULL,
            icon_bytes BLOB NOT NULL,
            states_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_work_items_changed_at ON work_items(changed_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
