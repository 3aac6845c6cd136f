use anyhow::Result;
use sqlx::SqlitePool;

/// Create the snapshot tables if they do not exist.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Single-row snapshot header
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_snapshot (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            model_id TEXT NOT NULL,
            model_version TEXT NOT NULL,
            corpus_signature TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            corpus_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per embedded document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            key TEXT PRIMARY KEY,
            service_id TEXT NOT NULL,
            entity TEXT,
            text TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_entries_service ON index_entries(service_id)")
        .execute(pool)
        .await?;

    Ok(())
}
