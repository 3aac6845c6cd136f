//! Durable storage for [`IndexSnapshot`]s.
//!
//! [`SqliteSnapshotStore`] keeps the most recent snapshot in two tables:
//! `index_snapshot` (one header row) and `index_entries` (one row per
//! document, vectors as little-endian `f32` BLOBs). `save` replaces both
//! inside a single transaction, so a reader never sees a header from one
//! snapshot with the entries of another.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

use crate::db;
use crate::document::DocumentMetadata;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::index::{IndexEntry, IndexSnapshot};
use crate::migrate;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The stored snapshot, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<IndexSnapshot>>;
    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &IndexSnapshot) -> Result<()>;
}

/// Header of the stored snapshot, without vectors.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotInfo {
    pub model_id: String,
    pub model_version: String,
    pub corpus_signature: String,
    pub created_at: i64,
    pub services: usize,
    pub entries: usize,
}

pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Open the database at `path` and create the tables.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open snapshot database: {}", path.display()))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn info(&self) -> Result<Option<SnapshotInfo>> {
        let Some(header) = sqlx::query(
            "SELECT model_id, model_version, corpus_signature, created_at, corpus_json \
             FROM index_snapshot WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await?;
        let corpus: BTreeMap<String, usize> =
            serde_json::from_str(&header.get::<String, _>("corpus_json")).unwrap_or_default();

        Ok(Some(SnapshotInfo {
            model_id: header.get("model_id"),
            model_version: header.get("model_version"),
            corpus_signature: header.get("corpus_signature"),
            created_at: header.get("created_at"),
            services: corpus.len(),
            entries: entries as usize,
        }))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self) -> Result<Option<IndexSnapshot>> {
        let Some(header) = sqlx::query(
            "SELECT model_id, model_version, corpus_signature, created_at, corpus_json \
             FROM index_snapshot WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let corpus: BTreeMap<String, usize> =
            serde_json::from_str(&header.get::<String, _>("corpus_json"))
                .context("Corrupt corpus in snapshot header")?;

        let rows = sqlx::query(
            "SELECT key, service_id, entity, text, vector, metadata_json FROM index_entries",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = BTreeMap::new();
        for row in rows {
            let key: String = row.get("key");
            let blob: Vec<u8> = row.get("vector");
            let metadata: DocumentMetadata =
                match serde_json::from_str(&row.get::<String, _>("metadata_json")) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "dropping snapshot entry with corrupt metadata");
                        continue;
                    }
                };
            entries.insert(
                key,
                IndexEntry {
                    service_id: row.get("service_id"),
                    entity: row.get("entity"),
                    text: row.get("text"),
                    vector: blob_to_vec(&blob),
                    metadata,
                },
            );
        }

        Ok(Some(IndexSnapshot {
            model_id: header.get("model_id"),
            model_version: header.get("model_version"),
            corpus_signature: header.get("corpus_signature"),
            created_at: header.get("created_at"),
            corpus,
            entries,
        }))
    }

    async fn save(&self, snapshot: &IndexSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM index_entries")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_snapshot")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO index_snapshot (id, model_id, model_version, corpus_signature, created_at, corpus_json) \
             VALUES (1, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.model_id)
        .bind(&snapshot.model_version)
        .bind(&snapshot.corpus_signature)
        .bind(snapshot.created_at)
        .bind(serde_json::to_string(&snapshot.corpus)?)
        .execute(&mut *tx)
        .await?;

        for (key, entry) in &snapshot.entries {
            sqlx::query(
                "INSERT INTO index_entries (key, service_id, entity, text, dims, vector, metadata_json) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(key)
            .bind(&entry.service_id)
            .bind(&entry.entity)
            .bind(&entry.text)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .bind(serde_json::to_string(&entry.metadata)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            entries = snapshot.entries.len(),
            signature = %snapshot.corpus_signature,
            "index snapshot saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> IndexSnapshot {
        let mut entries = BTreeMap::new();
        entries.insert(
            "S1".to_string(),
            IndexEntry {
                service_id: "S1".to_string(),
                entity: None,
                text: "service one".to_string(),
                vector: vec![0.5, -0.25, 1.0],
                metadata: DocumentMetadata {
                    display_name: "Service One".to_string(),
                    domain: Some("AR".to_string()),
                    tier: 1,
                    entity_set: None,
                },
            },
        );
        entries.insert(
            "S1::Item".to_string(),
            IndexEntry {
                service_id: "S1".to_string(),
                entity: Some("Item".to_string()),
                text: "item".to_string(),
                vector: vec![0.0, 1.0, 0.0],
                metadata: DocumentMetadata {
                    display_name: "Service One".to_string(),
                    domain: Some("AR".to_string()),
                    tier: 1,
                    entity_set: Some("Items".to_string()),
                },
            },
        );
        let mut corpus = BTreeMap::new();
        corpus.insert("S1".to_string(), 1);
        IndexSnapshot {
            model_id: "hashing".to_string(),
            model_version: "1".to_string(),
            corpus_signature: crate::index::corpus_signature(&corpus),
            created_at: 1_700_000_000,
            corpus,
            entries,
        }
    }

    #[tokio::test]
    async fn test_roundtrip_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSnapshotStore::open(&dir.path().join("scout.sqlite"))
            .await
            .unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(store.info().await.unwrap().is_none());

        let original = snapshot();
        store.save(&original).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap(), original);

        let mut smaller = original.clone();
        smaller.entries.remove("S1::Item");
        smaller.model_version = "2".to_string();
        store.save(&smaller).await.unwrap();
        let info = store.info().await.unwrap().unwrap();
        assert_eq!(info.entries, 1);
        assert_eq!(info.model_version, "2");
        assert_eq!(info.services, 1);
    }
}
