//! SQLite adapter for ProgressStore
//!
//! One row per batch; the document column holds the same JSON the file store
//! writes. Each save is a single UPSERT, so a row is always a whole document.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    sort_newest_first, validate_loaded, BatchId, CheckpointDocument, CheckpointSummary,
    ProgressStore,
};
use crate::{Result, StorageError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS checkpoints (
    batch_id   TEXT PRIMARY KEY,
    updated_at TEXT NOT NULL,
    document   TEXT NOT NULL
);
";

pub struct SqliteProgressStore {
    conn: Mutex<Connection>,
}

impl SqliteProgressStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn new_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn save(&self, doc: &CheckpointDocument) -> Result<()> {
        let raw = serde_json::to_string(doc)?;
        self.conn.lock().execute(
            "INSERT INTO checkpoints (batch_id, updated_at, document) VALUES (?1, ?2, ?3)
             ON CONFLICT(batch_id) DO UPDATE SET updated_at = excluded.updated_at,
                                                 document = excluded.document",
            params![doc.batch_id.as_str(), doc.timestamp, raw],
        )?;
        Ok(())
    }

    async fn load(&self, batch_id: &BatchId) -> Result<Option<CheckpointDocument>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT document FROM checkpoints WHERE batch_id = ?1",
                params![batch_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let doc: CheckpointDocument = serde_json::from_str(&raw).map_err(|e| {
            StorageError::corrupt_checkpoint(batch_id, e.to_string()).caused_by(e)
        })?;
        validate_loaded(batch_id, doc).map(Some)
    }

    async fn delete(&self, batch_id: &BatchId) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM checkpoints WHERE batch_id = ?1",
            params![batch_id.as_str()],
        )?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT batch_id, updated_at FROM checkpoints")?;
        let rows = stmt.query_map([], |row| {
            Ok(CheckpointSummary {
                batch_id: BatchId::new(row.get::<_, String>(0)?),
                timestamp: row.get::<_, DateTime<Utc>>(1)?,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            match row {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::warn!("skipping unreadable checkpoint row: {}", e),
            }
        }
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SuccessRecord;

    #[tokio::test]
    async fn test_upsert_replaces_document() {
        let store = SqliteProgressStore::new_in_memory().unwrap();
        let mut doc = CheckpointDocument::new(BatchId::new("b1"));
        store.save(&doc).await.unwrap();

        doc.stage2
            .successful
            .push(SuccessRecord::new(0, "gid://shop/Order/1"));
        store.save(&doc).await.unwrap();

        let loaded = store.load(&doc.batch_id).await.unwrap().unwrap();
        assert_eq!(loaded.stage2.successful.len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_reported() {
        let store = SqliteProgressStore::new_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO checkpoints VALUES ('b1', '2024-01-01T00:00:00Z', 'nope')",
                [],
            )
            .unwrap();

        let err = store.load(&BatchId::new("b1")).await.unwrap_err();
        assert!(err.is_corrupt_checkpoint());
    }

    #[tokio::test]
    async fn test_delete_then_load_none() {
        let store = SqliteProgressStore::new_in_memory().unwrap();
        let doc = CheckpointDocument::new(BatchId::new("b1"));
        store.save(&doc).await.unwrap();
        store.delete(&doc.batch_id).await.unwrap();
        store.delete(&doc.batch_id).await.unwrap();
        assert!(store.load(&doc.batch_id).await.unwrap().is_none());
    }
}
