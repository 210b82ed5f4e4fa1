//! In-memory ProgressStore
//!
//! Documents are kept serialized so loads go through the same parse and
//! validation path as the file store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{
    sort_newest_first, validate_loaded, BatchId, CheckpointDocument, CheckpointSummary,
    ProgressStore,
};
use crate::{Result, StorageError};

#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    documents: Arc<Mutex<HashMap<BatchId, String>>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw text under a batch id, bypassing serialization.
    pub fn insert_raw(&self, batch_id: BatchId, raw: impl Into<String>) {
        self.documents.lock().insert(batch_id, raw.into());
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn save(&self, doc: &CheckpointDocument) -> Result<()> {
        let raw = serde_json::to_string(doc)?;
        self.documents.lock().insert(doc.batch_id.clone(), raw);
        Ok(())
    }

    async fn load(&self, batch_id: &BatchId) -> Result<Option<CheckpointDocument>> {
        let raw = match self.documents.lock().get(batch_id) {
            Some(raw) => raw.clone(),
            None => return Ok(None),
        };
        let doc: CheckpointDocument = serde_json::from_str(&raw).map_err(|e| {
            StorageError::corrupt_checkpoint(batch_id, e.to_string()).caused_by(e)
        })?;
        validate_loaded(batch_id, doc).map(Some)
    }

    async fn delete(&self, batch_id: &BatchId) -> Result<()> {
        self.documents.lock().remove(batch_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let mut summaries: Vec<CheckpointSummary> = self
            .documents
            .lock()
            .values()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_documents() {
        let store = InMemoryProgressStore::new();
        let view = store.clone();
        let doc = CheckpointDocument::new(BatchId::new("b1"));

        store.save(&doc).await.unwrap();

        assert_eq!(view.load(&doc.batch_id).await.unwrap(), Some(doc));
        assert_eq!(view.len(), 1);
    }

    #[tokio::test]
    async fn test_raw_garbage_is_corrupt() {
        let store = InMemoryProgressStore::new();
        store.insert_raw(BatchId::new("b1"), "][");

        let err = store.load(&BatchId::new("b1")).await.unwrap_err();
        assert!(err.is_corrupt_checkpoint());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = InMemoryProgressStore::new();
        store.delete(&BatchId::new("ghost")).await.unwrap();
        assert!(store.is_empty());
    }
}
