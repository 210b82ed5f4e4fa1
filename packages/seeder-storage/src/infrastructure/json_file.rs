//! JSON file adapter for ProgressStore
//!
//! Layout: `<root>/<environment>/<batch_id>.json`. Writes go to a `.tmp`
//! sibling first and are renamed into place, so readers only ever see a
//! complete document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::{
    is_safe_key, sort_newest_first, validate_loaded, BatchId, CheckpointDocument,
    CheckpointSummary, ProgressStore,
};
use crate::{Result, StorageError};

const EXTENSION: &str = "json";

pub struct JsonFileProgressStore {
    dir: PathBuf,
}

impl JsonFileProgressStore {
    /// Store rooted at `root`, scoped to one environment subdirectory.
    ///
    /// The directory is created lazily on the first save.
    pub fn new(root: impl Into<PathBuf>, environment: &str) -> Result<Self> {
        if !is_safe_key(environment) {
            return Err(StorageError::invalid_environment(environment));
        }
        Ok(Self {
            dir: root.into().join(environment),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, batch_id: &BatchId) -> Result<PathBuf> {
        if !batch_id.is_storage_safe() {
            return Err(StorageError::invalid_batch_id(batch_id));
        }
        Ok(self.dir.join(format!("{}.{}", batch_id, EXTENSION)))
    }
}

#[async_trait]
impl ProgressStore for JsonFileProgressStore {
    async fn save(&self, doc: &CheckpointDocument) -> Result<()> {
        let path = self.path_for(&doc.batch_id)?;
        let bytes = serde_json::to_vec_pretty(doc)?;

        fs::create_dir_all(&self.dir).await?;

        // Atomic write: tmp file + rename
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp_path, &path).await?;

        debug!(
            batch_id = %doc.batch_id,
            path = %path.display(),
            bytes = bytes.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, batch_id: &BatchId) -> Result<Option<CheckpointDocument>> {
        let path = self.path_for(batch_id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let doc: CheckpointDocument = serde_json::from_str(&content).map_err(|e| {
            StorageError::corrupt_checkpoint(batch_id, format!("{} ({})", e, path.display()))
                .caused_by(e)
        })?;

        validate_loaded(batch_id, doc).map(Some)
    }

    async fn delete(&self, batch_id: &BatchId) -> Result<()> {
        let path = self.path_for(batch_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(EXTENSION) {
                continue;
            }

            let parsed = match fs::read_to_string(&path).await {
                Ok(content) => serde_json::from_str::<CheckpointSummary>(&content)
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match parsed {
                Ok(summary) => summaries.push(summary),
                Err(reason) => {
                    warn!(path = %path.display(), "skipping unreadable checkpoint: {}", reason)
                }
            }
        }

        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}
