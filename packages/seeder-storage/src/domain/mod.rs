//! Domain layer for checkpoint persistence
//!
//! # Domain Models
//!
//! - `BatchId`: storage key of one seeding batch
//! - `CheckpointDocument`: per-stage success/failure state of a batch
//! - `StageOutcome`: the `successful` / `failed` pair of one stage
//! - `CheckpointSummary`: listing entry (`batch_id`, `timestamp`)
//!
//! # Port Trait
//!
//! - `ProgressStore`: save / load / delete / list of whole documents
//!
//! # Invariants
//!
//! Within a stage, every successful `original_index` is unique, and the
//! successful and failed sets never share an original index. Documents that
//! break this are reported as corrupt on load rather than repaired.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Identifier of one seeding batch
///
/// Also the storage key, so file-backed stores only accept ids made of ASCII
/// letters, digits, `-`, `_` and `.` (see [`BatchId::is_storage_safe`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id can be used verbatim as a file name.
    pub fn is_storage_safe(&self) -> bool {
        is_safe_key(&self.0)
    }
}

/// Non-empty, no leading dot, only ASCII letters, digits, `-`, `_` and `.`.
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Where a failed record sits
///
/// Failures normally map back to the caller's original ordering. A failure
/// whose submission index could not be mapped keeps the submission-relative
/// index so it is still reported rather than lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "space", content = "index", rename_all = "snake_case")]
pub enum RecordPosition {
    Original(usize),
    Submission(usize),
}

impl RecordPosition {
    pub fn original_index(&self) -> Option<usize> {
        match self {
            RecordPosition::Original(idx) => Some(*idx),
            RecordPosition::Submission(_) => None,
        }
    }
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordPosition::Original(idx) => write!(f, "#{}", idx),
            RecordPosition::Submission(idx) => write!(f, "submission #{} (unmapped)", idx),
        }
    }
}

/// A record confirmed by one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRecord {
    /// Position in the caller's original record list
    pub original_index: usize,
    /// Identifier assigned by the remote order API
    pub external_id: String,
    /// Human-facing order number (stage 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_number: Option<String>,
    /// Downstream entity id (stage 2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downstream_id: Option<String>,
    /// Dependent sub-records owned by this record (stage 2)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<String>,
    /// False when the stage found the record already present
    #[serde(default = "default_created")]
    pub created: bool,
}

fn default_created() -> bool {
    true
}

impl SuccessRecord {
    pub fn new(original_index: usize, external_id: impl Into<String>) -> Self {
        Self {
            original_index,
            external_id: external_id.into(),
            display_number: None,
            downstream_id: None,
            child_ids: Vec::new(),
            created: true,
        }
    }
}

/// A record a stage could not produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub position: RecordPosition,
    /// Identifying field reported by the stage (customer email, order number, ...)
    pub identifier: String,
    pub error_message: String,
}

impl FailureRecord {
    pub fn new(
        position: RecordPosition,
        identifier: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            position,
            identifier: identifier.into(),
            error_message: error_message.into(),
        }
    }
}

/// Success/failure sets of one stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    #[serde(default)]
    pub successful: Vec<SuccessRecord>,
    #[serde(default)]
    pub failed: Vec<FailureRecord>,
}

impl StageOutcome {
    pub fn is_empty(&self) -> bool {
        self.successful.is_empty() && self.failed.is_empty()
    }

    /// Original indices already confirmed by this stage
    pub fn successful_indices(&self) -> HashSet<usize> {
        self.successful.iter().map(|s| s.original_index).collect()
    }

    pub fn find_success(&self, original_index: usize) -> Option<&SuccessRecord> {
        self.successful
            .iter()
            .find(|s| s.original_index == original_index)
    }

    /// Check uniqueness of successful indices and success/failure disjointness.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for success in &self.successful {
            if !seen.insert(success.original_index) {
                return Err(format!(
                    "duplicate successful entry for original index {}",
                    success.original_index
                ));
            }
        }
        for failure in &self.failed {
            if let Some(idx) = failure.position.original_index() {
                if seen.contains(&idx) {
                    return Err(format!(
                        "original index {} is both successful and failed",
                        idx
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Grouping record referencing every stage-2 entity of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingRecord {
    pub id: String,
    pub region: String,
}

/// Persisted per-batch progress
///
/// # Examples
///
/// ```rust
/// use seeder_storage::domain::{BatchId, CheckpointDocument};
///
/// let doc = CheckpointDocument::new(BatchId::new("batch-20240101-ab12cd34"));
/// assert!(doc.stage1.is_empty());
/// assert!(doc.grouping_record.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDocument {
    pub batch_id: BatchId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub stage1: StageOutcome,
    #[serde(default)]
    pub stage2: StageOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping_record: Option<GroupingRecord>,
}

impl CheckpointDocument {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            timestamp: Utc::now(),
            stage1: StageOutcome::default(),
            stage2: StageOutcome::default(),
            grouping_record: None,
        }
    }

    /// Refresh the timestamp before a save.
    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }

    pub fn has_failures(&self) -> bool {
        !self.stage1.failed.is_empty() || !self.stage2.failed.is_empty()
    }

    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        self.stage1
            .check_invariants()
            .map_err(|e| format!("stage1: {}", e))?;
        self.stage2
            .check_invariants()
            .map_err(|e| format!("stage2: {}", e))
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            batch_id: self.batch_id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Listing entry returned by [`ProgressStore::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub batch_id: BatchId,
    pub timestamp: DateTime<Utc>,
}

/// Sort newest first; ties broken by batch id for a stable listing.
pub fn sort_newest_first(summaries: &mut [CheckpointSummary]) {
    summaries.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.batch_id.cmp(&b.batch_id))
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: ProgressStore
// ═══════════════════════════════════════════════════════════════════════════

/// Durable checkpoint storage keyed by batch id
///
/// # Implementations
///
/// - `JsonFileProgressStore`: one JSON file per batch, directory per environment
/// - `InMemoryProgressStore`: tests and dry runs
/// - `SqliteProgressStore` (`sqlite` feature): single-table store
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Write the whole document, replacing any previous one for its batch id.
    async fn save(&self, doc: &CheckpointDocument) -> Result<()>;

    /// Load a document.
    ///
    /// # Errors
    ///
    /// Returns a `CorruptCheckpoint` error when a document exists but cannot be
    /// parsed, belongs to another batch id, or violates the stage invariants.
    /// A missing document is `Ok(None)`.
    async fn load(&self, batch_id: &BatchId) -> Result<Option<CheckpointDocument>>;

    /// Remove a document. Missing documents are not an error.
    async fn delete(&self, batch_id: &BatchId) -> Result<()>;

    /// All stored checkpoints, newest first.
    async fn list(&self) -> Result<Vec<CheckpointSummary>>;
}

/// Shared validation for freshly parsed documents.
pub(crate) fn validate_loaded(
    requested: &BatchId,
    doc: CheckpointDocument,
) -> Result<CheckpointDocument> {
    if &doc.batch_id != requested {
        return Err(crate::StorageError::corrupt_checkpoint(
            requested,
            format!("document belongs to batch {}", doc.batch_id),
        ));
    }
    doc.check_invariants()
        .map_err(|reason| crate::StorageError::corrupt_checkpoint(requested, reason))?;
    Ok(doc)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
