//! Seeder checkpoint storage
//!
//! Durable, whole-document persistence of seeding progress, keyed by batch id.
//!
//! ## Core Principles
//!
//! 1. **Whole-document writes**: a checkpoint is replaced atomically, never patched
//! 2. **Corrupt is not absent**: an unreadable checkpoint is an error, never `None`
//! 3. **Port first**: the engine only sees the `ProgressStore` trait
//!
//! ## Usage
//!
//! ```rust,ignore
//! use seeder_storage::{BatchId, CheckpointDocument, JsonFileProgressStore, ProgressStore};
//!
//! let store = JsonFileProgressStore::new(".seed-progress", "staging")?;
//! let doc = CheckpointDocument::new(BatchId::new("batch-20240101120000-1a2b3c4d"));
//! store.save(&doc).await?;
//!
//! for summary in store.list().await? {
//!     println!("{} {}", summary.batch_id, summary.timestamp);
//! }
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    BatchId, CheckpointDocument, CheckpointSummary, FailureRecord, GroupingRecord,
    ProgressStore, RecordPosition, StageOutcome, SuccessRecord,
};
pub use infrastructure::{InMemoryProgressStore, JsonFileProgressStore};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteProgressStore;
