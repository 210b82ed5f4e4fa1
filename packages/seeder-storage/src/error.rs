//! Checkpoint storage errors

use std::fmt;
use thiserror::Error;

/// What went wrong while reading or writing a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The SQLite backend rejected a statement
    Backend,
    /// A document could not be encoded for writing
    Encode,
    /// Present on disk (or in a row) but unreadable or inconsistent
    CorruptCheckpoint,
    /// The key is unusable as a file name or row key
    InvalidKey,
    /// Filesystem failure other than "not found"
    Filesystem,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Encode => "encode",
            Self::CorruptCheckpoint => "corrupt_checkpoint",
            Self::InvalidKey => "invalid_key",
            Self::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a [`crate::ProgressStore`] backend.
///
/// `batch_id` is set whenever the failure concerns one specific checkpoint.
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct StorageError {
    pub kind: ErrorKind,
    pub detail: String,
    pub batch_id: Option<String>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            batch_id: None,
            cause: None,
        }
    }

    /// Attach the underlying error
    pub fn caused_by(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn for_batch(mut self, batch_id: impl fmt::Display) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    pub fn corrupt_checkpoint(batch_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            ErrorKind::CorruptCheckpoint,
            format!("checkpoint for {} cannot be trusted ({})", batch_id, reason),
        )
        .for_batch(batch_id)
    }

    pub fn invalid_batch_id(batch_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidKey,
            format!(
                "batch id '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
                batch_id
            ),
        )
        .for_batch(batch_id)
    }

    pub fn invalid_environment(environment: &str) -> Self {
        Self::new(
            ErrorKind::InvalidKey,
            format!("environment '{}' is not a usable directory name", environment),
        )
    }

    pub fn is_corrupt_checkpoint(&self) -> bool {
        self.kind == ErrorKind::CorruptCheckpoint
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::new(ErrorKind::Backend, err.to_string()).caused_by(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::new(ErrorKind::Encode, err.to_string()).caused_by(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::Filesystem, err.to_string()).caused_by(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
