use crate::config::ConfigError;
use crate::stage::StageId;
use seeder_storage::{BatchId, FailureRecord, StorageError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Batch id plus the exact invocation that resumes it
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResumeHint {
    pub batch_id: BatchId,
    pub command: String,
}

impl ResumeHint {
    /// Render `template`, replacing every `{batch_id}` placeholder.
    pub fn new(batch_id: BatchId, template: &str) -> Self {
        let command = template.replace("{batch_id}", batch_id.as_str());
        Self { batch_id, command }
    }
}

impl std::fmt::Display for ResumeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch {}; resume with: {}", self.batch_id, self.command)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Environment check failed: {0}")]
    Environment(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("No checkpoint found for batch {batch_id}")]
    CheckpointNotFound { batch_id: BatchId },

    #[error("Refusing to resume batch {batch_id}: {source}")]
    CorruptCheckpoint {
        batch_id: BatchId,
        #[source]
        source: StorageError,
    },

    #[error("Failed to persist checkpoint ({resume}): {source}")]
    Storage {
        resume: ResumeHint,
        #[source]
        source: StorageError,
    },

    #[error("Stage {stage} collaborator failed: {reason} ({resume})")]
    Collaborator {
        stage: StageId,
        reason: String,
        resume: ResumeHint,
    },

    #[error("Stage {stage}: every submitted record failed ({count} failures) ({resume})", count = .failures.len())]
    TotalStageFailure {
        stage: StageId,
        failures: Vec<FailureRecord>,
        resume: ResumeHint,
    },

    #[error("Run aborted before stage {stage}: continuation was declined ({resume})")]
    Aborted { stage: StageId, resume: ResumeHint },

    #[error(
        "Timed out after {elapsed_ms}ms waiting for {count} downstream records: {ids} ({resume})",
        count = .missing.len(),
        ids = .missing.join(", ")
    )]
    IngestionTimeout {
        missing: Vec<String>,
        elapsed_ms: u64,
        resume: ResumeHint,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EngineError {
    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Environment(_) | EngineError::InvalidBatch(_) => {
                ErrorCategory::Environment
            }
            EngineError::CheckpointNotFound { .. } | EngineError::Storage { .. } => {
                ErrorCategory::Storage
            }
            EngineError::CorruptCheckpoint { .. } => ErrorCategory::CorruptCheckpoint,
            EngineError::Collaborator { .. } => ErrorCategory::Collaborator,
            EngineError::TotalStageFailure { .. } => ErrorCategory::TotalStageFailure,
            EngineError::Aborted { .. } => ErrorCategory::Aborted,
            EngineError::IngestionTimeout { .. } => ErrorCategory::DownstreamTimeout,
            EngineError::Config(_) | EngineError::Parse(_) => ErrorCategory::Config,
        }
    }

    /// Resume instructions, when the failure left a resumable checkpoint.
    pub fn resume_hint(&self) -> Option<&ResumeHint> {
        match self {
            EngineError::Storage { resume, .. }
            | EngineError::Collaborator { resume, .. }
            | EngineError::TotalStageFailure { resume, .. }
            | EngineError::Aborted { resume, .. }
            | EngineError::IngestionTimeout { resume, .. } => Some(resume),
            _ => None,
        }
    }

    pub fn batch_id(&self) -> Option<&BatchId> {
        match self {
            EngineError::CheckpointNotFound { batch_id }
            | EngineError::CorruptCheckpoint { batch_id, .. } => Some(batch_id),
            other => other.resume_hint().map(|hint| &hint.batch_id),
        }
    }
}

/// Error taxonomy surfaced to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Guardrail or input rejection before any stage ran
    Environment,
    /// Stored checkpoint unreadable; never treated as "no checkpoint"
    CorruptCheckpoint,
    /// One record failed; recorded, never raised
    PerRecord,
    /// Every submitted record of a stage failed
    TotalStageFailure,
    /// Ingestion poller deadline elapsed
    DownstreamTimeout,
    /// Operator declined to continue after failures
    Aborted,
    /// A stage collaborator failed as a whole
    Collaborator,
    /// Checkpoint persistence failed
    Storage,
    /// Configuration could not be loaded or validated
    Config,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Environment => "environment",
            ErrorCategory::CorruptCheckpoint => "corrupt_checkpoint",
            ErrorCategory::PerRecord => "per_record",
            ErrorCategory::TotalStageFailure => "total_stage_failure",
            ErrorCategory::DownstreamTimeout => "downstream_timeout",
            ErrorCategory::Aborted => "aborted",
            ErrorCategory::Collaborator => "collaborator",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Config => "config",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "environment" => Ok(ErrorCategory::Environment),
            "corrupt_checkpoint" => Ok(ErrorCategory::CorruptCheckpoint),
            "per_record" => Ok(ErrorCategory::PerRecord),
            "total_stage_failure" => Ok(ErrorCategory::TotalStageFailure),
            "downstream_timeout" => Ok(ErrorCategory::DownstreamTimeout),
            "aborted" => Ok(ErrorCategory::Aborted),
            "collaborator" => Ok(ErrorCategory::Collaborator),
            "storage" => Ok(ErrorCategory::Storage),
            "config" => Ok(ErrorCategory::Config),
            _ => Err(EngineError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }

    /// Whether a later `--resume` can pick the batch up again.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::TotalStageFailure
                | ErrorCategory::DownstreamTimeout
                | ErrorCategory::Aborted
                | ErrorCategory::Collaborator
                | ErrorCategory::Storage
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seeder_storage::RecordPosition;

    fn hint() -> ResumeHint {
        ResumeHint::new(BatchId::new("batch-1"), "seed-orders --resume {batch_id}")
    }

    #[test]
    fn test_error_category_roundtrip() {
        for category in &[
            ErrorCategory::Environment,
            ErrorCategory::CorruptCheckpoint,
            ErrorCategory::PerRecord,
            ErrorCategory::TotalStageFailure,
            ErrorCategory::DownstreamTimeout,
            ErrorCategory::Aborted,
            ErrorCategory::Collaborator,
            ErrorCategory::Storage,
            ErrorCategory::Config,
        ] {
            let parsed = ErrorCategory::from_str(category.as_str()).unwrap();
            assert_eq!(*category, parsed);
        }
    }

    #[test]
    fn test_error_category_invalid() {
        assert!(ErrorCategory::from_str("transient").is_err());
    }

    #[test]
    fn test_resume_hint_renders_template() {
        let hint = hint();
        assert_eq!(hint.command, "seed-orders --resume batch-1");
        assert_eq!(
            hint.to_string(),
            "batch batch-1; resume with: seed-orders --resume batch-1"
        );
    }

    #[test]
    fn test_fatal_errors_carry_resume_invocation() {
        let err = EngineError::TotalStageFailure {
            stage: StageId::RemoteOrder,
            failures: vec![
                FailureRecord::new(RecordPosition::Original(0), "a@example.com", "422"),
                FailureRecord::new(RecordPosition::Original(1), "b@example.com", "422"),
            ],
            resume: hint(),
        };

        let msg = err.to_string();
        assert!(msg.contains("2 failures"));
        assert!(msg.contains("seed-orders --resume batch-1"));
        assert_eq!(err.category(), ErrorCategory::TotalStageFailure);
        assert_eq!(err.batch_id().map(|b| b.as_str()), Some("batch-1"));
    }

    #[test]
    fn test_timeout_lists_missing_ids() {
        let err = EngineError::IngestionTimeout {
            missing: vec!["gid://shop/Order/7".to_string()],
            elapsed_ms: 30_000,
            resume: hint(),
        };
        assert!(err.to_string().contains("gid://shop/Order/7"));
        assert!(err.category().is_resumable());
    }

    #[test]
    fn test_environment_error_has_no_resume() {
        let err = EngineError::Environment("production is not allowed".to_string());
        assert!(err.resume_hint().is_none());
        assert!(!err.category().is_resumable());
    }
}
