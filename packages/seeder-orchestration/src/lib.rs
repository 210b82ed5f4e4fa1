/*
 * Seeder Orchestration - Resumable multi-stage record seeding
 *
 * Seeds linked test records into a remote order API and a downstream
 * operational database, one staging batch at a time.
 *
 * Architecture:
 * - Index mapping (original / submission / result coordinate spaces)
 * - Checkpoint/Resume via seeder-storage ProgressStore
 * - Ingestion poller (bounded wait for webhook-driven records)
 * - Seeding engine (order → entity → optional grouping)
 * - Failure collection (continue-on-error, enumerated reports)
 */

// Public modules
pub mod config;
pub mod error;
pub mod failures;
pub mod index_map;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod poller;
pub mod record;
pub mod stage;

// Re-exports
pub use config::{ConfigError, EnvironmentGuard, GroupingConfig, IngestionConfig, SeederConfig};
pub use error::{EngineError, ErrorCategory, ResumeHint, Result};
pub use failures::{CollectedFailure, FailureCollector};
pub use index_map::{
    build_submission_set, mark_unreported, merge_outcomes, reconcile_results, StageFailure,
    StageSuccess, Submission, SubmissionSet, UNREPORTED,
};
pub use logging::LogConfig;
pub use orchestrator::{
    CheckpointDisposition, DownstreamMode, RunReport, SeedingEngine, StageSummary,
};
pub use pipeline::{
    AutoConfirm, Confirmation, ContinuePrompt, CreatedEntity, CreatedOrder, DenyContinue,
    EntityCreator, EntityStage, GroupingStage, OrderCreator, OrderStage, ProgressReporter,
    Sequential, StageProgress, StageReport, TracingProgress,
};
pub use poller::{
    IngestedRecord, IngestionPoller, IngestionSource, PollOutcome, PollProgress, PollState,
    PollerError, PollerOptions, PrimaryRecord,
};
pub use record::{
    new_batch_id, ConfirmedOrder, CustomerSpec, Indexed, LineItemSpec, OrderSpec, RecordSpec,
    SeedBatch,
};
pub use stage::StageId;

pub use seeder_storage::{
    BatchId, CheckpointDocument, CheckpointSummary, FailureRecord, GroupingRecord,
    InMemoryProgressStore, JsonFileProgressStore, ProgressStore, RecordPosition, StageOutcome,
    SuccessRecord,
};
