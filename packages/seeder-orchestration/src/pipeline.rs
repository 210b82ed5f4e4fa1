use crate::index_map::{StageFailure, StageSuccess, Submission};
use crate::poller::PollProgress;
use crate::record::{ConfirmedOrder, RecordSpec};
use crate::stage::StageId;
use async_trait::async_trait;
use seeder_storage::{BatchId, GroupingRecord};
use std::sync::Arc;
use tracing::info;

/// Raw output of one stage collaborator call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub successes: Vec<StageSuccess>,
    pub failures: Vec<StageFailure>,
}

/// Progress sink for stage and ingestion updates
pub trait ProgressReporter: Send + Sync {
    fn on_stage_progress(&self, stage: StageId, current: usize, total: usize);

    fn on_ingestion_progress(&self, _progress: &PollProgress) {}
}

/// Logs progress through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn on_stage_progress(&self, stage: StageId, current: usize, total: usize) {
        info!("Stage {} ({}): {}/{}", stage.number(), stage, current, total);
    }

    fn on_ingestion_progress(&self, progress: &PollProgress) {
        info!(
            "Ingestion: {}/{} found after {}ms",
            progress.found, progress.total, progress.elapsed_ms
        );
    }
}

/// Progress handle given to a collaborator
///
/// Collaborators report how many of *their* submissions are done; the handle
/// adds the records a previous run already finished so displays show the
/// whole stage.
#[derive(Clone)]
pub struct StageProgress {
    stage: StageId,
    offset: usize,
    total: usize,
    reporter: Arc<dyn ProgressReporter>,
}

impl StageProgress {
    pub fn new(
        stage: StageId,
        offset: usize,
        total: usize,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            stage,
            offset,
            total,
            reporter,
        }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn advance(&self, done_this_run: usize) {
        self.reporter
            .on_stage_progress(self.stage, self.offset + done_this_run, self.total);
    }
}

/// Stage 1: remote order creation
#[async_trait]
pub trait OrderStage: Send + Sync {
    /// Create one order per submission.
    ///
    /// Successes must echo the submission key. Failures carry the submission
    /// index. Returning `Err` means the stage as a whole could not run.
    async fn create_orders(
        &self,
        submissions: &[Submission<RecordSpec>],
        progress: &StageProgress,
    ) -> anyhow::Result<StageReport>;
}

/// Stage 2 in direct mode: downstream entity creation
#[async_trait]
pub trait EntityStage: Send + Sync {
    /// Submissions are keyed by the stage-1 external id. Successes report the
    /// downstream id and the sub-records each entity owns.
    async fn create_entities(
        &self,
        submissions: &[Submission<ConfirmedOrder>],
        progress: &StageProgress,
    ) -> anyhow::Result<StageReport>;
}

/// Optional stage 3
#[async_trait]
pub trait GroupingStage: Send + Sync {
    async fn create_grouping(
        &self,
        region: &str,
        downstream_ids: &[String],
    ) -> anyhow::Result<GroupingRecord>;
}

/// What the operator is asked before a stage runs on a partial subset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuePrompt {
    pub batch_id: BatchId,
    pub next_stage: StageId,
    pub succeeded: usize,
    pub failed: usize,
}

#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm_continue(&self, prompt: &ContinuePrompt) -> bool;
}

/// Always continue (`auto_confirm: true`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Confirmation for AutoConfirm {
    async fn confirm_continue(&self, _prompt: &ContinuePrompt) -> bool {
        true
    }
}

/// Never continue past a failing stage
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyContinue;

#[async_trait]
impl Confirmation for DenyContinue {
    async fn confirm_continue(&self, _prompt: &ContinuePrompt) -> bool {
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Per-record collaborators
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub external_id: String,
    pub display_number: Option<String>,
    /// False when the order API reported the reference as already used
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEntity {
    pub downstream_id: String,
    pub child_ids: Vec<String>,
    pub created: bool,
}

/// Creates a single order from its reference and payload
#[async_trait]
pub trait OrderCreator: Send + Sync {
    async fn create_order(&self, reference: &str, record: &RecordSpec) -> anyhow::Result<CreatedOrder>;
}

/// Creates a single downstream entity for a confirmed order
#[async_trait]
pub trait EntityCreator: Send + Sync {
    async fn create_entity(&self, order: &ConfirmedOrder) -> anyhow::Result<CreatedEntity>;
}

/// Drives a per-record creator one submission at a time
///
/// A failing record becomes a [`StageFailure`] and the loop moves on.
pub struct Sequential<C>(pub C);

#[async_trait]
impl<C: OrderCreator> OrderStage for Sequential<C> {
    async fn create_orders(
        &self,
        submissions: &[Submission<RecordSpec>],
        progress: &StageProgress,
    ) -> anyhow::Result<StageReport> {
        let mut report = StageReport::default();
        for (done, submission) in submissions.iter().enumerate() {
            match self.0.create_order(&submission.key, &submission.payload).await {
                Ok(order) => {
                    let mut success = StageSuccess::new(&submission.key, order.external_id);
                    success.display_number = order.display_number;
                    success.created = order.created;
                    report.successes.push(success);
                }
                Err(e) => report.failures.push(StageFailure::new(
                    submission.submission_index,
                    submission.payload.identifier(),
                    format!("{:#}", e),
                )),
            }
            progress.advance(done + 1);
        }
        Ok(report)
    }
}

#[async_trait]
impl<C: EntityCreator> EntityStage for Sequential<C> {
    async fn create_entities(
        &self,
        submissions: &[Submission<ConfirmedOrder>],
        progress: &StageProgress,
    ) -> anyhow::Result<StageReport> {
        let mut report = StageReport::default();
        for (done, submission) in submissions.iter().enumerate() {
            let order = &submission.payload;
            match self.0.create_entity(order).await {
                Ok(entity) => {
                    let mut success = StageSuccess::new(&submission.key, &order.external_id)
                        .with_downstream(entity.downstream_id, entity.child_ids);
                    success.display_number = order.display_number.clone();
                    success.created = entity.created;
                    report.successes.push(success);
                }
                Err(e) => report.failures.push(StageFailure::new(
                    submission.submission_index,
                    order.identifier(),
                    format!("{:#}", e),
                )),
            }
            progress.advance(done + 1);
        }
        Ok(report)
    }
}
