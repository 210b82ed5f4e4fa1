use crate::config::{EnvironmentGuard, SeederConfig};
use crate::error::{EngineError, ResumeHint, Result};
use crate::failures::FailureCollector;
use crate::index_map::{
    build_submission_set, mark_unreported, merge_outcomes, reconcile_results, StageFailure,
    StageSuccess, SubmissionSet,
};
use crate::pipeline::{
    AutoConfirm, Confirmation, ContinuePrompt, DenyContinue, EntityStage, GroupingStage,
    OrderStage, ProgressReporter, StageProgress, TracingProgress,
};
use crate::poller::{IngestionPoller, IngestionSource, PollProgress, PollerError, PollerOptions};
use crate::record::{check_indices, new_batch_id, ConfirmedOrder, RecordSpec};
use crate::stage::StageId;
use seeder_storage::{
    BatchId, CheckpointDocument, GroupingRecord, ProgressStore, RecordPosition, StageOutcome,
    SuccessRecord,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// How stage 2 gets its downstream entities
pub enum DownstreamMode {
    /// Create each entity through a collaborator
    Direct(Arc<dyn EntityStage>),
    /// The downstream system ingests orders on its own; wait for it
    Ingestion {
        source: Arc<dyn IngestionSource>,
        options: PollerOptions,
    },
}

struct GroupingPlan {
    stage: Arc<dyn GroupingStage>,
    region: String,
}

/// Per-stage counts for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub stage: StageId,
    /// Records sent to the collaborator this run
    pub submitted: usize,
    /// Records skipped because a previous run already confirmed them
    pub previously_done: usize,
    pub created: usize,
    /// Confirmed this run but reported as already existing
    pub reused: usize,
    pub failed: usize,
    /// Every success for the stage after merging with the checkpoint
    pub successful: Vec<SuccessRecord>,
}

impl StageSummary {
    fn new(
        stage: StageId,
        submitted: usize,
        previously_done: usize,
        fresh: &StageOutcome,
        merged: &StageOutcome,
    ) -> Self {
        let created = fresh.successful.iter().filter(|s| s.created).count();
        Self {
            stage,
            submitted,
            previously_done,
            created,
            reused: fresh.successful.len() - created,
            failed: merged.failed.len(),
            successful: merged.successful.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointDisposition {
    /// Clean run; checkpoint deleted
    Cleared,
    /// Failures remain (or deletion failed); checkpoint kept for resume
    Retained,
}

/// Outcome of a run that reached the end of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub batch_id: BatchId,
    pub resumed: bool,
    pub stages: Vec<StageSummary>,
    pub grouping_record: Option<GroupingRecord>,
    pub failures: FailureCollector,
    pub checkpoint: CheckpointDisposition,
    pub resume: ResumeHint,
}

impl RunReport {
    /// No failures left in any stage.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn stage(&self, stage: StageId) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Records newly written across all stages
    pub fn created(&self) -> usize {
        self.stages.iter().map(|s| s.created).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Batch {}{}",
            self.batch_id,
            if self.resumed { " (resumed)" } else { "" }
        )?;
        for s in &self.stages {
            writeln!(
                f,
                "  Stage {} ({}): {} submitted, {} previously done, {} created, {} already existed, {} failed",
                s.stage.number(),
                s.stage,
                s.submitted,
                s.previously_done,
                s.created,
                s.reused,
                s.failed
            )?;
        }
        if let Some(grouping) = &self.grouping_record {
            writeln!(f, "  Grouping {} ({})", grouping.id, grouping.region)?;
        }
        if !self.failures.is_empty() {
            f.write_str(&self.failures.render_report())?;
        }
        if self.checkpoint == CheckpointDisposition::Retained {
            writeln!(f, "Checkpoint kept; resume with: {}", self.resume.command)?;
        }
        Ok(())
    }
}

/// Runs the fixed order → entity → grouping pipeline for one batch
///
/// Every stage persists the merged checkpoint before anything else happens,
/// so a crash between stages never loses confirmed work. Records already
/// successful in a stage are never submitted to it again.
pub struct SeedingEngine {
    store: Arc<dyn ProgressStore>,
    orders: Arc<dyn OrderStage>,
    downstream: DownstreamMode,
    grouping: Option<GroupingPlan>,
    confirmation: Arc<dyn Confirmation>,
    reporter: Arc<dyn ProgressReporter>,
    guard: EnvironmentGuard,
    resume_template: String,
}

impl SeedingEngine {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        orders: Arc<dyn OrderStage>,
        downstream: DownstreamMode,
    ) -> Self {
        let defaults = SeederConfig::default();
        Self {
            store,
            orders,
            downstream,
            grouping: None,
            confirmation: Arc::new(DenyContinue),
            reporter: Arc::new(TracingProgress),
            guard: defaults.guard(),
            resume_template: defaults.resume_command,
        }
    }

    /// Apply guard, resume template, confirmation policy, poller options and
    /// grouping region from a loaded configuration.
    pub fn with_config(mut self, config: &SeederConfig) -> Self {
        self.guard = config.guard();
        self.resume_template = config.resume_command.clone();
        if config.auto_confirm {
            self.confirmation = Arc::new(AutoConfirm);
        }
        if let DownstreamMode::Ingestion { options, .. } = &mut self.downstream {
            *options = config.ingestion.poller_options();
        }
        if let (Some(plan), Some(grouping)) = (&mut self.grouping, &config.grouping) {
            plan.region = grouping.region.clone();
        }
        self
    }

    pub fn with_grouping(mut self, stage: Arc<dyn GroupingStage>, region: impl Into<String>) -> Self {
        self.grouping = Some(GroupingPlan {
            stage,
            region: region.into(),
        });
        self
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn Confirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_guard(mut self, guard: EnvironmentGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_resume_command(mut self, template: impl Into<String>) -> Self {
        self.resume_template = template.into();
        self
    }

    pub fn resume_hint(&self, batch_id: &BatchId) -> ResumeHint {
        ResumeHint::new(batch_id.clone(), &self.resume_template)
    }

    /// Seed `records` under a fresh batch id.
    pub async fn run(&self, records: &[RecordSpec]) -> Result<RunReport> {
        self.run_with_id(new_batch_id(), records).await
    }

    /// Seed `records` under a caller-chosen batch id.
    ///
    /// Refuses ids that already have a checkpoint; those must be resumed.
    pub async fn run_with_id(&self, batch_id: BatchId, records: &[RecordSpec]) -> Result<RunReport> {
        self.preflight(&batch_id, records)?;
        let span = info_span!("seed_batch", batch_id = %batch_id, resumed = false);
        self.execute(batch_id, records, false).instrument(span).await
    }

    /// Continue a batch from its checkpoint.
    ///
    /// `records` must be the same ordered list the batch was started with.
    pub async fn resume(&self, batch_id: &BatchId, records: &[RecordSpec]) -> Result<RunReport> {
        self.preflight(batch_id, records)?;
        let span = info_span!("seed_batch", batch_id = %batch_id, resumed = true);
        self.execute(batch_id.clone(), records, true)
            .instrument(span)
            .await
    }

    fn preflight(&self, batch_id: &BatchId, records: &[RecordSpec]) -> Result<()> {
        self.guard.check().map_err(EngineError::Environment)?;
        if records.is_empty() {
            return Err(EngineError::InvalidBatch("no records to seed".to_string()));
        }
        check_indices(records).map_err(EngineError::InvalidBatch)?;
        if !batch_id.is_storage_safe() {
            return Err(EngineError::InvalidBatch(format!(
                "batch id '{}' is not usable as a storage key",
                batch_id
            )));
        }
        Ok(())
    }

    async fn execute(
        &self,
        batch_id: BatchId,
        records: &[RecordSpec],
        resumed: bool,
    ) -> Result<RunReport> {
        let resume = self.resume_hint(&batch_id);

        let existing = self.load_checkpoint(&batch_id, &resume).await?;
        let mut doc = match (resumed, existing) {
            (true, Some(doc)) => {
                info!(
                    "Resuming batch {}: stage 1 {} done / {} failed, stage 2 {} done / {} failed",
                    batch_id,
                    doc.stage1.successful.len(),
                    doc.stage1.failed.len(),
                    doc.stage2.successful.len(),
                    doc.stage2.failed.len()
                );
                doc
            }
            (true, None) => return Err(EngineError::CheckpointNotFound { batch_id }),
            (false, Some(_)) => {
                return Err(EngineError::InvalidBatch(format!(
                    "a checkpoint already exists for batch {}; resume it instead",
                    batch_id
                )))
            }
            (false, None) => {
                info!("Starting batch {} with {} records", batch_id, records.len());
                CheckpointDocument::new(batch_id.clone())
            }
        };
        drop_out_of_range(&mut doc, records.len());

        let mut failures = FailureCollector::new();
        let mut stages = Vec::with_capacity(2);

        let stage1 = self.run_order_stage(&mut doc, records, &resume).await?;
        failures.extend(StageId::RemoteOrder, doc.stage1.failed.iter().cloned());
        stages.push(stage1);

        self.confirm(&doc, StageId::DownstreamEntity, &doc.stage1, &resume)
            .await?;

        let confirmed = confirmed_orders(&doc, records);
        let stage2 = match &self.downstream {
            DownstreamMode::Direct(entities) => {
                self.run_entity_stage(&mut doc, &confirmed, entities.as_ref(), &resume)
                    .await?
            }
            DownstreamMode::Ingestion { source, options } => {
                self.run_ingestion_stage(&mut doc, &confirmed, source.clone(), options, &resume)
                    .await?
            }
        };
        failures.extend(StageId::DownstreamEntity, doc.stage2.failed.iter().cloned());
        stages.push(stage2);

        if let Some(plan) = &self.grouping {
            if doc.has_failures() {
                warn!(
                    "Grouping deferred: batch {} still has {} failed records",
                    batch_id,
                    failures.total()
                );
            } else {
                self.run_grouping(&mut doc, plan, &resume).await?;
            }
        }

        let checkpoint = if doc.has_failures() {
            warn!(
                "Batch {} finished with {} failed records; {}",
                batch_id,
                failures.total(),
                resume
            );
            CheckpointDisposition::Retained
        } else {
            match self.store.delete(&batch_id).await {
                Ok(()) => {
                    info!("Batch {} complete; checkpoint cleared", batch_id);
                    CheckpointDisposition::Cleared
                }
                Err(e) => {
                    warn!("Batch {} complete but checkpoint delete failed: {}", batch_id, e);
                    CheckpointDisposition::Retained
                }
            }
        };

        Ok(RunReport {
            batch_id,
            resumed,
            stages,
            grouping_record: doc.grouping_record.clone(),
            failures,
            checkpoint,
            resume,
        })
    }

    async fn load_checkpoint(
        &self,
        batch_id: &BatchId,
        resume: &ResumeHint,
    ) -> Result<Option<CheckpointDocument>> {
        match self.store.load(batch_id).await {
            Ok(doc) => Ok(doc),
            Err(source) if source.is_corrupt_checkpoint() => {
                error!("Checkpoint for batch {} is corrupt: {}", batch_id, source);
                Err(EngineError::CorruptCheckpoint {
                    batch_id: batch_id.clone(),
                    source,
                })
            }
            Err(source) => Err(EngineError::Storage {
                resume: resume.clone(),
                source,
            }),
        }
    }

    async fn persist(&self, doc: &mut CheckpointDocument, resume: &ResumeHint) -> Result<()> {
        doc.touch();
        self.store.save(doc).await.map_err(|source| {
            error!("Failed to save checkpoint for batch {}: {}", doc.batch_id, source);
            EngineError::Storage {
                resume: resume.clone(),
                source,
            }
        })
    }

    fn progress(&self, stage: StageId, offset: usize, total: usize) -> StageProgress {
        StageProgress::new(stage, offset, total, self.reporter.clone())
    }

    async fn run_order_stage(
        &self,
        doc: &mut CheckpointDocument,
        records: &[RecordSpec],
        resume: &ResumeHint,
    ) -> Result<StageSummary> {
        let stage = StageId::RemoteOrder;
        let batch_id = doc.batch_id.clone();
        let set = build_submission_set(records, &doc.stage1, |r| r.reference(&batch_id));
        let previously_done = doc.stage1.successful.len();

        let fresh = if set.is_empty() {
            info!("Stage 1: all {} orders already created, skipping", previously_done);
            StageOutcome::default()
        } else {
            info!(
                "Stage 1: submitting {} of {} records ({} already done)",
                set.len(),
                records.len(),
                previously_done
            );
            let progress = self.progress(stage, previously_done, records.len());
            let created = self.orders.create_orders(set.submissions(), &progress).await;
            let mut outcome = match created {
                Ok(report) => reconcile_results(&set, report.successes, report.failures),
                Err(e) => return Err(self.collaborator_failed(doc, stage, e, resume).await),
            };
            mark_unreported(&set, &mut outcome, |r| r.identifier().to_string());
            outcome
        };

        self.finish_stage(doc, stage, set.len(), previously_done, fresh, resume)
            .await
    }

    async fn run_entity_stage(
        &self,
        doc: &mut CheckpointDocument,
        confirmed: &[ConfirmedOrder],
        entities: &dyn EntityStage,
        resume: &ResumeHint,
    ) -> Result<StageSummary> {
        let stage = StageId::DownstreamEntity;
        let set = build_submission_set(confirmed, &doc.stage2, |o| o.external_id.clone());
        let previously_done = doc.stage2.successful.len();

        let fresh = if set.is_empty() {
            info!("Stage 2: all {} entities already created, skipping", previously_done);
            StageOutcome::default()
        } else {
            info!(
                "Stage 2: creating {} downstream entities ({} already done)",
                set.len(),
                previously_done
            );
            let progress = self.progress(stage, previously_done, confirmed.len());
            let created = entities.create_entities(set.submissions(), &progress).await;
            let mut outcome = match created {
                Ok(report) => reconcile_results(&set, report.successes, report.failures),
                Err(e) => return Err(self.collaborator_failed(doc, stage, e, resume).await),
            };
            mark_unreported(&set, &mut outcome, |o| o.identifier().to_string());
            outcome
        };

        self.finish_stage(doc, stage, set.len(), previously_done, fresh, resume)
            .await
    }

    async fn run_ingestion_stage(
        &self,
        doc: &mut CheckpointDocument,
        confirmed: &[ConfirmedOrder],
        source: Arc<dyn IngestionSource>,
        options: &PollerOptions,
        resume: &ResumeHint,
    ) -> Result<StageSummary> {
        let stage = StageId::DownstreamEntity;
        let set = build_submission_set(confirmed, &doc.stage2, |o| o.external_id.clone());
        let previously_done = doc.stage2.successful.len();

        if set.is_empty() {
            info!("Stage 2: all {} orders already ingested, skipping", previously_done);
            return self
                .finish_stage(doc, stage, 0, previously_done, StageOutcome::default(), resume)
                .await;
        }

        let ids: Vec<String> = set.submissions().iter().map(|s| s.key.clone()).collect();
        let poller = IngestionPoller::new(source, options.clone());
        let reporter = self.reporter.clone();
        let stage_total = confirmed.len();
        let polled = poller
            .poll(&ids, |progress| {
                reporter.on_ingestion_progress(&PollProgress {
                    found: previously_done + progress.found,
                    total: stage_total,
                    elapsed_ms: progress.elapsed_ms,
                })
            })
            .await;

        match polled {
            Ok(outcome) => {
                let fresh = ingestion_outcome(&set, outcome.found, &outcome.missing_orders);
                self.finish_stage(doc, stage, set.len(), previously_done, fresh, resume)
                    .await
            }
            Err(PollerError::Timeout {
                missing,
                found,
                elapsed_ms,
            }) => {
                let fresh = ingestion_outcome(&set, found, &missing);
                doc.stage2 = merge_outcomes(&doc.stage2, &fresh);
                self.persist(doc, resume).await?;
                error!(
                    "Stage 2: {} orders not ingested after {}ms",
                    missing.len(),
                    elapsed_ms
                );
                Err(EngineError::IngestionTimeout {
                    missing,
                    elapsed_ms,
                    resume: resume.clone(),
                })
            }
        }
    }

    /// Merge, persist, then apply the all-failed rule.
    async fn finish_stage(
        &self,
        doc: &mut CheckpointDocument,
        stage: StageId,
        submitted: usize,
        previously_done: usize,
        fresh: StageOutcome,
        resume: &ResumeHint,
    ) -> Result<StageSummary> {
        let merged = {
            let slot = stage_slot(doc, stage);
            *slot = merge_outcomes(slot, &fresh);
            slot.clone()
        };
        self.persist(doc, resume).await?;

        for failure in &fresh.failed {
            warn!(
                "Stage {} failed for {} {}: {}",
                stage, failure.position, failure.identifier, failure.error_message
            );
        }

        if submitted > 0 && merged.successful.is_empty() {
            error!("Stage {}: all {} submitted records failed", stage, submitted);
            return Err(EngineError::TotalStageFailure {
                stage,
                failures: merged.failed,
                resume: resume.clone(),
            });
        }

        let summary = StageSummary::new(stage, submitted, previously_done, &fresh, &merged);
        info!(
            "Stage {} done: {} created, {} already existed, {} failed",
            stage, summary.created, summary.reused, summary.failed
        );
        Ok(summary)
    }

    async fn collaborator_failed(
        &self,
        doc: &mut CheckpointDocument,
        stage: StageId,
        cause: anyhow::Error,
        resume: &ResumeHint,
    ) -> EngineError {
        error!("Stage {} collaborator failed: {:#}", stage, cause);
        if let Err(e) = self.persist(doc, resume).await {
            return e;
        }
        EngineError::Collaborator {
            stage,
            reason: format!("{:#}", cause),
            resume: resume.clone(),
        }
    }

    async fn confirm(
        &self,
        doc: &CheckpointDocument,
        next_stage: StageId,
        previous: &StageOutcome,
        resume: &ResumeHint,
    ) -> Result<()> {
        if previous.failed.is_empty() {
            return Ok(());
        }
        let prompt = ContinuePrompt {
            batch_id: doc.batch_id.clone(),
            next_stage,
            succeeded: previous.successful.len(),
            failed: previous.failed.len(),
        };
        if self.confirmation.confirm_continue(&prompt).await {
            info!(
                "Continuing to stage {} with {} records ({} failed)",
                next_stage, prompt.succeeded, prompt.failed
            );
            Ok(())
        } else {
            warn!("Continuation to stage {} declined; {}", next_stage, resume);
            Err(EngineError::Aborted {
                stage: next_stage,
                resume: resume.clone(),
            })
        }
    }

    /// Only called once every record has its entity, so the grouping
    /// record covers the whole batch.
    async fn run_grouping(
        &self,
        doc: &mut CheckpointDocument,
        plan: &GroupingPlan,
        resume: &ResumeHint,
    ) -> Result<()> {
        if let Some(existing) = &doc.grouping_record {
            info!("Grouping record {} already exists, skipping", existing.id);
            return Ok(());
        }

        let ids: Vec<String> = doc
            .stage2
            .successful
            .iter()
            .map(|s| s.downstream_id.clone().unwrap_or_else(|| s.external_id.clone()))
            .collect();
        if ids.is_empty() {
            warn!("No downstream entities to group");
            return Ok(());
        }

        match plan.stage.create_grouping(&plan.region, &ids).await {
            Ok(record) => {
                info!(
                    "Created grouping record {} in {} over {} entities",
                    record.id,
                    record.region,
                    ids.len()
                );
                doc.grouping_record = Some(record);
                self.persist(doc, resume).await
            }
            Err(e) => {
                error!("Grouping record creation failed: {:#}", e);
                Err(EngineError::Collaborator {
                    stage: StageId::Grouping,
                    reason: format!("{:#}", e),
                    resume: resume.clone(),
                })
            }
        }
    }
}

fn stage_slot(doc: &mut CheckpointDocument, stage: StageId) -> &mut StageOutcome {
    match stage {
        StageId::RemoteOrder => &mut doc.stage1,
        _ => &mut doc.stage2,
    }
}

/// Successes whose record no longer exists cannot be trusted.
fn drop_out_of_range(doc: &mut CheckpointDocument, len: usize) {
    for (name, outcome) in [("stage1", &mut doc.stage1), ("stage2", &mut doc.stage2)] {
        outcome.successful.retain(|s| {
            let keep = s.original_index < len;
            if !keep {
                warn!(
                    "Dropping {} success at original index {} (batch has {} records)",
                    name, s.original_index, len
                );
            }
            keep
        });
        outcome.failed.retain(|f| match f.position {
            RecordPosition::Original(idx) => idx < len,
            RecordPosition::Submission(_) => true,
        });
    }
}

fn confirmed_orders(doc: &CheckpointDocument, records: &[RecordSpec]) -> Vec<ConfirmedOrder> {
    let by_index: HashMap<usize, &RecordSpec> =
        records.iter().map(|r| (r.original_index, r)).collect();
    doc.stage1
        .successful
        .iter()
        .filter_map(|success| {
            by_index
                .get(&success.original_index)
                .map(|record| ConfirmedOrder::from_success(success, record))
        })
        .collect()
}

fn ingestion_outcome(
    set: &SubmissionSet<ConfirmedOrder>,
    found: Vec<crate::poller::IngestedRecord>,
    missing: &[String],
) -> StageOutcome {
    let successes = found
        .into_iter()
        .map(|record| {
            let mut success = StageSuccess::new(&record.external_id, &record.external_id)
                .with_downstream(record.downstream_id, record.child_ids);
            success.display_number = set
                .find_by_key(&record.external_id)
                .and_then(|s| s.payload.display_number.clone());
            success
        })
        .collect();
    let failures = missing
        .iter()
        .filter_map(|id| set.find_by_key(id))
        .map(|s| {
            StageFailure::new(
                s.submission_index,
                s.payload.identifier(),
                "not ingested downstream before the deadline",
            )
        })
        .collect();
    let mut outcome = reconcile_results(set, successes, failures);
    mark_unreported(set, &mut outcome, |o| o.identifier().to_string());
    outcome
}
