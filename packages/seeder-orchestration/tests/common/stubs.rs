use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use seeder_orchestration::{
    ConfirmedOrder, EntityStage, GroupingRecord, GroupingStage, IngestionSource, OrderStage,
    PollProgress, PrimaryRecord, ProgressReporter, RecordSpec, StageFailure, StageId, StageProgress,
    StageReport, StageSuccess, Submission,
};

use super::fixtures::{downstream, ext};

/// Stage 1 stub: fails a configurable set of original indices
#[derive(Default)]
pub struct ScriptedOrders {
    failing: Mutex<HashSet<usize>>,
    silent: Mutex<HashSet<usize>>,
    already_existing: bool,
    reversed: bool,
    broken: bool,
    calls: Mutex<Vec<Vec<usize>>>,
}

impl ScriptedOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(indices: &[usize]) -> Self {
        let stub = Self::new();
        stub.set_failing(indices);
        stub
    }

    /// Report every order as already present
    pub fn already_existing(mut self) -> Self {
        self.already_existing = true;
        self
    }

    /// Return successes in reverse submission order
    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    /// Fail the whole call
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn set_failing(&self, indices: &[usize]) {
        *self.failing.lock() = indices.iter().copied().collect();
    }

    /// Leave these indices out of the report entirely
    pub fn set_silent(&self, indices: &[usize]) {
        *self.silent.lock() = indices.iter().copied().collect();
    }

    /// Original indices submitted on each call
    pub fn calls(&self) -> Vec<Vec<usize>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl OrderStage for ScriptedOrders {
    async fn create_orders(
        &self,
        submissions: &[Submission<RecordSpec>],
        progress: &StageProgress,
    ) -> anyhow::Result<StageReport> {
        self.calls
            .lock()
            .push(submissions.iter().map(|s| s.original_index).collect());
        if self.broken {
            anyhow::bail!("order API unreachable");
        }

        let failing = self.failing.lock().clone();
        let silent = self.silent.lock().clone();
        let mut report = StageReport::default();
        for (done, submission) in submissions.iter().enumerate() {
            let idx = submission.original_index;
            if silent.contains(&idx) {
                progress.advance(done + 1);
                continue;
            }
            if failing.contains(&idx) {
                report.failures.push(StageFailure::new(
                    submission.submission_index,
                    submission.payload.identifier(),
                    format!("422 Unprocessable Entity: variant unavailable for record {}", idx),
                ));
            } else {
                let mut success = StageSuccess::new(&submission.key, ext(idx))
                    .with_display_number(format!("#{}", 1000 + idx));
                if self.already_existing {
                    success = success.already_existed();
                }
                report.successes.push(success);
            }
            progress.advance(done + 1);
        }
        if self.reversed {
            report.successes.reverse();
        }
        Ok(report)
    }
}

/// Stage 2 stub (direct mode)
#[derive(Default)]
pub struct ScriptedEntities {
    failing: Mutex<HashSet<usize>>,
    already_existing: bool,
    calls: Mutex<Vec<Vec<usize>>>,
}

impl ScriptedEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(indices: &[usize]) -> Self {
        let stub = Self::new();
        stub.set_failing(indices);
        stub
    }

    pub fn already_existing(mut self) -> Self {
        self.already_existing = true;
        self
    }

    pub fn set_failing(&self, indices: &[usize]) {
        *self.failing.lock() = indices.iter().copied().collect();
    }

    pub fn calls(&self) -> Vec<Vec<usize>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl EntityStage for ScriptedEntities {
    async fn create_entities(
        &self,
        submissions: &[Submission<ConfirmedOrder>],
        progress: &StageProgress,
    ) -> anyhow::Result<StageReport> {
        self.calls
            .lock()
            .push(submissions.iter().map(|s| s.original_index).collect());

        let failing = self.failing.lock().clone();
        let mut report = StageReport::default();
        for (done, submission) in submissions.iter().enumerate() {
            let idx = submission.original_index;
            if failing.contains(&idx) {
                report.failures.push(StageFailure::new(
                    submission.submission_index,
                    submission.payload.identifier(),
                    "duplicate key value violates unique constraint",
                ));
            } else {
                let mut success = StageSuccess::new(&submission.key, &submission.payload.external_id)
                    .with_downstream(downstream(idx), vec![format!("item-{}-0", idx)]);
                if self.already_existing {
                    success = success.already_existed();
                }
                report.successes.push(success);
            }
            progress.advance(done + 1);
        }
        Ok(report)
    }
}

/// Stage 3 stub; records the ids it was asked to group
#[derive(Default)]
pub struct RecordingGrouping {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingGrouping {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GroupingStage for RecordingGrouping {
    async fn create_grouping(
        &self,
        region: &str,
        downstream_ids: &[String],
    ) -> anyhow::Result<GroupingRecord> {
        let mut calls = self.calls.lock();
        calls.push(downstream_ids.to_vec());
        Ok(GroupingRecord {
            id: format!("grp-{}", calls.len()),
            region: region.to_string(),
        })
    }
}

/// Downstream view where ingested orders can be switched on per test
#[derive(Default)]
pub struct ScriptedIngestion {
    visible: Mutex<HashSet<String>>,
    lookups: Mutex<Vec<String>>,
}

impl ScriptedIngestion {
    pub fn with_visible(indices: &[usize]) -> Self {
        let source = Self::default();
        source.make_visible(indices);
        source
    }

    pub fn make_visible(&self, indices: &[usize]) {
        self.visible.lock().extend(indices.iter().map(|&i| ext(i)));
    }

    /// Every primary lookup in call order
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl IngestionSource for ScriptedIngestion {
    async fn find_primary(&self, external_id: &str) -> anyhow::Result<Option<PrimaryRecord>> {
        self.lookups.lock().push(external_id.to_string());
        if !self.visible.lock().contains(external_id) {
            return Ok(None);
        }
        let idx = external_id
            .rsplit('/')
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .map(|n| n - 1000)
            .unwrap_or_default();
        Ok(Some(PrimaryRecord { id: downstream(idx) }))
    }

    async fn find_children(&self, primary: &PrimaryRecord) -> anyhow::Result<Vec<String>> {
        Ok(vec![format!("{}-item-0", primary.id)])
    }
}

/// Captures stage progress callbacks
#[derive(Default)]
pub struct ProgressLog {
    events: Mutex<Vec<(StageId, usize, usize)>>,
    ingestion: Mutex<Vec<(usize, usize)>>,
}

impl ProgressLog {
    pub fn for_stage(&self, stage: StageId) -> Vec<(usize, usize)> {
        self.events
            .lock()
            .iter()
            .filter(|(s, _, _)| *s == stage)
            .map(|(_, current, total)| (*current, *total))
            .collect()
    }

    /// `(found, total)` per poll tick
    pub fn ingestion(&self) -> Vec<(usize, usize)> {
        self.ingestion.lock().clone()
    }
}

impl ProgressReporter for ProgressLog {
    fn on_stage_progress(&self, stage: StageId, current: usize, total: usize) {
        self.events.lock().push((stage, current, total));
    }

    fn on_ingestion_progress(&self, progress: &PollProgress) {
        self.ingestion.lock().push((progress.found, progress.total));
    }
}
