//! Per-stage failure accumulation
//!
//! Append-only. The engine feeds it after each stage and hands it to the caller
//! inside the run report; nothing here retries.

use std::fmt;

use seeder_storage::FailureRecord;
use serde::Serialize;

use crate::stage::StageId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedFailure {
    pub stage: StageId,
    #[serde(flatten)]
    pub record: FailureRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureCollector {
    entries: Vec<CollectedFailure>,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: StageId, failure: FailureRecord) {
        self.entries.push(CollectedFailure {
            stage,
            record: failure,
        });
    }

    pub fn extend(&mut self, stage: StageId, failures: impl IntoIterator<Item = FailureRecord>) {
        for failure in failures {
            self.record(stage, failure);
        }
    }

    pub fn entries(&self) -> &[CollectedFailure] {
        &self.entries
    }

    pub fn for_stage(&self, stage: StageId) -> impl Iterator<Item = &FailureRecord> {
        self.entries
            .iter()
            .filter(move |e| e.stage == stage)
            .map(|e| &e.record)
    }

    pub fn count(&self, stage: StageId) -> usize {
        self.for_stage(stage).count()
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per failure: stage, position, identifier and error text.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        for stage in StageId::ALL {
            let count = self.count(stage);
            if count == 0 {
                continue;
            }
            out.push_str(&format!(
                "Stage {} ({}): {} failed\n",
                stage.number(),
                stage,
                count
            ));
            for failure in self.for_stage(stage) {
                out.push_str(&format!(
                    "  {} {}: {}\n",
                    failure.position, failure.identifier, failure.error_message
                ));
            }
        }
        out
    }
}

impl fmt::Display for FailureCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_report())
    }
}
