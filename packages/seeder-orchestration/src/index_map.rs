//! Index reconciliation across the three coordinate spaces of a stage
//!
//! - **original**: position in the caller's record list (`original_index`)
//! - **submission**: position in the filtered list actually sent this run
//! - **result**: whatever order the collaborator returns successes in
//!
//! Successes are joined back on the key assigned before submission, never on
//! array position. Failures arrive with a submission index and are mapped
//! through the table built with the submission set.

use std::collections::{BTreeMap, HashMap, HashSet};

use seeder_storage::{FailureRecord, RecordPosition, StageOutcome, SuccessRecord};
use tracing::warn;

use crate::record::Indexed;

/// One record as handed to a stage collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission<T> {
    pub submission_index: usize,
    pub original_index: usize,
    /// Join key the collaborator must echo back with its success
    pub key: String,
    pub payload: T,
}

/// Records still to be submitted for one stage, plus the way back to original order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionSet<T> {
    submissions: Vec<Submission<T>>,
    filtered_to_original: BTreeMap<usize, usize>,
}

impl<T> SubmissionSet<T> {
    pub fn submissions(&self) -> &[Submission<T>] {
        &self.submissions
    }

    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    /// Map a submission-relative index to its original index.
    pub fn original_for(&self, submission_index: usize) -> Option<usize> {
        self.filtered_to_original.get(&submission_index).copied()
    }

    pub fn filtered_to_original(&self) -> &BTreeMap<usize, usize> {
        &self.filtered_to_original
    }

    pub fn original_indices(&self) -> Vec<usize> {
        self.submissions.iter().map(|s| s.original_index).collect()
    }

    pub fn find_by_key(&self, key: &str) -> Option<&Submission<T>> {
        self.submissions.iter().find(|s| s.key == key)
    }
}

/// Drop every item already successful in `done`; keep original relative order.
///
/// Pure: the result depends only on the arguments.
pub fn build_submission_set<T, F>(items: &[T], done: &StageOutcome, key: F) -> SubmissionSet<T>
where
    T: Indexed + Clone,
    F: Fn(&T) -> String,
{
    let skip = done.successful_indices();

    let mut remaining: Vec<&T> = items
        .iter()
        .filter(|item| !skip.contains(&item.original_index()))
        .collect();
    remaining.sort_by_key(|item| item.original_index());

    let mut submissions = Vec::with_capacity(remaining.len());
    let mut filtered_to_original = BTreeMap::new();
    for (submission_index, item) in remaining.into_iter().enumerate() {
        let original_index = item.original_index();
        filtered_to_original.insert(submission_index, original_index);
        submissions.push(Submission {
            submission_index,
            original_index,
            key: key(item),
            payload: item.clone(),
        });
    }

    SubmissionSet {
        submissions,
        filtered_to_original,
    }
}

/// A success as reported by a stage collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSuccess {
    /// Echo of [`Submission::key`]
    pub key: String,
    pub external_id: String,
    pub display_number: Option<String>,
    pub downstream_id: Option<String>,
    pub child_ids: Vec<String>,
    /// False when the record already existed and nothing new was written
    pub created: bool,
}

impl StageSuccess {
    pub fn new(key: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            external_id: external_id.into(),
            display_number: None,
            downstream_id: None,
            child_ids: Vec::new(),
            created: true,
        }
    }

    pub fn with_display_number(mut self, number: impl Into<String>) -> Self {
        self.display_number = Some(number.into());
        self
    }

    pub fn with_downstream(mut self, downstream_id: impl Into<String>, child_ids: Vec<String>) -> Self {
        self.downstream_id = Some(downstream_id.into());
        self.child_ids = child_ids;
        self
    }

    pub fn already_existed(mut self) -> Self {
        self.created = false;
        self
    }
}

/// A failure as reported by a stage collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub submission_index: usize,
    pub identifier: String,
    pub error: String,
}

impl StageFailure {
    pub fn new(
        submission_index: usize,
        identifier: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            submission_index,
            identifier: identifier.into(),
            error: error.into(),
        }
    }
}

/// Map collaborator output back into original-index space.
///
/// Unmappable successes are dropped with a warning; a second success for the
/// same original index is ignored. A failure whose submission index is unknown
/// keeps that index so it is still reported. A failure for an index that also
/// succeeded is dropped.
pub fn reconcile_results<T>(
    set: &SubmissionSet<T>,
    successes: Vec<StageSuccess>,
    failures: Vec<StageFailure>,
) -> StageOutcome {
    let mut key_to_original: HashMap<&str, usize> = HashMap::with_capacity(set.len());
    for submission in set.submissions() {
        key_to_original
            .entry(submission.key.as_str())
            .or_insert(submission.original_index);
    }

    let mut successful = Vec::with_capacity(successes.len());
    let mut seen = HashSet::new();
    for success in successes {
        let Some(&original_index) = key_to_original.get(success.key.as_str()) else {
            warn!(
                "Dropping success for unknown key {} (external id {})",
                success.key, success.external_id
            );
            continue;
        };
        if !seen.insert(original_index) {
            warn!(
                "Ignoring duplicate success for original index {} (external id {})",
                original_index, success.external_id
            );
            continue;
        }
        successful.push(SuccessRecord {
            original_index,
            external_id: success.external_id,
            display_number: success.display_number,
            downstream_id: success.downstream_id,
            child_ids: success.child_ids,
            created: success.created,
        });
    }

    let mut failed = Vec::with_capacity(failures.len());
    let mut failed_positions = HashSet::new();
    for failure in failures {
        let position = match set.original_for(failure.submission_index) {
            Some(idx) => RecordPosition::Original(idx),
            None => {
                warn!(
                    "Failure for {} has unknown submission index {}; keeping it unmapped",
                    failure.identifier, failure.submission_index
                );
                RecordPosition::Submission(failure.submission_index)
            }
        };
        if let Some(idx) = position.original_index() {
            if seen.contains(&idx) {
                warn!(
                    "Dropping failure for original index {}: the same run reported it successful",
                    idx
                );
                continue;
            }
        }
        if !failed_positions.insert(position) {
            continue;
        }
        failed.push(FailureRecord::new(position, failure.identifier, failure.error));
    }

    let mut outcome = StageOutcome { successful, failed };
    sort_outcome(&mut outcome);
    outcome
}

/// Combine a checkpoint's stage state with this run's results.
///
/// Fresh entries replace prior ones for the same original index. Prior failures
/// without an original index are dropped; their submission numbering belonged
/// to an earlier run.
pub fn merge_outcomes(prior: &StageOutcome, fresh: &StageOutcome) -> StageOutcome {
    let mut touched: HashSet<usize> = fresh.successful_indices();
    touched.extend(fresh.failed.iter().filter_map(|f| f.position.original_index()));

    let mut successful: Vec<SuccessRecord> = prior
        .successful
        .iter()
        .filter(|s| !touched.contains(&s.original_index))
        .cloned()
        .collect();
    successful.extend(fresh.successful.iter().cloned());

    let succeeded: HashSet<usize> = successful.iter().map(|s| s.original_index).collect();
    let mut failed: Vec<FailureRecord> = prior
        .failed
        .iter()
        .filter(|f| match f.position.original_index() {
            Some(idx) => !touched.contains(&idx) && !succeeded.contains(&idx),
            None => false,
        })
        .cloned()
        .collect();
    failed.extend(fresh.failed.iter().cloned());

    let mut merged = StageOutcome { successful, failed };
    sort_outcome(&mut merged);
    merged
}

/// Record a failure for every submission the collaborator said nothing about.
///
/// A submitted record with neither a success nor a mapped failure would
/// otherwise vanish from the checkpoint and could never be resumed.
pub fn mark_unreported<T, F>(
    set: &SubmissionSet<T>,
    outcome: &mut StageOutcome,
    identifier: F,
) -> usize
where
    F: Fn(&T) -> String,
{
    let mut reported = outcome.successful_indices();
    reported.extend(outcome.failed.iter().filter_map(|f| f.position.original_index()));

    let mut added = 0;
    for submission in set.submissions() {
        if reported.contains(&submission.original_index) {
            continue;
        }
        let name = identifier(&submission.payload);
        warn!(
            "No result reported for original index {} ({})",
            submission.original_index, name
        );
        outcome.failed.push(FailureRecord::new(
            RecordPosition::Original(submission.original_index),
            name,
            UNREPORTED,
        ));
        added += 1;
    }
    if added > 0 {
        sort_outcome(outcome);
    }
    added
}

pub const UNREPORTED: &str = "no result reported by stage";

fn sort_outcome(outcome: &mut StageOutcome) {
    outcome.successful.sort_by_key(|s| s.original_index);
    outcome.failed.sort_by_key(|f| match f.position {
        RecordPosition::Original(idx) => (0, idx),
        RecordPosition::Submission(idx) => (1, idx),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::records;
    use crate::record::RecordSpec;
    use proptest::prelude::*;
    use seeder_storage::BatchId;

    fn key(record: &RecordSpec) -> String {
        record.reference(&BatchId::new("b"))
    }

    fn ext(idx: usize) -> String {
        format!("gid://shop/Order/{}", 100 + idx)
    }

    fn done(indices: &[usize]) -> StageOutcome {
        StageOutcome {
            successful: indices
                .iter()
                .map(|&i| SuccessRecord::new(i, ext(i)))
                .collect(),
            failed: vec![],
        }
    }

    #[test]
    fn test_submission_set_without_checkpoint() {
        let recs = records(3);
        let set = build_submission_set(&recs, &StageOutcome::default(), key);

        assert_eq!(set.len(), 3);
        assert_eq!(set.original_indices(), vec![0, 1, 2]);
        assert_eq!(set.submissions()[1].key, "b-1");
    }

    #[test]
    fn test_submission_set_skips_successes_and_keeps_order() {
        let recs = records(5);
        let set = build_submission_set(&recs, &done(&[0, 2, 4]), key);

        assert_eq!(set.original_indices(), vec![1, 3]);
        assert_eq!(set.original_for(0), Some(1));
        assert_eq!(set.original_for(1), Some(3));
        assert_eq!(set.original_for(2), None);
    }

    #[test]
    fn test_submission_set_is_pure() {
        let recs = records(4);
        let checkpoint = done(&[1]);
        let a = build_submission_set(&recs, &checkpoint, key);
        let b = build_submission_set(&recs, &checkpoint, key);
        assert_eq!(a, b);
    }

    #[test]
    fn test_submission_set_orders_shuffled_input() {
        let mut recs = records(4);
        recs.reverse();
        let set = build_submission_set(&recs, &done(&[2]), key);
        assert_eq!(set.original_indices(), vec![0, 1, 3]);
    }

    #[test]
    fn test_reconcile_permuted_returns() {
        let recs = records(5);
        let set = build_submission_set(&recs, &StageOutcome::default(), key);

        // Returned as 2, 0, 1; 3 and 4 failed
        let successes = [2, 0, 1]
            .iter()
            .map(|&i| StageSuccess::new(format!("b-{}", i), ext(i)))
            .collect();
        let failures = vec![
            StageFailure::new(4, "c4@example.com", "422"),
            StageFailure::new(3, "c3@example.com", "422"),
        ];

        let outcome = reconcile_results(&set, successes, failures);
        let pairs: Vec<_> = outcome
            .successful
            .iter()
            .map(|s| (s.original_index, s.external_id.clone()))
            .collect();
        assert_eq!(pairs, vec![(0, ext(0)), (1, ext(1)), (2, ext(2))]);

        let positions: Vec<_> = outcome.failed.iter().map(|f| f.position).collect();
        assert_eq!(
            positions,
            vec![RecordPosition::Original(3), RecordPosition::Original(4)]
        );
    }

    #[test]
    fn test_reconcile_maps_failures_through_filtered_table() {
        let recs = records(5);
        let set = build_submission_set(&recs, &done(&[0, 2, 4]), key);

        let outcome = reconcile_results(
            &set,
            vec![StageSuccess::new("b-3", ext(3))],
            vec![StageFailure::new(0, "c1@example.com", "card declined")],
        );

        assert_eq!(outcome.successful[0].original_index, 3);
        assert_eq!(outcome.failed[0].position, RecordPosition::Original(1));
        assert_eq!(outcome.failed[0].error_message, "card declined");
    }

    #[test]
    fn test_reconcile_drops_unknown_key() {
        let recs = records(2);
        let set = build_submission_set(&recs, &StageOutcome::default(), key);

        let outcome = reconcile_results(
            &set,
            vec![
                StageSuccess::new("stale-key", ext(9)),
                StageSuccess::new("b-1", ext(1)),
            ],
            vec![],
        );
        assert_eq!(outcome.successful.len(), 1);
        assert_eq!(outcome.successful[0].original_index, 1);
    }

    #[test]
    fn test_reconcile_keeps_unmapped_failure() {
        let recs = records(2);
        let set = build_submission_set(&recs, &StageOutcome::default(), key);

        let outcome = reconcile_results(&set, vec![], vec![StageFailure::new(7, "x", "boom")]);
        assert_eq!(outcome.failed[0].position, RecordPosition::Submission(7));
    }

    #[test]
    fn test_reconcile_keeps_first_duplicate_and_disjoint_sets() {
        let recs = records(2);
        let set = build_submission_set(&recs, &StageOutcome::default(), key);

        let outcome = reconcile_results(
            &set,
            vec![
                StageSuccess::new("b-0", "first"),
                StageSuccess::new("b-0", "second"),
            ],
            vec![StageFailure::new(0, "c0@example.com", "late failure")],
        );
        assert_eq!(outcome.successful.len(), 1);
        assert_eq!(outcome.successful[0].external_id, "first");
        assert!(outcome.failed.is_empty());
        assert!(outcome.check_invariants().is_ok());
    }

    #[test]
    fn test_merge_fresh_wins() {
        let prior = StageOutcome {
            successful: vec![SuccessRecord::new(0, ext(0)), SuccessRecord::new(2, ext(2))],
            failed: vec![
                FailureRecord::new(RecordPosition::Original(1), "c1", "timeout"),
                FailureRecord::new(RecordPosition::Original(3), "c3", "timeout"),
                FailureRecord::new(RecordPosition::Submission(5), "?", "old"),
            ],
        };
        let fresh = StageOutcome {
            successful: vec![SuccessRecord::new(1, ext(1))],
            failed: vec![FailureRecord::new(
                RecordPosition::Original(3),
                "c3",
                "still failing",
            )],
        };

        let merged = merge_outcomes(&prior, &fresh);
        let indices: Vec<_> = merged.successful.iter().map(|s| s.original_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(merged.failed.len(), 1);
        assert_eq!(merged.failed[0].error_message, "still failing");
        assert!(merged.check_invariants().is_ok());
    }

    #[test]
    fn test_merge_with_empty_fresh_keeps_prior() {
        let prior = done(&[0, 1]);
        assert_eq!(merge_outcomes(&prior, &StageOutcome::default()), prior);
    }

    #[test]
    fn test_mark_unreported_fills_silent_gaps() {
        let recs = records(4);
        let set = build_submission_set(&recs, &StageOutcome::default(), key);

        // Index 2 omitted; index 3's success carries a stale key
        let mut outcome = reconcile_results(
            &set,
            vec![
                StageSuccess::new("b-0", ext(0)),
                StageSuccess::new("stale", ext(3)),
            ],
            vec![StageFailure::new(1, "c1@example.com", "422")],
        );
        let added = mark_unreported(&set, &mut outcome, |r| r.identifier().to_string());

        assert_eq!(added, 2);
        let positions: Vec<_> = outcome.failed.iter().map(|f| f.position).collect();
        assert_eq!(
            positions,
            vec![
                RecordPosition::Original(1),
                RecordPosition::Original(2),
                RecordPosition::Original(3)
            ]
        );
        assert_eq!(outcome.failed[1].identifier, "c2@example.com");
        assert_eq!(outcome.failed[1].error_message, UNREPORTED);
        assert!(outcome.check_invariants().is_ok());
    }

    #[test]
    fn test_mark_unreported_is_noop_when_all_reported() {
        let recs = records(2);
        let set = build_submission_set(&recs, &done(&[0]), key);
        let mut outcome = reconcile_results(&set, vec![StageSuccess::new("b-1", ext(1))], vec![]);
        let before = outcome.clone();

        assert_eq!(mark_unreported(&set, &mut outcome, |r| r.identifier().to_string()), 0);
        assert_eq!(outcome, before);
    }

    proptest! {
        #[test]
        fn prop_reconcile_is_order_independent(
            order in Just((0..5usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let recs = records(5);
            let set = build_submission_set(&recs, &StageOutcome::default(), key);
            let successes = order
                .iter()
                .map(|&i| StageSuccess::new(format!("b-{}", i), ext(i)))
                .collect();

            let outcome = reconcile_results(&set, successes, vec![]);
            for (i, success) in outcome.successful.iter().enumerate() {
                prop_assert_eq!(success.original_index, i);
                prop_assert_eq!(&success.external_id, &ext(i));
            }
        }

        #[test]
        fn prop_resumed_subset_maps_back(
            done_mask in proptest::collection::vec(any::<bool>(), 6),
            shuffle_seed in any::<u64>()
        ) {
            let recs = records(6);
            let already: Vec<usize> = (0..6).filter(|&i| done_mask[i]).collect();
            let set = build_submission_set(&recs, &done(&already), key);

            let mut returned: Vec<_> = set.submissions().iter().collect();
            let len = returned.len();
            if len > 1 {
                returned.rotate_left((shuffle_seed as usize) % len);
            }
            let successes = returned
                .iter()
                .map(|s| StageSuccess::new(s.key.clone(), ext(s.original_index)))
                .collect();

            let outcome = reconcile_results(&set, successes, vec![]);
            let merged = merge_outcomes(&done(&already), &outcome);
            prop_assert_eq!(merged.successful.len(), 6);
            for success in &merged.successful {
                prop_assert_eq!(&success.external_id, &ext(success.original_index));
            }
        }
    }
}
