//! Bounded polling for asynchronously ingested downstream records
//!
//! Used when stage 2 is populated by the downstream system itself (webhook
//! ingestion) instead of being created directly.
//!
//! ```text
//! Polling ──▶ AllFound        every id found
//!    │
//!    ├──────▶ PartialTimeout  deadline, some found, partial success allowed
//!    └──────▶ TotalTimeout    deadline, nothing found (or partial not allowed)
//! ```
//!
//! An id counts as found only once its primary record AND at least one
//! dependent sub-record exist. Primary alone is not enough.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Primary downstream record created by ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryRecord {
    pub id: String,
}

/// Read-only view of the downstream system
#[async_trait]
pub trait IngestionSource: Send + Sync {
    async fn find_primary(&self, external_id: &str) -> anyhow::Result<Option<PrimaryRecord>>;

    /// Dependent sub-records owned by `primary`.
    async fn find_children(&self, primary: &PrimaryRecord) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub allow_partial_success: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            allow_partial_success: false,
        }
    }
}

/// Reported once per tick, found or not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProgress {
    pub found: usize,
    pub total: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling,
    AllFound,
    PartialTimeout,
    TotalTimeout,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Polling)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedRecord {
    pub external_id: String,
    pub downstream_id: String,
    pub child_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub state: PollState,
    pub found: Vec<IngestedRecord>,
    pub missing_orders: Vec<String>,
    pub partial_success: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error(
        "Ingestion timed out after {elapsed_ms}ms: {found_count} found, {missing_count} missing ({ids})",
        found_count = .found.len(),
        missing_count = .missing.len(),
        ids = .missing.join(", ")
    )]
    Timeout {
        missing: Vec<String>,
        /// Records that did arrive before the deadline
        found: Vec<IngestedRecord>,
        elapsed_ms: u64,
    },
}

pub struct IngestionPoller {
    source: Arc<dyn IngestionSource>,
    options: PollerOptions,
}

impl IngestionPoller {
    pub fn new(source: Arc<dyn IngestionSource>, options: PollerOptions) -> Self {
        Self { source, options }
    }

    pub fn options(&self) -> &PollerOptions {
        &self.options
    }

    /// Poll until every id is found or the deadline passes.
    pub async fn poll<F>(
        &self,
        external_ids: &[String],
        mut on_progress: F,
    ) -> Result<PollOutcome, PollerError>
    where
        F: FnMut(PollProgress) + Send,
    {
        let start = Instant::now();
        let deadline = start + self.options.timeout;

        let mut pending: Vec<String> = Vec::with_capacity(external_ids.len());
        for id in external_ids {
            if !pending.contains(id) {
                pending.push(id.clone());
            }
        }
        let total = pending.len();
        let mut found: Vec<IngestedRecord> = Vec::with_capacity(total);

        info!(
            "Waiting for {} records to be ingested (timeout {:?}, interval {:?})",
            total, self.options.timeout, self.options.poll_interval
        );

        loop {
            let mut still_pending = Vec::with_capacity(pending.len());
            for id in pending {
                match self.check(&id).await {
                    Some(record) => {
                        debug!("Ingested {} as {}", record.external_id, record.downstream_id);
                        found.push(record);
                    }
                    None => still_pending.push(id),
                }
            }
            pending = still_pending;

            on_progress(PollProgress {
                found: found.len(),
                total,
                elapsed_ms: start.elapsed().as_millis() as u64,
            });

            if pending.is_empty() {
                info!("All {} records ingested in {:?}", total, start.elapsed());
                return Ok(PollOutcome {
                    state: PollState::AllFound,
                    found,
                    missing_orders: Vec::new(),
                    partial_success: false,
                    elapsed: start.elapsed(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.options.poll_interval.min(deadline - now)).await;
        }

        let elapsed = start.elapsed();
        let state = self.timeout_state(found.len());
        match state {
            PollState::PartialTimeout => {
                warn!(
                    "Partial ingestion after {:?}: {} of {} found, missing {:?}",
                    elapsed,
                    found.len(),
                    total,
                    pending
                );
                Ok(PollOutcome {
                    state,
                    found,
                    missing_orders: pending,
                    partial_success: true,
                    elapsed,
                })
            }
            _ => Err(PollerError::Timeout {
                missing: pending,
                found,
                elapsed_ms: elapsed.as_millis() as u64,
            }),
        }
    }

    fn timeout_state(&self, found: usize) -> PollState {
        if found > 0 && self.options.allow_partial_success {
            PollState::PartialTimeout
        } else {
            PollState::TotalTimeout
        }
    }

    /// Lookup errors count as "not yet" for this tick.
    async fn check(&self, external_id: &str) -> Option<IngestedRecord> {
        let primary = match self.source.find_primary(external_id).await {
            Ok(Some(primary)) => primary,
            Ok(None) => return None,
            Err(e) => {
                warn!("Lookup of {} failed: {:#}", external_id, e);
                return None;
            }
        };
        match self.source.find_children(&primary).await {
            Ok(children) if !children.is_empty() => Some(IngestedRecord {
                external_id: external_id.to_string(),
                downstream_id: primary.id,
                child_ids: children,
            }),
            Ok(_) => {
                debug!("{} ingested without sub-records yet", external_id);
                None
            }
            Err(e) => {
                warn!("Sub-record lookup for {} failed: {:#}", external_id, e);
                None
            }
        }
    }
}
