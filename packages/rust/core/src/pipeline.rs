//! Pipeline controller: record → credential → lookup (with retries) →
//! classification → output append → checkpoint advance.
//!
//! Records are processed strictly one at a time, in input order. A record
//! either completes (its row is durably appended and the in-memory checkpoint
//! advanced) or has no side effects at all; cancellation is only observed
//! between records.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use enricher_shared::{
    CheckpointState, Counters, CredentialAcquirer, EnrichmentResult, EnrichmentStatus,
    InputRecord, LookupOutcome, LookupProvider, OutputSink, RecordSource, Result, RunSettings,
};
use enricher_storage::CheckpointStore;

use crate::classify::classify;
use crate::executor::RequestExecutor;
use crate::lease::CredentialLease;
use crate::retry::{RetryPolicy, retry_hint};

/// Lifecycle of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Suspended,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        })
    }
}

/// Why a run ended in [`PipelineState::Suspended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cancellation was requested (signal or caller).
    Cancelled,
    /// The session's record limit was reached.
    LimitReached,
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub stop_reason: Option<StopReason>,
    /// Totals across every session of this run.
    pub counters: Counters,
    /// Records committed by this session.
    pub session_processed: u64,
    pub last_processed_index: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Credentials acquired by this session.
    pub credential_acquisitions: u64,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called once before the first record, with the index to start from.
    fn started(&self, next_index: u64, total: Option<u64>);
    /// Called after each committed record.
    fn record_committed(&self, index: u64, id: &str, status: EnrichmentStatus, counters: &Counters);
    /// Called when the run stops without failing.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn started(&self, _next_index: u64, _total: Option<u64>) {}
    fn record_committed(&self, _: u64, _: &str, _: EnrichmentStatus, _: &Counters) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Everything the controller drives, set up by the caller.
pub struct PipelineParts<S, O> {
    pub source: S,
    pub sink: O,
    pub store: CheckpointStore,
    /// Loaded (resume) or freshly created checkpoint.
    pub checkpoint: CheckpointState,
    pub provider: Arc<dyn LookupProvider>,
    pub acquirer: Box<dyn CredentialAcquirer>,
}

pub struct PipelineController<S, O> {
    source: S,
    sink: O,
    store: CheckpointStore,
    checkpoint: CheckpointState,
    lease: CredentialLease,
    executor: RequestExecutor,
    policy: RetryPolicy,
    settings: RunSettings,
    cancel: CancellationToken,
    state: PipelineState,
    session_processed: u64,
    since_persist: u64,
    looked_up: bool,
}

impl<S: RecordSource, O: OutputSink> PipelineController<S, O> {
    pub fn new(parts: PipelineParts<S, O>, settings: RunSettings, cancel: CancellationToken) -> Self {
        Self {
            lease: CredentialLease::new(
                parts.acquirer,
                settings.refresh_margin,
                settings.acquire_attempts,
            ),
            executor: RequestExecutor::new(parts.provider, settings.request_timeout),
            policy: RetryPolicy::new(settings.retry),
            source: parts.source,
            sink: parts.sink,
            store: parts.store,
            checkpoint: parts.checkpoint,
            settings,
            cancel,
            state: PipelineState::Idle,
            session_processed: 0,
            since_persist: 0,
            looked_up: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// In-memory checkpoint (may be ahead of the persisted one between cadence points).
    pub fn checkpoint(&self) -> &CheckpointState {
        &self.checkpoint
    }

    pub fn sink(&self) -> &O {
        &self.sink
    }

    /// Run until the input is exhausted, the limit is hit, cancellation is
    /// requested, or a fatal error occurs.
    ///
    /// A fatal error leaves the controller in [`PipelineState::Failed`] after a
    /// best-effort checkpoint persist, and is returned as `Err`.
    #[instrument(skip_all, fields(run_id = %self.checkpoint.run_id))]
    pub async fn run(&mut self, progress: &dyn ProgressReporter) -> Result<RunSummary> {
        let clock = Instant::now();
        let start_index = self.checkpoint.next_index();
        let total = self.source.total();
        self.state = PipelineState::Running;

        info!(
            start_index,
            total = ?total,
            limit = ?self.settings.limit,
            "pipeline started"
        );
        progress.started(start_index, total);

        let stop_reason = match self.drive(progress).await {
            Ok(reason) => reason,
            Err(e) => return Err(self.fail(e)),
        };

        if let Err(e) = self.store.persist(&self.checkpoint) {
            return Err(self.fail(e));
        }

        self.state = match stop_reason {
            None => PipelineState::Completed,
            Some(_) => PipelineState::Suspended,
        };

        let summary = RunSummary {
            run_id: self.checkpoint.run_id,
            state: self.state,
            stop_reason,
            counters: self.checkpoint.counters,
            session_processed: self.session_processed,
            last_processed_index: self.checkpoint.last_processed_index,
            started_at: self.checkpoint.started_at,
            finished_at: Utc::now(),
            credential_acquisitions: self.lease.acquisitions(),
            elapsed: clock.elapsed(),
        };

        log_counters(&summary.counters, "final counters");
        info!(
            state = %summary.state,
            stop_reason = ?summary.stop_reason,
            session_processed = summary.session_processed,
            last_index = ?summary.last_processed_index,
            credential_acquisitions = summary.credential_acquisitions,
            elapsed_ms = summary.elapsed.as_millis(),
            "pipeline finished"
        );
        progress.done(&summary);
        Ok(summary)
    }

    async fn drive(&mut self, progress: &dyn ProgressReporter) -> Result<Option<StopReason>> {
        loop {
            if self.cancel.is_cancelled() {
                info!("cancellation requested, stopping at record boundary");
                return Ok(Some(StopReason::Cancelled));
            }
            if self
                .settings
                .limit
                .is_some_and(|limit| self.session_processed >= limit)
            {
                info!(limit = ?self.settings.limit, "record limit reached");
                return Ok(Some(StopReason::LimitReached));
            }

            let index = self.checkpoint.next_index();
            let Some(record) = self.source.record_at(index)? else {
                info!(index, "input exhausted");
                return Ok(None);
            };

            let needs_lookup = !record.query_key.trim().is_empty();
            if needs_lookup && self.looked_up && !self.pace().await {
                info!("cancellation requested during pacing delay");
                return Ok(Some(StopReason::Cancelled));
            }

            let result = self.process(&record).await?;
            self.commit(index, &record, &result)?;
            progress.record_committed(index, &record.id, result.status, &self.checkpoint.counters);
        }
    }

    /// Lookup and classification for one record. Per-record failures come
    /// back as `ERROR` results; only a fatal error is `Err`.
    async fn process(&mut self, record: &InputRecord) -> Result<EnrichmentResult> {
        if record.query_key.trim().is_empty() {
            warn!(id = %record.id, "record has no query key, skipping lookup");
            return Ok(EnrichmentResult::error("missing query key", Utc::now()));
        }

        let (outcome, attempts) = self.lookup_with_retry(&record.query_key).await?;
        let result = classify(&outcome, attempts, Utc::now());
        if result.status == EnrichmentStatus::Error {
            warn!(id = %record.id, note = %result.note, "record failed");
        }
        Ok(result)
    }

    /// Apply the retry policy around the executor. Returns the terminal
    /// outcome and the number of counted attempts. A cancel during backoff
    /// makes the last outcome terminal.
    async fn lookup_with_retry(&mut self, query_key: &str) -> Result<(LookupOutcome, u32)> {
        let max_attempts = self.policy.max_attempts();
        let mut attempts = 0u32;
        let mut reauthenticated = false;

        loop {
            let credential = self.lease.current().await?;
            self.looked_up = true;
            let outcome = self.executor.lookup(query_key, &credential).await;

            if outcome == LookupOutcome::AuthRejected && !reauthenticated {
                warn!("credential rejected, re-authenticating");
                self.lease.invalidate();
                reauthenticated = true;
                continue;
            }

            attempts += 1;
            if !RetryPolicy::is_retryable(&outcome) || attempts >= max_attempts {
                return Ok((outcome, attempts));
            }

            let delay = self.policy.delay_for(attempts - 1, retry_hint(&outcome));
            warn!(
                outcome = outcome.class(),
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis(),
                "transient lookup failure, backing off"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    info!(attempt = attempts, "cancellation requested during backoff");
                    return Ok((outcome, attempts));
                }
            }
        }
    }

    /// Append the row, then advance (and maybe persist) the checkpoint.
    fn commit(&mut self, index: u64, record: &InputRecord, result: &EnrichmentResult) -> Result<()> {
        let offset = self.sink.append(record, result)?;
        self.checkpoint
            .advance(index, &record.id, result.status, offset)?;
        self.session_processed += 1;
        self.since_persist += 1;

        if self.since_persist >= self.settings.checkpoint_interval {
            self.store.persist(&self.checkpoint)?;
            self.since_persist = 0;
        }

        let processed = self.checkpoint.counters.processed;
        if self.settings.log_interval > 0 && processed % self.settings.log_interval == 0 {
            log_counters(&self.checkpoint.counters, "progress");
        }
        Ok(())
    }

    /// Randomized delay before a lookup. Returns `false` if cancelled meanwhile.
    async fn pace(&self) -> bool {
        let (min, max) = (self.settings.pacing_min, self.settings.pacing_max);
        if max.is_zero() {
            return true;
        }
        let millis = rand::rng().random_range(min.as_millis()..=max.as_millis().max(min.as_millis()));
        let delay = Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX));

        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.cancel.cancelled() => false,
        }
    }

    fn fail(&mut self, e: enricher_shared::EnricherError) -> enricher_shared::EnricherError {
        self.state = PipelineState::Failed;
        error!(error = %e, last_index = ?self.checkpoint.last_processed_index, "pipeline failed");
        if let Err(persist_err) = self.store.persist(&self.checkpoint) {
            warn!(error = %persist_err, "could not persist checkpoint after failure");
        }
        e
    }
}

fn log_counters(c: &Counters, message: &'static str) {
    info!(
        processed = c.processed,
        found = c.found,
        found_pct = format_args!("{:.1}", c.percent(c.found)),
        not_found = c.not_found,
        not_found_pct = format_args!("{:.1}", c.percent(c.not_found)),
        multiple_matches = c.multiple_matches,
        multiple_pct = format_args!("{:.1}", c.percent(c.multiple_matches)),
        errors = c.errors,
        errors_pct = format_args!("{:.1}", c.percent(c.errors)),
        "{message}"
    );
}
