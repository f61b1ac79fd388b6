use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use prometheus_client::metrics::gauge::Gauge;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::chain::{ChainValidator, HeaderLookup};
use super::error::{ChainError, Error};
use super::faults::{Fault, FaultReporter};
use super::ranges::{coalesce_ranges, OutdatedLedgers};
use super::session::SessionRunner;
use super::types::{
    Sequence, Session, SessionError, SessionOutcome, SessionRange, SessionRequest,
    CURRENT_VERSION,
};
use crate::ledger_state::{LedgerState, LedgerStateView};
use crate::monitoring::IngestMetrics;

/// Tuning knobs for one [`System`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConfig {
    /// Processing version written by this importer; history rows below it are outdated.
    pub importer_version: i32,
    /// Upper bound on one session's runtime. `None` lets a session run indefinitely.
    pub session_timeout: Option<Duration>,
    /// Consecutive backlog iterations without progress before `reingest_outdated` gives up.
    /// `0` disables the check.
    pub max_stalled_reingest_iterations: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            importer_version: CURRENT_VERSION,
            session_timeout: None,
            max_stalled_reingest_iterations: 3,
        }
    }
}

/// Result of one [`System::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick's session still holds the slot; nothing was installed.
    AlreadyInProgress,
    /// History has caught up with core; the slot was occupied and released without work.
    UpToDate { range: SessionRange },
    /// The first ledger of the range does not link to history's tip. Retried next tick.
    ChainGap { start: Sequence, error: ChainError },
    /// A session ran to completion, successfully or not.
    Ran(Session),
    /// An internal panic was contained and reported.
    Faulted(Fault),
}

impl TickOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            TickOutcome::Ran(session) => Some(session),
            _ => None,
        }
    }
}

type Slot = Mutex<Option<SessionRange>>;

/// Clears the forward-session slot when dropped, including during unwinding.
struct SlotGuard<'a> {
    slot: &'a Slot,
    active: &'a Gauge,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        *lock_slot(self.slot) = None;
        self.active.set(0);
    }
}

fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<SessionRange>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One outdated-ledgers query result, reduced to what stall detection compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BacklogSnapshot {
    lowest: Sequence,
    highest: Sequence,
    remaining: usize,
}

impl BacklogSnapshot {
    /// `None` for an empty batch. Batches are ascending, so the ends are the bounds.
    fn of(batch: &[Sequence]) -> Option<Self> {
        Some(Self {
            lowest: *batch.first()?,
            highest: *batch.last()?,
            remaining: batch.len(),
        })
    }

    /// A capped query can return the same count and lowest ledger while still moving its
    /// upper end forward, so any bound advancing counts.
    fn progressed_since(&self, previous: &Self) -> bool {
        self.remaining < previous.remaining
            || self.lowest > previous.lowest
            || self.highest > previous.highest
    }
}

/// Tracks whether successive backlog queries are making progress.
struct StallDetector {
    limit: u32,
    previous: Option<BacklogSnapshot>,
    stalled: u32,
}

impl StallDetector {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            previous: None,
            stalled: 0,
        }
    }

    /// Records one backlog observation. Returns the stalled iteration count once it reaches the
    /// limit.
    fn observe(&mut self, snapshot: BacklogSnapshot) -> Option<u32> {
        if let Some(previous) = &self.previous {
            if snapshot.progressed_since(previous) {
                self.stalled = 0;
            } else {
                self.stalled += 1;
            }
        }
        self.previous = Some(snapshot);

        if self.limit > 0 && self.stalled >= self.limit {
            Some(self.stalled)
        } else {
            None
        }
    }
}

/// Orchestrates forward ingestion ticks and operator-driven reingestion.
///
/// At most one forward session is installed at a time per `System`. Reingestion does not take
/// the slot; it is expected to be invoked sequentially by an operator.
pub struct System {
    state: Arc<dyn LedgerStateView>,
    validator: ChainValidator<Arc<dyn HeaderLookup>>,
    outdated: Arc<dyn OutdatedLedgers>,
    runner: Arc<dyn SessionRunner>,
    faults: Arc<dyn FaultReporter>,
    config: SystemConfig,
    metrics: IngestMetrics,
    current: Slot,
}

impl System {
    pub fn new(
        state: Arc<dyn LedgerStateView>,
        headers: Arc<dyn HeaderLookup>,
        outdated: Arc<dyn OutdatedLedgers>,
        runner: Arc<dyn SessionRunner>,
        faults: Arc<dyn FaultReporter>,
        config: SystemConfig,
    ) -> Self {
        Self {
            state,
            validator: ChainValidator::new(headers),
            outdated,
            runner,
            faults,
            config,
            metrics: IngestMetrics::default(),
            current: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: IngestMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> SystemConfig {
        self.config
    }

    /// Range of the forward session currently holding the slot, if any.
    pub fn current(&self) -> Option<SessionRange> {
        *lock_slot(&self.current)
    }

    /// Ingests any new ledger data unless a session is already in progress.
    ///
    /// Never fails: chain gaps, session errors, and panics are logged and reported in the
    /// returned [`TickOutcome`] so the next tick can retry.
    pub async fn tick(&self) -> TickOutcome {
        let installed = match panic::catch_unwind(AssertUnwindSafe(|| self.install_tick_session()))
        {
            Ok(installed) => installed,
            Err(payload) => return self.contain_panic(Fault::from_panic(payload)),
        };
        let Some((guard, state, range)) = installed else {
            info!(event = "ingest_already_in_progress", "ingest: already in progress");
            self.metrics.ticks_skipped_total.inc();
            return TickOutcome::AlreadyInProgress;
        };
        self.metrics.ticks_total.inc();

        let result = AssertUnwindSafe(self.run_once(state, range))
            .catch_unwind()
            .await;
        drop(guard);

        match result {
            Ok(outcome) => outcome,
            Err(payload) => self.contain_panic(
                Fault::from_panic(payload)
                    .with_context("first_ledger", range.first)
                    .with_context("last_ledger", range.last),
            ),
        }
    }

    fn contain_panic(&self, fault: Fault) -> TickOutcome {
        let fault = fault.with_context("component", "tick");
        error!(
            event = "ingest_session_panicked",
            message = %fault.message,
            context = ?fault.context,
            "import session panicked"
        );
        self.metrics.faults_total.inc();
        self.faults.report(&fault);
        TickOutcome::Faulted(fault)
    }

    /// Check-then-install under one lock acquisition.
    fn install_tick_session(&self) -> Option<(SlotGuard<'_>, LedgerState, SessionRange)> {
        let mut current = lock_slot(&self.current);
        if current.is_some() {
            return None;
        }

        let state = self.state.current_state();
        let range = state.tick_range();
        *current = Some(range);
        self.metrics.session_active.set(1);

        let guard = SlotGuard {
            slot: &self.current,
            active: &self.metrics.session_active,
        };
        Some((guard, state, range))
    }

    async fn run_once(&self, state: LedgerState, range: SessionRange) -> TickOutcome {
        if range.is_empty() {
            debug!(
                event = "ingest_up_to_date",
                history_latest = state.history_latest,
                core_latest = state.core_latest,
                "no new ledgers to ingest"
            );
            return TickOutcome::UpToDate { range };
        }

        if state.is_history_empty() {
            info!(
                event = "ingest_history_empty",
                first_ledger = range.first,
                "history db is empty, starting ingestion from ledger {}",
                range.first
            );
        }

        if range.first != state.core_elder {
            if let Err(error) = self.validator.validate(range.first).await {
                error!(
                    event = "ingest_chain_gap_detected",
                    start = range.first,
                    not_found = error.is_not_found(),
                    error = %error,
                    "ledger gap detected (possible db corruption)"
                );
                self.metrics.chain_gaps_total.inc();
                return TickOutcome::ChainGap {
                    start: range.first,
                    error,
                };
            }
        }

        let session = self
            .execute(SessionRequest {
                range,
                clear_existing: false,
            })
            .await;

        if let Some(err) = &session.err {
            error!(
                event = "ingest_session_failed",
                first_ledger = range.first,
                last_ledger = range.last,
                ingested = session.ingested,
                error = %err,
                "import session failed"
            );
        }

        TickOutcome::Ran(session)
    }

    async fn execute(&self, request: SessionRequest) -> Session {
        let outcome = match self.config.session_timeout {
            // Expiry drops the worker future, so its partial count is lost.
            Some(limit) => match tokio::time::timeout(limit, self.runner.run(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => SessionOutcome::failed(
                    0,
                    SessionError::timed_out(format!(
                        "session {} exceeded timeout of {}ms",
                        request.range,
                        limit.as_millis()
                    )),
                ),
            },
            None => self.runner.run(&request).await,
        };

        self.metrics.ledgers_ingested_total.inc_by(outcome.ingested);
        if outcome.error.is_some() {
            self.metrics.session_failures_total.inc();
        }

        Session::finished(request, outcome)
    }

    /// Reingests `[start, end]` in clear-existing mode and returns the number of ledgers written.
    pub async fn reingest_range(&self, start: Sequence, end: Sequence) -> Result<u64, Error> {
        let range = SessionRange::new(start, end);
        range.validate().map_err(Error::InvalidRange)?;

        self.metrics.reingest_ranges_total.inc();
        let session = self
            .execute(SessionRequest {
                range,
                clear_existing: true,
            })
            .await;

        match session.err {
            Some(source) => {
                warn!(
                    event = "reingest_range_failed",
                    first_ledger = start,
                    last_ledger = end,
                    ingested = session.ingested,
                    error = %source,
                    "reingest session failed"
                );
                Err(Error::Session { range, source })
            }
            None => {
                info!(
                    event = "reingest_range_complete",
                    first_ledger = start,
                    last_ledger = end,
                    ingested = session.ingested,
                    "reingested ledger range"
                );
                Ok(session.ingested)
            }
        }
    }

    /// Reingests every ledger currently available in core.
    pub async fn reingest_all(&self) -> Result<u64, Error> {
        let range = self.state.current_state().core_range();
        self.reingest_range(range.first, range.last).await
    }

    pub async fn reingest_single(&self, sequence: Sequence) -> Result<(), Error> {
        self.reingest_range(sequence, sequence).await.map(|_| ())
    }

    /// Reingests history ledgers written by an older importer version until none remain.
    ///
    /// Each pass re-queries the backlog, because flushing mutates the store under the query.
    /// A backlog that stops shrinking aborts with [`Error::ReingestStalled`] instead of spinning.
    pub async fn reingest_outdated(&self) -> Result<u64, Error> {
        let mut ingested = 0u64;
        let mut stall = StallDetector::new(self.config.max_stalled_reingest_iterations);

        loop {
            let outdated = self
                .outdated
                .oldest_outdated_ledgers(self.config.importer_version)
                .await?;

            let Some(snapshot) = BacklogSnapshot::of(&outdated) else {
                return Ok(ingested);
            };
            let lowest = snapshot.lowest;

            info!(
                event = "reingest_outdated_batch",
                lowest_sequence = lowest,
                highest_sequence = snapshot.highest,
                batch_size = outdated.len(),
                "reingest: outdated"
            );

            if let Some(iterations) = stall.observe(snapshot) {
                warn!(
                    event = "reingest_stalled",
                    lowest_sequence = lowest,
                    remaining = outdated.len(),
                    iterations,
                    ingested,
                    "outdated backlog is not shrinking; aborting reingestion"
                );
                return Err(Error::ReingestStalled {
                    lowest,
                    remaining: outdated.len(),
                    iterations,
                });
            }

            for range in coalesce_ranges(&outdated) {
                match self.reingest_range(range.first, range.last).await {
                    Ok(count) => ingested += count,
                    Err(err) => {
                        warn!(
                            event = "reingest_outdated_aborted",
                            ingested,
                            error = %err,
                            "stopping outdated reingestion after a failed range"
                        );
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Calls [`System::tick`] every `interval` until `cancel_token` fires.
    ///
    /// A tick in flight is allowed to finish before the loop observes cancellation.
    pub async fn run(&self, interval: Duration, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!(event = "ingest_loop_stopped", "ingestion tick loop stopped");
    }
}
