//! Cached view of the ledger boundaries of the core and history stores.
//!
//! The Scheduler reads the snapshot on every tick but never refreshes it itself; a separate
//! refresher task polls the stores and publishes a new snapshot. Readers never wait on a
//! refresh in flight.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ingest::error::QueryError;
use crate::ingest::types::{Sequence, SessionRange};

/// Boundaries of both stores at one point in time.
///
/// `history_latest` is `0` while the history store is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedgerState {
    pub core_elder: Sequence,
    pub core_latest: Sequence,
    pub history_latest: Sequence,
}

impl LedgerState {
    pub fn is_history_empty(&self) -> bool {
        self.history_latest == 0
    }

    /// Next forward range to ingest: everything after history's tip, or all of core when
    /// history is empty. May be empty (`first > last`) when history has caught up or core has
    /// not reported any ledgers yet.
    pub fn tick_range(&self) -> SessionRange {
        if self.core_latest == 0 {
            return SessionRange::new(1, 0);
        }
        let first = if self.is_history_empty() {
            self.core_elder
        } else {
            self.history_latest.saturating_add(1)
        };
        SessionRange::new(first, self.core_latest)
    }

    /// Every ledger currently available in core.
    pub fn core_range(&self) -> SessionRange {
        SessionRange::new(self.core_elder, self.core_latest)
    }
}

/// Read-only access to the latest cached [`LedgerState`].
pub trait LedgerStateView: Send + Sync {
    fn current_state(&self) -> LedgerState;
}

impl<T> LedgerStateView for Arc<T>
where
    T: LedgerStateView + ?Sized,
{
    fn current_state(&self) -> LedgerState {
        (**self).current_state()
    }
}

/// In-process snapshot shared between the refresher (writer) and schedulers (readers).
#[derive(Debug, Default)]
pub struct SharedLedgerState {
    state: RwLock<LedgerState>,
}

impl SharedLedgerState {
    pub fn new(initial: LedgerState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    pub fn update(&self, next: LedgerState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl LedgerStateView for SharedLedgerState {
    fn current_state(&self) -> LedgerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Loads fresh ledger boundaries from the backing stores.
pub trait LedgerStateSource: Send + Sync {
    fn load_state<'a>(&'a self) -> BoxFuture<'a, Result<LedgerState, QueryError>>;
}

impl<T> LedgerStateSource for Arc<T>
where
    T: LedgerStateSource + ?Sized,
{
    fn load_state<'a>(&'a self) -> BoxFuture<'a, Result<LedgerState, QueryError>> {
        (**self).load_state()
    }
}

/// Loads one snapshot and publishes it. On failure the previous snapshot stays in place.
pub async fn refresh_ledger_state<S>(
    source: &S,
    shared: &SharedLedgerState,
) -> Result<LedgerState, QueryError>
where
    S: LedgerStateSource + ?Sized,
{
    let state = source.load_state().await?;
    shared.update(state);
    debug!(
        event = "ledger_state_refreshed",
        core_elder = state.core_elder,
        core_latest = state.core_latest,
        history_latest = state.history_latest,
        "ledger state refreshed"
    );
    Ok(state)
}

/// Refreshes `shared` every `interval` until `cancel_token` fires.
pub async fn run_ledger_state_refresher<S>(
    source: S,
    shared: Arc<SharedLedgerState>,
    interval: Duration,
    cancel_token: CancellationToken,
) where
    S: LedgerStateSource,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = refresh_ledger_state(&source, &shared).await {
                    warn!(
                        event = "ledger_state_refresh_failed",
                        error = %err,
                        "failed to refresh ledger state; keeping previous snapshot"
                    );
                }
            }
        }
    }
}
