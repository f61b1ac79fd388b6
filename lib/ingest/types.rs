use std::fmt;

use serde::Serialize;

/// Position of a ledger in the source chain.
pub type Sequence = u32;

/// Processing version stamped on history rows by the current importer.
///
/// History rows tagged with an older version are "outdated" and eligible for reingestion.
pub const CURRENT_VERSION: i32 = 10;

/// Closed, inclusive range of ledgers handled by one Session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionRange {
    pub first: Sequence,
    pub last: Sequence,
}

impl SessionRange {
    pub fn new(first: Sequence, last: Sequence) -> Self {
        Self { first, last }
    }

    pub fn single(sequence: Sequence) -> Self {
        Self::new(sequence, sequence)
    }

    /// True when there is nothing to ingest (`first > last`).
    pub fn is_empty(&self) -> bool {
        self.first > self.last
    }

    /// Number of ledgers covered by the range.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            u64::from(self.last - self.first) + 1
        }
    }

    pub fn contains(&self, sequence: Sequence) -> bool {
        self.first <= sequence && sequence <= self.last
    }

    /// Validates operator-supplied bounds before a reingestion Session is built.
    pub fn validate(&self) -> Result<(), String> {
        if self.first == 0 {
            return Err(format!("first ledger must be positive, got {}", self.first));
        }
        if self.first > self.last {
            return Err(format!(
                "first ledger ({}) must be <= last ledger ({})",
                self.first, self.last
            ));
        }
        Ok(())
    }
}

impl fmt::Display for SessionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}

/// Work handed to a Session worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRequest {
    pub range: SessionRange,
    /// Erase existing destination data for the range before writing it.
    pub clear_existing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// The worker stopped on its own and reported how many ledgers it wrote.
    Failed,
    /// The Scheduler dropped the worker's future at its deadline.
    ///
    /// The worker never gets to report, so the session records `ingested = 0` even if some
    /// ledgers were already written. `ledgers_ingested_total` under-counts by that amount; the
    /// next tick starts after history's real tip, so no ledger is skipped.
    TimedOut,
}

/// Terminal failure reported by a Session worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::TimedOut,
            message: message.into(),
        }
    }
}

/// What a worker reports once it stops: ledgers written plus an optional terminal error.
///
/// `ingested` counts ledgers written before a failure too.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionOutcome {
    pub ingested: u64,
    pub error: Option<SessionError>,
}

impl SessionOutcome {
    pub fn succeeded(ingested: u64) -> Self {
        Self {
            ingested,
            error: None,
        }
    }

    pub fn failed(ingested: u64, error: SessionError) -> Self {
        Self {
            ingested,
            error: Some(error),
        }
    }
}

/// One completed ingestion run over a contiguous range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub range: SessionRange,
    pub clear_existing: bool,
    pub ingested: u64,
    pub err: Option<SessionError>,
}

impl Session {
    pub(crate) fn finished(request: SessionRequest, outcome: SessionOutcome) -> Self {
        Self {
            range: request.range,
            clear_existing: request.clear_existing,
            ingested: outcome.ingested,
            err: outcome.error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}

/// Hash-linked header of one ledger in the source store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHeader {
    pub sequence: Sequence,
    pub ledger_hash: String,
    pub prev_hash: String,
}
