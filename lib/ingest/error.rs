use thiserror::Error;

use super::types::{Sequence, SessionError, SessionRange};

/// Store-agnostic failure from one of the read-only query capabilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failures raised while checking that a ledger links to its predecessor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("ledger header {sequence} not found")]
    HeaderNotFound { sequence: Sequence },

    #[error("ledger {sequence} has no predecessor to validate against")]
    NoPredecessor { sequence: Sequence },

    #[error("failed to load ledger header {sequence}: {source}")]
    Lookup {
        sequence: Sequence,
        #[source]
        source: QueryError,
    },

    #[error(
        "ledger {sequence} prev_hash {prev_hash} does not match hash {expected} of its predecessor"
    )]
    Discontinuity {
        sequence: Sequence,
        prev_hash: String,
        expected: String,
    },
}

impl ChainError {
    /// True when the failure is a missing header rather than a hash mismatch or query failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainError::HeaderNotFound { .. })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("session {range} failed: {source}")]
    Session {
        range: SessionRange,
        #[source]
        source: SessionError,
    },

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error(
        "reingestion stalled after {iterations} iterations without progress: {remaining} outdated ledgers remain, lowest {lowest}"
    )]
    ReingestStalled {
        lowest: Sequence,
        remaining: usize,
        iterations: u32,
    },
}
