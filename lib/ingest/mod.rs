//! Scheduling and consistency core of history ingestion.
//!
//! `System` drives forward ticks and reingestion; the capability traits (`HeaderLookup`,
//! `OutdatedLedgers`, `SessionRunner`, `FaultReporter`) are the seams to the stores, the
//! per-ledger ingestion worker, and fault tracking.

mod chain;
pub mod error;
mod faults;
mod ranges;
mod session;
mod system;
pub mod types;

pub use chain::{ChainValidator, HeaderLookup};
pub use error::{ChainError, Error, QueryError};
pub use faults::{Fault, FaultReporter, TracingFaultReporter};
pub use ranges::{coalesce_ranges, OutdatedLedgers};
pub use session::SessionRunner;
pub use system::{System, SystemConfig, TickOutcome};
pub use types::{
    LedgerHeader, Sequence, Session, SessionError, SessionErrorKind, SessionOutcome,
    SessionRange, SessionRequest, CURRENT_VERSION,
};

#[cfg(test)]
mod test_support;
