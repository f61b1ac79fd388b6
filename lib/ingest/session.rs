use std::sync::Arc;

use futures::future::BoxFuture;

use super::types::{SessionOutcome, SessionRequest};

/// Executes ingestion over one contiguous ledger range.
///
/// The Scheduler only decides *which* range runs and *when*; parsing ledgers and writing history
/// rows happens behind this trait. In clear-existing mode an implementation must remove every
/// destination row for the range before rewriting it, so stale rows never coexist with fresh
/// ones.
pub trait SessionRunner: Send + Sync {
    fn run<'a>(&'a self, request: &'a SessionRequest) -> BoxFuture<'a, SessionOutcome>;
}

impl<T> SessionRunner for Arc<T>
where
    T: SessionRunner + ?Sized,
{
    fn run<'a>(&'a self, request: &'a SessionRequest) -> BoxFuture<'a, SessionOutcome> {
        (**self).run(request)
    }
}
