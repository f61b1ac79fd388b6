use std::sync::Arc;

use futures::future::BoxFuture;

use super::error::QueryError;
use super::types::{Sequence, SessionRange};

/// Lists history ledgers stamped with a processing version older than `current_version`.
///
/// Results are ascending and deduplicated; an empty vector means the backlog is drained.
pub trait OutdatedLedgers: Send + Sync {
    fn oldest_outdated_ledgers<'a>(
        &'a self,
        current_version: i32,
    ) -> BoxFuture<'a, Result<Vec<Sequence>, QueryError>>;
}

impl<T> OutdatedLedgers for Arc<T>
where
    T: OutdatedLedgers + ?Sized,
{
    fn oldest_outdated_ledgers<'a>(
        &'a self,
        current_version: i32,
    ) -> BoxFuture<'a, Result<Vec<Sequence>, QueryError>> {
        (**self).oldest_outdated_ledgers(current_version)
    }
}

/// Collapses ascending sequence numbers into the minimal list of contiguous runs.
///
/// `[5, 6, 7, 10, 11, 15]` becomes `[5, 7], [10, 11], [15, 15]`. Repeated values are folded
/// into the current run.
pub fn coalesce_ranges(sequences: &[Sequence]) -> Vec<SessionRange> {
    let mut ranges = Vec::new();
    let mut iter = sequences.iter().copied();

    let Some(first) = iter.next() else {
        return ranges;
    };
    let mut current = SessionRange::single(first);

    for seq in iter {
        if seq <= current.last {
            continue;
        }
        if current.last.checked_add(1) == Some(seq) {
            current.last = seq;
            continue;
        }
        ranges.push(current);
        current = SessionRange::single(seq);
    }

    ranges.push(current);
    ranges
}
