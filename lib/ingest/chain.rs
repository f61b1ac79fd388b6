use std::sync::Arc;

use futures::future::BoxFuture;

use super::error::{ChainError, QueryError};
use super::types::{LedgerHeader, Sequence};

/// Read-only header access over the source store.
///
/// `Ok(None)` means the header does not exist; `Err` is reserved for query failures.
pub trait HeaderLookup: Send + Sync {
    fn ledger_header_by_sequence<'a>(
        &'a self,
        sequence: Sequence,
    ) -> BoxFuture<'a, Result<Option<LedgerHeader>, QueryError>>;
}

impl<T> HeaderLookup for Arc<T>
where
    T: HeaderLookup + ?Sized,
{
    fn ledger_header_by_sequence<'a>(
        &'a self,
        sequence: Sequence,
    ) -> BoxFuture<'a, Result<Option<LedgerHeader>, QueryError>> {
        (**self).ledger_header_by_sequence(sequence)
    }
}

/// Confirms that a ledger is the child of the ledger before it.
pub struct ChainValidator<H> {
    headers: H,
}

impl<H> ChainValidator<H>
where
    H: HeaderLookup,
{
    pub fn new(headers: H) -> Self {
        Self { headers }
    }

    /// Succeeds iff `header(sequence).prev_hash == header(sequence - 1).ledger_hash`.
    ///
    /// A mismatch means either a gap in the source store or corruption on the history side.
    pub async fn validate(&self, sequence: Sequence) -> Result<(), ChainError> {
        let prev_sequence = sequence
            .checked_sub(1)
            .filter(|prev| *prev > 0)
            .ok_or(ChainError::NoPredecessor { sequence })?;

        let cur = self.load(sequence).await?;
        let prev = self.load(prev_sequence).await?;

        if cur.prev_hash != prev.ledger_hash {
            return Err(ChainError::Discontinuity {
                sequence,
                prev_hash: cur.prev_hash,
                expected: prev.ledger_hash,
            });
        }

        Ok(())
    }

    async fn load(&self, sequence: Sequence) -> Result<LedgerHeader, ChainError> {
        self.headers
            .ledger_header_by_sequence(sequence)
            .await
            .map_err(|source| ChainError::Lookup { sequence, source })?
            .ok_or(ChainError::HeaderNotFound { sequence })
    }
}
