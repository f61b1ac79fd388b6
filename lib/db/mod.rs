//! Postgres-backed implementations of the read-only query capabilities.

mod core_q;
mod error_mapping;
mod history_q;

pub use core_q::PgCoreQ;
pub use error_mapping::{map_diesel_error, map_pool_error};
pub use history_q::{PgHistoryQ, OUTDATED_BATCH_LIMIT};

use diesel_async::{
    pg::AsyncPgConnection,
    pooled_connection::{
        deadpool::{BuildError, Pool},
        AsyncDieselConnectionManager,
    },
};
use futures::future::BoxFuture;

use crate::ingest::QueryError;
use crate::ledger_state::{LedgerState, LedgerStateSource};

/// Builds an async Postgres connection pool.
///
/// The ingest process holds one pool per store; both are read-only from here.
pub async fn build_db_pool(
    db_url: &str,
    max_size: usize,
) -> Result<Pool<AsyncPgConnection>, BuildError> {
    assert!(max_size > 0, "db pool max_size must be > 0");

    let pool_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    let pool = Pool::builder(pool_config).max_size(max_size).build()?;

    Ok(pool)
}

/// Loads [`LedgerState`] by asking core for its bounds and history for its tip.
#[derive(Clone)]
pub struct PgLedgerStateSource {
    core: PgCoreQ,
    history: PgHistoryQ,
}

impl PgLedgerStateSource {
    pub fn new(core: PgCoreQ, history: PgHistoryQ) -> Self {
        Self { core, history }
    }
}

impl LedgerStateSource for PgLedgerStateSource {
    fn load_state<'a>(&'a self) -> BoxFuture<'a, Result<LedgerState, QueryError>> {
        Box::pin(async move {
            let (core_elder, core_latest) = self.core.ledger_bounds().await?;
            let history_latest = self.history.latest_ledger().await?;

            Ok(LedgerState {
                core_elder,
                core_latest,
                history_latest,
            })
        })
    }
}
