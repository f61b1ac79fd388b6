use diesel::sql_query;
use diesel::sql_types::{BigInt, Integer, Nullable};
use diesel::QueryableByName;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;

use super::core_q::to_sequence;
use super::error_mapping::{map_diesel_error, map_pool_error};
use crate::ingest::{OutdatedLedgers, QueryError, Sequence};

/// Upper bound on sequences returned by one outdated-ledgers query.
pub const OUTDATED_BATCH_LIMIT: i64 = 1_000_000;

/// Read access to the history store's `history_ledgers` table.
#[derive(Clone)]
pub struct PgHistoryQ {
    pool: Pool<AsyncPgConnection>,
}

#[derive(QueryableByName)]
struct SequenceRow {
    #[diesel(sql_type = Integer)]
    sequence: i32,
}

#[derive(QueryableByName)]
struct LatestRow {
    #[diesel(sql_type = Nullable<Integer>)]
    latest: Option<i32>,
}

impl PgHistoryQ {
    pub fn new(pool: Pool<AsyncPgConnection>) -> Self {
        Self { pool }
    }

    /// Newest ingested ledger, `0` while history is empty.
    pub async fn latest_ledger(&self) -> Result<Sequence, QueryError> {
        const QUERY: &str = "history latest ledger";

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(QUERY, err))?;

        let row = sql_query("SELECT MAX(sequence) AS latest FROM history_ledgers")
            .get_result::<LatestRow>(&mut conn)
            .await
            .map_err(|err| map_diesel_error(QUERY, err))?;

        Ok(to_sequence(row.latest.unwrap_or_default()))
    }
}

impl OutdatedLedgers for PgHistoryQ {
    fn oldest_outdated_ledgers<'a>(
        &'a self,
        current_version: i32,
    ) -> BoxFuture<'a, Result<Vec<Sequence>, QueryError>> {
        Box::pin(async move {
            const QUERY: &str = "oldest outdated ledgers";

            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| map_pool_error(QUERY, err))?;

            let rows = sql_query(
                r#"
                SELECT sequence
                FROM history_ledgers
                WHERE importer_version < $1
                ORDER BY sequence ASC
                LIMIT $2
                "#,
            )
            .bind::<Integer, _>(current_version)
            .bind::<BigInt, _>(OUTDATED_BATCH_LIMIT)
            .load::<SequenceRow>(&mut conn)
            .await
            .map_err(|err| map_diesel_error(QUERY, err))?;

            Ok(rows.into_iter().map(|row| to_sequence(row.sequence)).collect())
        })
    }
}
