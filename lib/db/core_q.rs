use diesel::sql_query;
use diesel::sql_types::{Integer, Nullable, Text};
use diesel::QueryableByName;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;

use super::error_mapping::{map_diesel_error, map_pool_error};
use crate::ingest::{HeaderLookup, LedgerHeader, QueryError, Sequence};

/// Read access to the core store's `ledgerheaders` table.
#[derive(Clone)]
pub struct PgCoreQ {
    pool: Pool<AsyncPgConnection>,
}

#[derive(QueryableByName)]
struct LedgerHeaderRow {
    #[diesel(sql_type = Integer)]
    ledgerseq: i32,
    #[diesel(sql_type = Text)]
    ledgerhash: String,
    #[diesel(sql_type = Text)]
    prevhash: String,
}

#[derive(QueryableByName)]
struct LedgerBoundsRow {
    #[diesel(sql_type = Nullable<Integer>)]
    elder: Option<i32>,
    #[diesel(sql_type = Nullable<Integer>)]
    latest: Option<i32>,
}

impl PgCoreQ {
    pub fn new(pool: Pool<AsyncPgConnection>) -> Self {
        Self { pool }
    }

    /// Oldest and newest ledger core still has. `(0, 0)` when core is empty.
    pub async fn ledger_bounds(&self) -> Result<(Sequence, Sequence), QueryError> {
        const QUERY: &str = "core ledger bounds";

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(QUERY, err))?;

        let row = sql_query(
            r#"
            SELECT MIN(ledgerseq) AS elder, MAX(ledgerseq) AS latest
            FROM ledgerheaders
            "#,
        )
        .get_result::<LedgerBoundsRow>(&mut conn)
        .await
        .map_err(|err| map_diesel_error(QUERY, err))?;

        Ok((
            to_sequence(row.elder.unwrap_or_default()),
            to_sequence(row.latest.unwrap_or_default()),
        ))
    }
}

impl HeaderLookup for PgCoreQ {
    fn ledger_header_by_sequence<'a>(
        &'a self,
        sequence: Sequence,
    ) -> BoxFuture<'a, Result<Option<LedgerHeader>, QueryError>> {
        Box::pin(async move {
            const QUERY: &str = "ledger header by sequence";

            // Sequences past i32::MAX can't exist in an integer column.
            let Ok(seq) = i32::try_from(sequence) else {
                return Ok(None);
            };

            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| map_pool_error(QUERY, err))?;

            let row = sql_query(
                r#"
                SELECT ledgerseq, ledgerhash, prevhash
                FROM ledgerheaders
                WHERE ledgerseq = $1
                "#,
            )
            .bind::<Integer, _>(seq)
            .load::<LedgerHeaderRow>(&mut conn)
            .await
            .map_err(|err| map_diesel_error(QUERY, err))?
            .into_iter()
            .next();

            Ok(row.map(|row| LedgerHeader {
                sequence: to_sequence(row.ledgerseq),
                ledger_hash: row.ledgerhash,
                prev_hash: row.prevhash,
            }))
        })
    }
}

pub(super) fn to_sequence(value: i32) -> Sequence {
    Sequence::try_from(value).unwrap_or_default()
}
