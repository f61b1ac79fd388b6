use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::PoolError;

use crate::ingest::QueryError;

/// Flattens a diesel failure into the store-agnostic [`QueryError`].
///
/// The query name is kept in the message so logs say which read failed.
pub fn map_diesel_error(query: &str, err: DieselError) -> QueryError {
    let detail = match &err {
        DieselError::NotFound => "no rows returned".to_string(),
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            format!("connection closed: {}", info.message())
        }
        DieselError::DatabaseError(_, info) => info.message().to_string(),
        other => other.to_string(),
    };
    QueryError::new(format!("{query}: {detail}"))
}

pub fn map_pool_error(query: &str, err: PoolError) -> QueryError {
    QueryError::new(format!("{query}: connection pool: {err}"))
}

#[cfg(test)]
mod tests {
    use super::map_diesel_error;
    use diesel::result::Error as DieselError;

    #[test]
    fn not_found_keeps_query_name() {
        let err = map_diesel_error("core ledger bounds", DieselError::NotFound);
        assert_eq!(err.message, "core ledger bounds: no rows returned");
    }

    #[test]
    fn other_errors_use_display() {
        let err = map_diesel_error("outdated ledgers", DieselError::RollbackTransaction);
        assert!(err.message.starts_with("outdated ledgers: "));
        assert!(err.message.len() > "outdated ledgers: ".len());
    }
}
