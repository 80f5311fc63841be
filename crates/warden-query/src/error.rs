//! Driver errors

use thiserror::Error;

/// Errors from the database drivers and the direct pool
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The database refused or dropped the connection
    #[error("Database connection failed: {0}")]
    Connect(String),

    /// The driver connect attempt exceeded its time bound
    #[error("Database connection timed out")]
    ConnectTimeout,

    /// The statement itself failed
    #[error("{0}")]
    Driver(String),

    /// `get` on the direct pool for a session without an entry
    #[error("No connection found for session.")]
    NoPooledConnection,

    /// TLS material for a direct connection could not be used
    #[error("Invalid TLS configuration: {0}")]
    Tls(String),
}

impl QueryError {
    /// Prefer the server-reported message over the driver's wrapper text.
    pub(crate) fn from_pg(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => QueryError::Driver(db.message().to_string()),
            None => QueryError::Driver(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_miss_message() {
        assert_eq!(
            QueryError::NoPooledConnection.to_string(),
            "No connection found for session."
        );
    }
}
