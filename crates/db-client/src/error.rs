use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: mysql_async::Error,
    },

    #[error("query failed: {0}")]
    QueryFailed(#[source] mysql_async::Error),

    #[error("expected column {0} to be present with exactly one row")]
    MissingColumn(&'static str),

    #[error("transaction rollback failed: {0}")]
    RollbackFailed(#[source] mysql_async::Error),
}
