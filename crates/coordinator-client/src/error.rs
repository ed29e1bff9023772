use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Transport-level failure (connect, TLS, timeout). Wrapped with the
    /// operation name per spec.md §7's propagation policy.
    #[error("{op} failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The response body didn't decode into the expected shape.
    #[error("{op}: invalid migration record: {source}")]
    InvalidMigration {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Another runner claimed the migration between our `Staged` read and
    /// our `Unstage` call.
    #[error("migration {0} was stolen by another runner")]
    Stolen(i64),

    /// The coordinator responded with a non-success HTTP status.
    #[error("{op}: coordinator returned HTTP {status}: {body}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },
}
