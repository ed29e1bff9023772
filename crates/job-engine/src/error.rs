use db_client::DbError;
use thiserror::Error;

/// Error taxonomy for a single migration step, grouped by kind rather than
/// by source module (spec.md §7): transient infrastructure, contract
/// violation, and helper-subprocess errors all surface here so the worker
/// can decide between `Fail` and `Error` in one place.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to connect to target database: {0}")]
    DbConnect(#[source] DbError),

    #[error("table stats query for {database}.{table} returned {got} rows, expected exactly 1")]
    TableStats { database: String, table: String, got: usize },

    #[error("final_insert is not a well-formed INSERT statement")]
    InvalidInsert,

    #[error("dry-run create target {0} already exists")]
    DryRunCreatesNew(String),

    #[error("query failed: {0}")]
    QueryFailed(#[from] DbError),

    #[error("unknown migration status: {0}")]
    UnknownStatus(#[from] model::UnknownStatus),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] coordinator_client::CoordinatorError),

    #[error("osc supervisor error: {0}")]
    Supervisor(#[from] osc_supervisor::SupervisorError),
}

impl MigrationError {
    /// During RUN, helper-subprocess errors are resumable and reported via
    /// `Error` rather than `Fail` (spec.md §4.4, §7). Every other error kind,
    /// in every other step, is fatal for the current attempt.
    pub fn is_resumable_during_run(&self) -> bool {
        matches!(self, MigrationError::Supervisor(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_supervisor_errors_are_resumable() {
        assert!(!MigrationError::InvalidInsert.is_resumable_during_run());
        let supervisor_err = MigrationError::Supervisor(osc_supervisor::SupervisorError::UnexpectedSignal);
        assert!(supervisor_err.is_resumable_during_run());
    }
}
