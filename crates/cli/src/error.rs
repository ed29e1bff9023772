use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] runner_config::ConfigError),

    #[error("failed to connect to target database: {0}")]
    Db(#[from] db_client::DbError),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] coordinator_client::CoordinatorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
