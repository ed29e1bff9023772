use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn osc helper: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to read helper stdout: {0}")]
    PtOscStdout(#[source] std::io::Error),

    #[error("unexpected line on helper stderr")]
    PtOscUnexpectedStderr,

    #[error("failed to read helper stderr: {0}")]
    PtOscStderrIo(#[source] std::io::Error),

    #[error("failed to wait for helper exit: {0}")]
    Wait(#[source] std::io::Error),

    #[error("helper was killed by an unexpected signal")]
    UnexpectedSignal,

    #[error("stdio reader task panicked")]
    ReaderTaskPanicked,

    #[error("coordinator error: {0}")]
    Coordinator(#[from] coordinator_client::CoordinatorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
