pub mod argv;
pub mod error;
pub mod handoff;
pub mod registry;
pub mod replication;
pub mod stdio;
pub mod supervisor;

pub use error::SupervisorError;
pub use handoff::run_handoff_watcher;
pub use registry::{AcceptFlag, InFlightRegistry};
pub use supervisor::{kill_helper, Supervisor, SupervisorOutcome};
