pub mod error;
pub mod migration_ops;
pub mod state_machine;

pub use error::MigrationError;
pub use state_machine::{run_step, JobContext, StepOutcome};
