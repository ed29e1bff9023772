pub mod client;
pub mod error;
pub mod types;

pub use client::{CoordinatorClient, TlsIdentity};
pub use error::CoordinatorError;
pub use types::{FileRecord, FileType, MigrationRecord};
