pub mod client;
pub mod error;
pub mod params;
pub mod retry;

pub use client::{ColumnRows, DbClient, IndexedRows, RetryLimits, TlsConfig};
pub use error::DbError;
pub use params::DbParam;
