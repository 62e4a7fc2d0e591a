//! All job state is stored in a SQLite database

/// Connect to a SQLite database
pub mod open;
/// [crate::job::JobStore] backed by the `job` table
pub mod job;

pub use job::SqliteJobStore;
