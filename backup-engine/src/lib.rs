//! Backup Engine Library
//!
//! Chunked, resumable site backups: a file tree plus a logical database
//! dump written into a single zip archive, one bounded chunk per scheduled
//! invocation.

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod executor;
pub mod fs;
pub mod models;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{BackupCoordinator, RestoreOptions, RestoreReport};
pub use executor::{ChunkProcessor, ProcessOutcome};
pub use state::EngineState;
pub use utils::errors::{EngineError, Result};
