//! Persisted records: backup jobs and the completed-backup catalog.

pub mod backup_job;
pub mod catalog;

pub use backup_job::{BackupJob, FileEntry, JobStatus, SkippedFile};
pub use catalog::{BackupIndexEntry, CatalogListing};
