//! Durable key/value storage for job state and the backup catalog.
//!
//! The engine only ever talks to the [`JobStore`] trait; the typed helpers
//! below fix the key layout:
//!
//! | Key                   | Value                                  |
//! |-----------------------|----------------------------------------|
//! | `backup_job_<id>`     | one [`BackupJob`] record               |
//! | `backup_catalog`      | list of [`BackupIndexEntry`]           |
//! | `backup_active_jobs`  | ids of jobs that have not terminated   |
//!
//! Every read-modify-write is last-writer-wins.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use crate::models::{BackupIndexEntry, BackupJob};
use crate::Result;
use serde_json::Value;

pub const JOB_KEY_PREFIX: &str = "backup_job_";
pub const CATALOG_KEY: &str = "backup_catalog";
pub const ACTIVE_JOBS_KEY: &str = "backup_active_jobs";

/// Persistent option store supplied by the host environment.
pub trait JobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// `durable` marks records that must be loaded eagerly by the host
    /// (job records and the catalog); transient values pass `false`.
    fn put(&self, key: &str, value: &Value, durable: bool) -> Result<()>;

    /// Returns whether a record was removed
    fn delete(&self, key: &str) -> Result<bool>;
}

pub fn job_key(backup_id: &str) -> String {
    format!("{}{}", JOB_KEY_PREFIX, backup_id)
}

pub fn load_job(store: &dyn JobStore, backup_id: &str) -> Result<Option<BackupJob>> {
    match store.get(&job_key(backup_id))? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub fn save_job(store: &dyn JobStore, job: &BackupJob) -> Result<()> {
    let value = serde_json::to_value(job)?;
    store.put(&job_key(&job.backup_id), &value, true)
}

pub fn delete_job(store: &dyn JobStore, backup_id: &str) -> Result<bool> {
    store.delete(&job_key(backup_id))
}

pub fn load_catalog(store: &dyn JobStore) -> Result<Vec<BackupIndexEntry>> {
    match store.get(CATALOG_KEY)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}

fn save_catalog(store: &dyn JobStore, entries: &[BackupIndexEntry]) -> Result<()> {
    store.put(CATALOG_KEY, &serde_json::to_value(entries)?, true)
}

pub fn append_catalog(store: &dyn JobStore, entry: BackupIndexEntry) -> Result<()> {
    let mut entries = load_catalog(store)?;
    entries.push(entry);
    save_catalog(store, &entries)
}

/// Removes and returns the catalog entry for `backup_id`
pub fn remove_catalog(store: &dyn JobStore, backup_id: &str) -> Result<Option<BackupIndexEntry>> {
    let mut entries = load_catalog(store)?;
    let Some(pos) = entries.iter().position(|e| e.backup_id == backup_id) else {
        return Ok(None);
    };
    let removed = entries.remove(pos);
    save_catalog(store, &entries)?;
    Ok(Some(removed))
}

pub fn active_jobs(store: &dyn JobStore) -> Result<Vec<String>> {
    match store.get(ACTIVE_JOBS_KEY)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}

pub fn mark_active(store: &dyn JobStore, backup_id: &str) -> Result<()> {
    let mut ids = active_jobs(store)?;
    if !ids.iter().any(|id| id == backup_id) {
        ids.push(backup_id.to_string());
        store.put(ACTIVE_JOBS_KEY, &serde_json::to_value(&ids)?, false)?;
    }
    Ok(())
}

pub fn clear_active(store: &dyn JobStore, backup_id: &str) -> Result<()> {
    let mut ids = active_jobs(store)?;
    let before = ids.len();
    ids.retain(|id| id != backup_id);
    if ids.len() != before {
        store.put(ACTIVE_JOBS_KEY, &serde_json::to_value(&ids)?, false)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::manifest::ManifestRecord;
    use chrono::Utc;
    use std::path::PathBuf;

    fn index_entry(id: &str) -> BackupIndexEntry {
        BackupIndexEntry {
            backup_id: id.to_string(),
            archive_path: PathBuf::from(format!("/out/backup-{}.zip", id)),
            size_bytes: 42,
            created_at: Utc::now(),
            manifest: ManifestRecord::new(true, true, "", "site"),
        }
    }

    #[test]
    fn test_catalog_append_and_remove() -> Result<()> {
        let store = MemoryJobStore::new();
        append_catalog(&store, index_entry("a"))?;
        append_catalog(&store, index_entry("b"))?;
        assert_eq!(load_catalog(&store)?.len(), 2);

        let removed = remove_catalog(&store, "a")?;
        assert_eq!(removed.map(|e| e.backup_id), Some("a".to_string()));
        assert!(remove_catalog(&store, "a")?.is_none());
        assert_eq!(load_catalog(&store)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_active_set_is_deduplicated() -> Result<()> {
        let store = MemoryJobStore::new();
        mark_active(&store, "x")?;
        mark_active(&store, "x")?;
        mark_active(&store, "y")?;
        assert_eq!(active_jobs(&store)?, vec!["x".to_string(), "y".to_string()]);

        clear_active(&store, "x")?;
        assert_eq!(active_jobs(&store)?, vec!["y".to_string()]);
        Ok(())
    }

    #[test]
    fn test_missing_job_is_none() -> Result<()> {
        let store = MemoryJobStore::new();
        assert!(load_job(&store, "nope")?.is_none());
        assert!(!delete_job(&store, "nope")?);
        Ok(())
    }
}
