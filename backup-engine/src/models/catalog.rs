use crate::executor::manifest::ManifestRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── BackupIndexEntry ──

/// Catalog record of a completed backup. Outlives the job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupIndexEntry {
    pub backup_id: String,
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub manifest: ManifestRecord,
}

/// Catalog entry plus a live check that the archive is still on disk.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogListing {
    #[serde(flatten)]
    pub entry: BackupIndexEntry,
    pub file_exists: bool,
}

/// Newest first, truncated to `limit`
pub fn newest_first(mut entries: Vec<BackupIndexEntry>, limit: usize) -> Vec<CatalogListing> {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    entries
        .into_iter()
        .take(limit)
        .map(|entry| {
            let file_exists = entry.archive_path.is_file();
            CatalogListing { entry, file_exists }
        })
        .collect()
}
