//! Manifest record written into the archive.
//!
//! The same record is copied into the catalog entry once the backup
//! completes, so listing never has to open an archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Archive entry holding the serialized manifest record.
pub const MANIFEST_ENTRY: &str = "backup-manifest.json";

/// Archive entry holding the logical database dump.
pub const DATABASE_ENTRY: &str = "database.sql";

/// Backup manifest, serialized as `backup-manifest.json` at the archive root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub generator: String,
    pub version: String,
    pub host: String,
    pub created_at: DateTime<Utc>,
    pub include_database: bool,
    pub include_files: bool,
    pub table_prefix: String,
    pub files_root: String,
    /// Filled in by the terminating chunk
    #[serde(default)]
    pub stats: Option<ManifestStats>,
}

/// Final counters of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestStats {
    pub files_written: usize,
    pub files_skipped: usize,
    pub errors: usize,
    pub database_included: bool,
    pub completed_at: DateTime<Utc>,
}

impl ManifestRecord {
    pub fn new(include_database: bool, include_files: bool, table_prefix: &str, files_root: &str) -> Self {
        Self {
            generator: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            created_at: Utc::now(),
            include_database,
            include_files,
            table_prefix: table_prefix.to_string(),
            files_root: files_root.to_string(),
            stats: None,
        }
    }

    /// Archive prefix under which the site's files live, with trailing slash
    pub fn files_prefix(&self) -> String {
        format!("{}/", self.files_root)
    }
}
