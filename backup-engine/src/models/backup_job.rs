use crate::executor::manifest::ManifestRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── JobStatus ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── FileEntry ──

/// One file of the job manifest, sized at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub absolute_path: PathBuf,
    /// Forward-slash separated path below the site root
    pub relative_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

// ── BackupJob ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub backup_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub include_database: bool,
    pub include_files: bool,
    /// Set once the dump entry is committed to the archive
    #[serde(default)]
    pub database_exported: bool,
    #[serde(default)]
    pub file_manifest: Vec<FileEntry>,
    pub total_files: usize,
    pub total_size: u64,
    pub processed_files: usize,
    /// Fixed at creation so a config change cannot shift the cursor of a running job
    pub chunk_size: usize,
    pub current_chunk: usize,
    pub chunks_total: usize,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub skipped_files: Vec<SkippedFile>,
    pub archive_path: PathBuf,
    pub manifest_record: ManifestRecord,
}

pub struct CreateJobData {
    pub include_database: bool,
    pub include_files: bool,
    pub file_manifest: Vec<FileEntry>,
    pub total_size: u64,
    pub chunk_size: usize,
    pub output_dir: PathBuf,
    pub manifest_record: ManifestRecord,
}

impl BackupJob {
    pub fn new(backup_id: String, data: CreateJobData) -> Self {
        let total_files = data.file_manifest.len();
        let archive_path = archive_path_for(&data.output_dir, &backup_id);
        Self {
            backup_id,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            include_database: data.include_database,
            include_files: data.include_files,
            database_exported: false,
            file_manifest: data.file_manifest,
            total_files,
            total_size: data.total_size,
            processed_files: 0,
            chunk_size: data.chunk_size,
            current_chunk: 0,
            // An empty manifest still needs one chunk for the dump and manifest entries
            chunks_total: total_files.div_ceil(data.chunk_size).max(1),
            errors: Vec::new(),
            skipped_files: Vec::new(),
            archive_path,
            manifest_record: data.manifest_record,
        }
    }

    /// Manifest slice belonging to the current chunk, clipped to the manifest length
    pub fn current_slice(&self) -> &[FileEntry] {
        let start = self.current_chunk.saturating_mul(self.chunk_size);
        if start >= self.file_manifest.len() {
            return &[];
        }
        let end = (start + self.chunk_size).min(self.file_manifest.len());
        &self.file_manifest[start..end]
    }

    pub fn all_chunks_done(&self) -> bool {
        self.current_chunk >= self.chunks_total
    }

    /// Percentage of processed files, one decimal place
    pub fn progress_percent(&self) -> f64 {
        if self.total_files == 0 {
            return if self.status == JobStatus::Completed { 100.0 } else { 0.0 };
        }
        let raw = self.processed_files as f64 / self.total_files as f64 * 100.0;
        (raw * 10.0).round() / 10.0
    }

    pub fn recent_errors(&self, limit: usize) -> Vec<String> {
        let skip = self.errors.len().saturating_sub(limit);
        self.errors[skip..].to_vec()
    }
}

/// Time-based id with a random suffix, e.g. `20261018-211503-3f9a0c1d`
pub fn generate_backup_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}

pub fn archive_path_for(output_dir: &std::path::Path, backup_id: &str) -> PathBuf {
    output_dir.join(format!("backup-{}.zip", backup_id))
}
