//! Public backup operations: create, status, cancel, list, delete, restore.
//!
//! Request validation happens in the calling layer; these operations only
//! enforce job-state rules.

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::database::DatabaseRestorer;
use crate::executor::manifest::{ManifestRecord, DATABASE_ENTRY};
use crate::fs::protect::secure_output_dir;
use crate::fs::walker::{enumerate, EnumerateOptions};
use crate::models::backup_job::{generate_backup_id, CreateJobData};
use crate::models::catalog::{newest_first, CatalogListing};
use crate::models::{BackupJob, JobStatus};
use crate::scheduler::ScheduledTask;
use crate::state::EngineState;
use crate::store::{self, JobStore};
use crate::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Number of trailing errors reported by [`BackupCoordinator::status`]
const STATUS_ERROR_TAIL: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub backup_id: String,
    pub status: JobStatus,
    pub total_files: usize,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub backup_id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub total_files: usize,
    pub processed_files: usize,
    pub total_size: u64,
    pub skipped_count: usize,
    pub error_count: usize,
    pub current_chunk: usize,
    pub chunks_total: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recent_errors: Vec<String>,
    /// Current archive size, reported once the backup completed
    pub archive_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub database: bool,
    pub files: bool,
    /// Where files are extracted; defaults to the configured site root
    pub destination: Option<PathBuf>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            database: true,
            files: true,
            destination: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub success: bool,
    pub database_restored: bool,
    pub database_statements: usize,
    pub database_errors: Vec<String>,
    pub files_restored: usize,
    pub file_errors: Vec<String>,
}

pub struct BackupCoordinator {
    state: EngineState,
}

impl BackupCoordinator {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }

    fn store(&self) -> &dyn JobStore {
        self.state.store.as_ref()
    }

    /// Enumerate the site, persist a pending job and ask for its first chunk.
    pub fn create(&self, include_database: bool, include_files: bool) -> Result<JobSummary> {
        let config = &self.state.config;
        secure_output_dir(&config.backup.output_dir).map_err(|e| {
            EngineError::ArchiveOpen(format!(
                "cannot prepare output directory {}: {}",
                config.backup.output_dir.display(),
                e
            ))
        })?;

        let enumeration = if include_files {
            enumerate(&config.backup.site_root, &EnumerateOptions::from_config(&config.backup))
        } else {
            Default::default()
        };

        let backup_id = generate_backup_id();
        let job = BackupJob::new(
            backup_id.clone(),
            CreateJobData {
                include_database,
                include_files,
                file_manifest: enumeration.files,
                total_size: enumeration.total_bytes,
                chunk_size: config.backup.chunk_size,
                output_dir: config.backup.output_dir.clone(),
                manifest_record: ManifestRecord::new(
                    include_database,
                    include_files,
                    &config.database.table_prefix,
                    &config.backup.files_root,
                ),
            },
        );

        store::save_job(self.store(), &job)?;
        store::mark_active(self.store(), &backup_id)?;
        self.state
            .scheduler
            .schedule_once(Duration::ZERO, ScheduledTask::process_chunk(&backup_id));
        self.state.scheduler.trigger_now();

        info!(
            backup_id = %backup_id,
            files = job.total_files,
            bytes = job.total_size,
            chunks = job.chunks_total,
            include_database,
            include_files,
            "Backup created"
        );

        Ok(JobSummary {
            backup_id,
            status: job.status,
            total_files: job.total_files,
            total_size: job.total_size,
        })
    }

    pub fn status(&self, backup_id: &str) -> Result<JobProgress> {
        let job = store::load_job(self.store(), backup_id)?
            .ok_or_else(|| EngineError::JobNotFound(backup_id.to_string()))?;

        let archive_size = if job.status == JobStatus::Completed {
            std::fs::metadata(&job.archive_path).ok().map(|m| m.len())
        } else {
            None
        };

        Ok(JobProgress {
            progress: job.progress_percent(),
            recent_errors: job.recent_errors(STATUS_ERROR_TAIL),
            backup_id: job.backup_id,
            status: job.status,
            total_files: job.total_files,
            processed_files: job.processed_files,
            total_size: job.total_size,
            skipped_count: job.skipped_files.len(),
            error_count: job.errors.len(),
            current_chunk: job.current_chunk,
            chunks_total: job.chunks_total,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            archive_size,
        })
    }

    /// Stop future chunks and discard the partial archive. A chunk already
    /// running finishes, notices the cancellation and discards its work.
    pub fn cancel(&self, backup_id: &str) -> Result<()> {
        let mut job = store::load_job(self.store(), backup_id)?
            .ok_or_else(|| EngineError::JobNotFound(backup_id.to_string()))?;

        if job.status == JobStatus::Completed {
            return Err(EngineError::Conflict(format!(
                "Backup {} has already completed and cannot be cancelled",
                backup_id
            )));
        }

        self.state
            .scheduler
            .cancel_scheduled(&ScheduledTask::process_chunk(backup_id));
        ArchiveWriter::discard(&job.archive_path)?;

        if !job.status.is_terminal() {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            store::save_job(self.store(), &job)?;
            info!(backup_id = %backup_id, "Backup cancelled");
        }
        store::clear_active(self.store(), backup_id)?;

        Ok(())
    }

    /// Completed backups, newest first
    pub fn list(&self, limit: usize) -> Result<Vec<CatalogListing>> {
        Ok(newest_first(store::load_catalog(self.store())?, limit))
    }

    /// Remove a completed backup: archive file, catalog entry and job record
    pub fn delete(&self, backup_id: &str) -> Result<()> {
        let entry = store::load_catalog(self.store())?
            .into_iter()
            .find(|e| e.backup_id == backup_id)
            .ok_or_else(|| EngineError::BackupNotFound(backup_id.to_string()))?;

        ArchiveWriter::discard(&entry.archive_path)?;
        store::remove_catalog(self.store(), backup_id)?;
        store::delete_job(self.store(), backup_id)?;

        info!(backup_id = %backup_id, "Backup deleted");
        Ok(())
    }

    /// Replay a completed backup. Database and files are restored
    /// independently: a failed database replay still lets file extraction
    /// run, but the report is unsuccessful.
    pub fn restore(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        let entry = store::load_catalog(self.store())?
            .into_iter()
            .find(|e| e.backup_id == backup_id)
            .ok_or_else(|| EngineError::BackupNotFound(backup_id.to_string()))?;

        let mut reader = ArchiveReader::open(&entry.archive_path)?;
        let manifest = reader.verify()?;
        let mut report = RestoreReport::default();

        info!(
            backup_id = %backup_id,
            database = options.database,
            files = options.files,
            "Restore started"
        );

        if options.database {
            self.restore_database(&mut reader, &mut report)?;
        }

        if options.files {
            let destination = options
                .destination
                .clone()
                .unwrap_or_else(|| self.state.config.backup.site_root.clone());
            let summary = reader.extract_under(&manifest.files_prefix(), &destination)?;
            report.files_restored = summary.restored;
            report.file_errors = summary.errors;
        }

        report.success = report.database_errors.is_empty() && report.file_errors.is_empty();
        if report.success {
            info!(backup_id = %backup_id, files = report.files_restored, "Restore completed");
        } else {
            warn!(
                backup_id = %backup_id,
                database_errors = report.database_errors.len(),
                file_errors = report.file_errors.len(),
                "Restore finished with errors"
            );
        }
        Ok(report)
    }

    fn restore_database(&self, reader: &mut ArchiveReader, report: &mut RestoreReport) -> Result<()> {
        let Some(script) = reader.read_to_string(DATABASE_ENTRY)? else {
            report
                .database_errors
                .push("Archive contains no database dump".to_string());
            return Ok(());
        };
        let Some(db) = self.state.database.as_ref() else {
            report
                .database_errors
                .push("No database connection configured".to_string());
            return Ok(());
        };

        let summary = DatabaseRestorer::new(db.as_ref()).restore(&script);
        report.database_restored = summary.success();
        report.database_statements = summary.statements;
        report.database_errors = summary.errors;
        Ok(())
    }

    /// Re-schedule every job that had not terminated, e.g. after a host
    /// restart. Returns the ids that were scheduled.
    pub fn resume_pending(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();

        for backup_id in store::active_jobs(self.store())? {
            match store::load_job(self.store(), &backup_id)? {
                Some(job) if !job.status.is_terminal() => {
                    self.state
                        .scheduler
                        .schedule_once(Duration::ZERO, ScheduledTask::process_chunk(&backup_id));
                    info!(
                        backup_id = %backup_id,
                        chunk = job.current_chunk,
                        chunks_total = job.chunks_total,
                        "Resuming backup"
                    );
                    resumed.push(backup_id);
                }
                _ => store::clear_active(self.store(), &backup_id)?,
            }
        }

        if !resumed.is_empty() {
            self.state.scheduler.trigger_now();
        }
        Ok(resumed)
    }
}
