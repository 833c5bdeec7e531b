//! Chunk processor - performs one bounded unit of backup work per call.
//!
//! Each [`ChunkProcessor::process`] call loads the job record, archives one
//! slice of the file manifest (plus the database dump on the first chunk),
//! persists the advanced cursor and asks the scheduler for the next call.
//! The persisted `current_chunk` is the recovery checkpoint: after a crash
//! the next call resumes from the last persisted chunk.

pub mod lease;
pub mod manifest;

use crate::archive::{AddOutcome, ArchiveWriter, Compression};
use crate::database::DatabaseDumper;
use crate::models::catalog::BackupIndexEntry;
use crate::models::{BackupJob, JobStatus, SkippedFile};
use crate::scheduler::ScheduledTask;
use crate::state::EngineState;
use crate::store::{self, JobStore};
use crate::{EngineError, Result};
use chrono::Utc;
use lease::JobLeases;
use manifest::{ManifestStats, DATABASE_ENTRY, MANIFEST_ENTRY};
use std::fs::File;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// What a single `process` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No record for this id
    NotFound,
    /// Completed, failed or cancelled before this call; nothing touched
    AlreadyTerminal(JobStatus),
    /// Another call holds the lease for this id
    Busy,
    /// One chunk archived, more remain
    ChunkDone { chunk: usize, chunks_total: usize },
    /// Final chunk archived and the catalog updated
    Completed,
    /// The job was cancelled while this chunk ran; its state was left alone
    CancelledMidChunk,
}

pub struct ChunkProcessor {
    state: EngineState,
    leases: JobLeases,
}

impl ChunkProcessor {
    pub fn new(state: EngineState) -> Self {
        Self {
            state,
            leases: JobLeases::new(),
        }
    }

    fn store(&self) -> &dyn JobStore {
        self.state.store.as_ref()
    }

    /// Process the next chunk of `backup_id`.
    ///
    /// Safe to call any number of times: unknown and terminal jobs return
    /// immediately without side effects. Only a failure to open or close the
    /// archive aborts the chunk; the job is then marked failed and the error
    /// returned.
    pub fn process(&self, backup_id: &str) -> Result<ProcessOutcome> {
        let Some(_lease) = self.leases.try_acquire(backup_id) else {
            debug!(backup_id = %backup_id, "Chunk already in progress, skipping duplicate invocation");
            return Ok(ProcessOutcome::Busy);
        };

        let Some(mut job) = store::load_job(self.store(), backup_id)? else {
            debug!(backup_id = %backup_id, "No job record, nothing to do");
            return Ok(ProcessOutcome::NotFound);
        };
        if job.status.is_terminal() {
            debug!(backup_id = %backup_id, status = %job.status, "Job already terminal");
            return Ok(ProcessOutcome::AlreadyTerminal(job.status));
        }

        if job.status == JobStatus::Pending {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
            info!(
                backup_id = %backup_id,
                files = job.total_files,
                chunks = job.chunks_total,
                "Backup started"
            );
        }

        let backup = &self.state.config.backup;
        let compression = Compression::from_config(&backup.compression, backup.compression_level)?;
        let mut archive = match self.open_archive(&job, compression) {
            Ok(archive) => archive,
            Err(e) => return self.fail(job, e),
        };

        if job.current_chunk == 0 && job.include_database {
            self.export_database(&mut job, &mut archive);
        }

        self.archive_slice(&mut job, &mut archive);
        job.current_chunk += 1;

        if job.all_chunks_done() {
            return self.finish(job, archive);
        }

        if let Err(e) = archive.close() {
            return self.fail(job, e);
        }
        if self.cancelled_meanwhile(&job)? {
            return Ok(ProcessOutcome::CancelledMidChunk);
        }

        store::save_job(self.store(), &job)?;
        self.state.scheduler.schedule_once(
            backup.reschedule_delay(),
            ScheduledTask::process_chunk(backup_id),
        );

        info!(
            backup_id = %backup_id,
            chunk = job.current_chunk,
            chunks_total = job.chunks_total,
            processed = job.processed_files,
            total = job.total_files,
            "Chunk finished"
        );
        Ok(ProcessOutcome::ChunkDone {
            chunk: job.current_chunk,
            chunks_total: job.chunks_total,
        })
    }

    /// Reopen the job's archive. An unreadable archive is rolled back to its
    /// last closed state by the writer; before the first checkpoint nothing
    /// was ever closed, so a torn leftover is discarded and started over.
    fn open_archive(&self, job: &BackupJob, compression: Compression) -> Result<ArchiveWriter> {
        match ArchiveWriter::open(&job.archive_path, compression) {
            Err(EngineError::ArchiveOpen(reason)) if job.current_chunk == 0 => {
                warn!(backup_id = %job.backup_id, reason = %reason, "Discarding archive left by an interrupted first chunk");
                ArchiveWriter::discard(&job.archive_path)?;
                ArchiveWriter::open(&job.archive_path, compression)
            }
            other => other,
        }
    }

    /// Stream the database dump into the archive. Failures are recorded on
    /// the job and never stop file chunking.
    fn export_database(&self, job: &mut BackupJob, archive: &mut ArchiveWriter) {
        let Some(db) = self.state.database.as_ref() else {
            warn!(backup_id = %job.backup_id, "Database export requested but no database is configured");
            job.errors
                .push("Database export failed: no database connection configured".to_string());
            return;
        };

        let prefix = job.manifest_record.table_prefix.clone();
        let dumper = DatabaseDumper::new(db.as_ref());
        let result = archive.add_with(DATABASE_ENTRY, |out| {
            let summary = dumper.dump_to(&prefix, out)?;
            debug!(tables = summary.tables, rows = summary.rows, "Database dump written");
            Ok(())
        });

        match result {
            Ok(AddOutcome::Added { bytes }) => {
                job.database_exported = true;
                info!(backup_id = %job.backup_id, bytes, "Database exported");
            }
            Ok(AddOutcome::AlreadyPresent) => {
                job.database_exported = true;
            }
            Err(e) => {
                warn!(backup_id = %job.backup_id, error = %e, "Database export failed");
                job.errors.push(format!("Database export failed: {}", e));
            }
        }
    }

    /// Archive the manifest slice of the current chunk. Each file either
    /// lands in the archive, in `skipped_files`, or in `errors`.
    fn archive_slice(&self, job: &mut BackupJob, archive: &mut ArchiveWriter) {
        let prefix = job.manifest_record.files_prefix();
        let slice = job.current_slice().to_vec();

        for entry in slice {
            let name = format!("{}{}", prefix, entry.relative_path);
            // Committed by an earlier run of this chunk; counts as written even
            // if the source has gone since
            if archive.contains(&name) {
                job.processed_files += 1;
                continue;
            }

            if let Err(reason) = check_readable(&entry.absolute_path) {
                warn!(backup_id = %job.backup_id, path = %entry.relative_path, reason = %reason, "Skipping file");
                job.skipped_files.push(SkippedFile {
                    path: entry.relative_path.clone(),
                    reason,
                });
                continue;
            }

            match archive.add_file(&entry.absolute_path, &name) {
                Ok(_) => job.processed_files += 1,
                Err(e) => {
                    warn!(backup_id = %job.backup_id, path = %entry.relative_path, error = %e, "Failed to archive file");
                    job.errors
                        .push(format!("Failed to add {}: {}", entry.relative_path, e));
                }
            }
        }
    }

    /// Terminating chunk: manifest entry, close, catalog, completed state.
    fn finish(&self, mut job: BackupJob, mut archive: ArchiveWriter) -> Result<ProcessOutcome> {
        let completed_at = Utc::now();
        job.manifest_record.stats = Some(ManifestStats {
            files_written: job.processed_files,
            files_skipped: job.skipped_files.len(),
            errors: job.errors.len(),
            database_included: job.database_exported,
            completed_at,
        });

        let manifest_json = serde_json::to_vec_pretty(&job.manifest_record)?;
        if let Err(e) = archive.add_bytes(MANIFEST_ENTRY, &manifest_json) {
            return self.fail(job, e);
        }
        let size_bytes = match archive.close() {
            Ok(size) => size,
            Err(e) => return self.fail(job, e),
        };
        if self.cancelled_meanwhile(&job)? {
            return Ok(ProcessOutcome::CancelledMidChunk);
        }

        job.status = JobStatus::Completed;
        job.completed_at = Some(completed_at);
        job.file_manifest.clear();

        // A crash after this append but before the save below redoes the
        // last chunk; the id check keeps the catalog free of duplicates.
        let already_listed = store::load_catalog(self.store())?
            .iter()
            .any(|e| e.backup_id == job.backup_id);
        if !already_listed {
            store::append_catalog(
                self.store(),
                BackupIndexEntry {
                    backup_id: job.backup_id.clone(),
                    archive_path: job.archive_path.clone(),
                    size_bytes,
                    created_at: job.created_at,
                    manifest: job.manifest_record.clone(),
                },
            )?;
        }

        store::clear_active(self.store(), &job.backup_id)?;
        store::save_job(self.store(), &job)?;

        info!(
            backup_id = %job.backup_id,
            files = job.processed_files,
            skipped = job.skipped_files.len(),
            errors = job.errors.len(),
            size_bytes,
            "Backup completed"
        );
        Ok(ProcessOutcome::Completed)
    }

    /// Whole-archive failure: mark the job failed, persist, return the error.
    fn fail(&self, mut job: BackupJob, err: EngineError) -> Result<ProcessOutcome> {
        error!(backup_id = %job.backup_id, error = %err, "Backup failed");

        if !self.cancelled_meanwhile(&job)? {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.errors.push(format!("Archive failure: {}", err));
            store::clear_active(self.store(), &job.backup_id)?;
            store::save_job(self.store(), &job)?;
        }

        Err(err)
    }

    /// Re-read the stored record before writing ours back. A cancel (or
    /// delete) that landed while this chunk ran wins: the record is left as
    /// is and any archive this chunk recreated is removed.
    fn cancelled_meanwhile(&self, job: &BackupJob) -> Result<bool> {
        let latest = store::load_job(self.store(), &job.backup_id)?;
        let cancelled = match latest {
            Some(latest) => latest.status == JobStatus::Cancelled,
            None => true,
        };

        if cancelled {
            info!(backup_id = %job.backup_id, "Job cancelled during chunk, discarding its results");
            ArchiveWriter::discard(&job.archive_path)?;
            store::clear_active(self.store(), &job.backup_id)?;
        }
        Ok(cancelled)
    }
}

/// Existence and readability check ahead of archiving
fn check_readable(path: &Path) -> std::result::Result<(), String> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err("file no longer exists".to_string());
        }
        Err(e) => return Err(format!("cannot stat file: {}", e)),
    };
    if !metadata.is_file() {
        return Err("not a regular file".to_string());
    }
    File::open(path)
        .map(|_| ())
        .map_err(|e| format!("file is not readable: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveReader;
    use crate::testing::Fixture;
    use std::collections::HashSet;
    use std::fs;

    #[test]
    fn test_chunks_visit_every_file_once() -> Result<()> {
        let fx = Fixture::new(7, 3)?;
        let summary = fx.coordinator.create(false, true)?;

        let outcomes = fx.drive()?;
        assert_eq!(
            outcomes,
            vec![
                ProcessOutcome::ChunkDone { chunk: 1, chunks_total: 3 },
                ProcessOutcome::ChunkDone { chunk: 2, chunks_total: 3 },
                ProcessOutcome::Completed,
            ]
        );

        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.current_chunk, 3);
        assert_eq!(job.processed_files, 7);
        assert!(job.file_manifest.is_empty());

        let reader = ArchiveReader::open(&job.archive_path)?;
        let names = reader.entry_names();
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
        assert_eq!(reader.count_under("site/"), 7);
        assert!(reader.has_entry(MANIFEST_ENTRY));
        Ok(())
    }

    #[test]
    fn test_reentry_after_terminal_is_noop() -> Result<()> {
        let fx = Fixture::new(2, 10)?;
        let summary = fx.coordinator.create(false, true)?;
        fx.drive()?;

        let job_before = fx.store_value(&summary.backup_id)?;
        let archive_before = fs::read(fx.job(&summary.backup_id)?.archive_path)?;

        let outcome = fx.processor.process(&summary.backup_id)?;
        assert_eq!(outcome, ProcessOutcome::AlreadyTerminal(JobStatus::Completed));
        assert_eq!(fx.store_value(&summary.backup_id)?, job_before);
        assert_eq!(fs::read(fx.job(&summary.backup_id)?.archive_path)?, archive_before);
        assert!(fx.scheduler.pending().is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_job_is_noop() -> Result<()> {
        let fx = Fixture::new(0, 10)?;
        assert_eq!(fx.processor.process("missing")?, ProcessOutcome::NotFound);
        Ok(())
    }

    #[test]
    fn test_resume_after_restart_matches_uninterrupted_run() -> Result<()> {
        let fx = Fixture::new(10, 4)?;

        let straight = fx.coordinator.create(false, true)?;
        fx.drive()?;

        let resumed = fx.coordinator.create(false, true)?;
        fx.scheduler.take_pending();
        assert!(matches!(fx.processor.process(&resumed.backup_id)?, ProcessOutcome::ChunkDone { .. }));

        // "Restart": a fresh processor over the same persisted state
        let restarted = ChunkProcessor::new(fx.state.clone());
        fx.scheduler.take_pending();
        fx.run_to_completion(&restarted, &resumed.backup_id)?;

        let a = fx.archive_contents(&straight.backup_id)?;
        let b = fx.archive_contents(&resumed.backup_id)?;
        assert_eq!(a, b);
        assert_eq!(fx.job(&resumed.backup_id)?.processed_files, 10);
        Ok(())
    }

    #[test]
    fn test_redone_chunk_after_lost_checkpoint() -> Result<()> {
        let fx = Fixture::new(6, 3)?;
        let summary = fx.coordinator.create(false, true)?;
        fx.scheduler.take_pending();

        // Chunk 1 commits archive bytes, then the state write is "lost"
        let checkpoint = fx.store_value(&summary.backup_id)?;
        fx.processor.process(&summary.backup_id)?;
        fx.restore_store_value(&summary.backup_id, checkpoint)?;

        fx.run_to_completion(&fx.processor, &summary.backup_id)?;

        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.processed_files, 6);
        assert!(job.errors.is_empty());
        assert_eq!(ArchiveReader::open(&job.archive_path)?.count_under("site/"), 6);
        Ok(())
    }

    #[test]
    fn test_vanished_file_is_skipped_not_fatal() -> Result<()> {
        let fx = Fixture::new(4, 10)?;
        let summary = fx.coordinator.create(false, true)?;
        fs::remove_file(fx.site.path().join("file-0001.txt"))?;

        fx.drive()?;
        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 3);
        assert_eq!(job.skipped_files.len(), 1);
        assert_eq!(job.skipped_files[0].path, "file-0001.txt");
        assert_eq!(job.skipped_files[0].reason, "file no longer exists");
        Ok(())
    }

    #[test]
    fn test_missing_database_recorded_but_files_continue() -> Result<()> {
        let fx = Fixture::new(3, 10)?;
        let summary = fx.coordinator.create(true, true)?;
        fx.drive()?;

        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 3);
        assert!(!job.database_exported);
        assert!(job.errors[0].starts_with("Database export failed"));
        Ok(())
    }

    #[test]
    fn test_database_entry_written_on_first_chunk() -> Result<()> {
        let fx = Fixture::with_database(5, 2)?;
        let summary = fx.coordinator.create(true, true)?;
        fx.scheduler.take_pending();
        fx.processor.process(&summary.backup_id)?;

        let job = fx.job(&summary.backup_id)?;
        assert!(job.database_exported);
        let mut reader = ArchiveReader::open(&job.archive_path)?;
        let dump = reader.read_to_string(DATABASE_ENTRY)?.unwrap_or_default();
        assert!(dump.contains("INSERT INTO `wp_options`"));
        Ok(())
    }

    #[test]
    fn test_unopenable_archive_fails_job() -> Result<()> {
        let fx = Fixture::new(4, 2)?;
        let summary = fx.coordinator.create(false, true)?;
        fx.scheduler.take_pending();
        fx.processor.process(&summary.backup_id)?;

        // Torn after a checkpoint with nothing to roll back to
        let job = fx.job(&summary.backup_id)?;
        fs::write(&job.archive_path, b"garbage, not a zip")?;

        let result = fx.processor.process(&summary.backup_id);
        assert!(matches!(result, Err(EngineError::ArchiveOpen(_))));

        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at.is_some());
        assert!(job.errors.last().is_some_and(|e| e.starts_with("Archive failure")));
        assert_eq!(
            fx.processor.process(&summary.backup_id)?,
            ProcessOutcome::AlreadyTerminal(JobStatus::Failed)
        );
        Ok(())
    }

    #[test]
    fn test_interrupted_first_chunk_starts_over() -> Result<()> {
        let fx = Fixture::new(3, 10)?;
        let summary = fx.coordinator.create(false, true)?;
        let job = fx.job(&summary.backup_id)?;
        fs::write(&job.archive_path, b"PK\x03\x04 killed before the first close")?;

        fx.drive()?;
        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 3);
        assert_eq!(ArchiveReader::open(&job.archive_path)?.count_under("site/"), 3);
        Ok(())
    }

    #[test]
    fn test_killed_mid_append_resumes_from_last_close() -> Result<()> {
        let fx = Fixture::new(6, 2)?;
        let summary = fx.coordinator.create(false, true)?;
        fx.scheduler.take_pending();
        fx.processor.process(&summary.backup_id)?;
        fx.scheduler.take_pending();

        // Chunk 2 writes an entry, then the process dies before close
        let job = fx.job(&summary.backup_id)?;
        let mut archive = ArchiveWriter::open(&job.archive_path, Compression::Stored)?;
        archive.add_file(&fx.site.path().join("file-0002.txt"), "site/file-0002.txt")?;
        std::mem::forget(archive);
        assert!(ArchiveReader::open(&job.archive_path).is_err());

        fx.run_to_completion(&fx.processor, &summary.backup_id)?;

        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 6);
        assert!(job.errors.is_empty());
        let mut reader = ArchiveReader::open(&job.archive_path)?;
        assert_eq!(reader.count_under("site/"), 6);
        assert!(reader.verify().is_ok());
        assert!(!crate::archive::writer::rollback_path(&job.archive_path).exists());
        Ok(())
    }

    #[test]
    fn test_committed_file_gone_before_redo_still_counts() -> Result<()> {
        let fx = Fixture::new(4, 2)?;
        let summary = fx.coordinator.create(false, true)?;
        fx.scheduler.take_pending();

        let checkpoint = fx.store_value(&summary.backup_id)?;
        fx.processor.process(&summary.backup_id)?;
        fx.restore_store_value(&summary.backup_id, checkpoint)?;
        fs::remove_file(fx.site.path().join("file-0001.txt"))?;

        fx.run_to_completion(&fx.processor, &summary.backup_id)?;

        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 4);
        assert!(job.skipped_files.is_empty());

        let destination = tempfile::TempDir::new()?;
        let report = fx.coordinator.restore(
            &summary.backup_id,
            &crate::RestoreOptions {
                database: false,
                files: true,
                destination: Some(destination.path().to_path_buf()),
            },
        )?;
        assert_eq!(report.files_restored, 4);
        assert!(destination.path().join("file-0001.txt").exists());
        Ok(())
    }

    #[test]
    fn test_concurrent_invocation_is_busy() -> Result<()> {
        let fx = Fixture::new(1, 10)?;
        let summary = fx.coordinator.create(false, true)?;

        let _held = fx.processor.leases.try_acquire(&summary.backup_id);
        assert_eq!(fx.processor.process(&summary.backup_id)?, ProcessOutcome::Busy);
        assert_eq!(fx.job(&summary.backup_id)?.status, JobStatus::Pending);
        Ok(())
    }

    #[test]
    fn test_cancel_between_chunks_stops_chain() -> Result<()> {
        let fx = Fixture::new(6, 2)?;
        let summary = fx.coordinator.create(false, true)?;
        fx.scheduler.take_pending();
        fx.processor.process(&summary.backup_id)?;

        fx.coordinator.cancel(&summary.backup_id)?;
        assert!(fx.scheduler.pending().is_empty());

        // A delivery that was already in flight finds the job cancelled
        assert_eq!(
            fx.processor.process(&summary.backup_id)?,
            ProcessOutcome::AlreadyTerminal(JobStatus::Cancelled)
        );
        let job = fx.job(&summary.backup_id)?;
        assert_eq!(job.current_chunk, 1);
        assert!(!job.archive_path.exists());
        Ok(())
    }

    #[test]
    fn test_cancel_during_chunk_is_not_overwritten() -> Result<()> {
        let fx = Fixture::new(4, 2)?;
        let summary = fx.coordinator.create(false, true)?;
        let in_flight = fx.job(&summary.backup_id)?;

        // Simulate the cancel landing after this chunk loaded its state
        fx.coordinator.cancel(&summary.backup_id)?;
        let mut archive = ArchiveWriter::open(&in_flight.archive_path, Compression::Stored)?;
        archive.add_bytes("site/partial", b"x")?;
        archive.close()?;

        assert!(fx.processor.cancelled_meanwhile(&in_flight)?);
        assert!(!in_flight.archive_path.exists());
        assert_eq!(fx.job(&summary.backup_id)?.status, JobStatus::Cancelled);
        Ok(())
    }

    #[test]
    fn test_empty_site_completes_in_one_call() -> Result<()> {
        let fx = Fixture::new(0, 500)?;
        let summary = fx.coordinator.create(false, true)?;
        assert_eq!(fx.drive()?, vec![ProcessOutcome::Completed]);

        let status = fx.coordinator.status(&summary.backup_id)?;
        assert_eq!(status.progress, 100.0);
        assert_eq!(fx.job(&summary.backup_id)?.current_chunk, 1);
        Ok(())
    }
}
