//! Shared fixture for engine tests: a throwaway site tree, an in-memory
//! store and a manual scheduler the test drains by hand.

use crate::config::Config;
use crate::coordinator::BackupCoordinator;
use crate::database::{Database, SqliteDatabase};
use crate::executor::{ChunkProcessor, ProcessOutcome};
use crate::models::BackupJob;
use crate::scheduler::ManualScheduler;
use crate::state::EngineState;
use crate::store::{self, JobStore, MemoryJobStore};
use crate::{EngineError, Result};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::sync::Arc;
use tempfile::TempDir;

/// Upper bound on processor calls before a test is considered hung
const MAX_CALLS: usize = 10_000;

pub(crate) struct Fixture {
    pub site: TempDir,
    pub output: TempDir,
    pub store: Arc<MemoryJobStore>,
    pub scheduler: Arc<ManualScheduler>,
    pub state: EngineState,
    pub processor: ChunkProcessor,
    pub coordinator: BackupCoordinator,
}

impl Fixture {
    /// Site with `files` small text files and no database
    pub fn new(files: usize, chunk_size: usize) -> Result<Self> {
        Self::build(files, chunk_size, None)
    }

    /// Same as [`Fixture::new`] plus an in-memory site database holding a
    /// populated `wp_options` table
    pub fn with_database(files: usize, chunk_size: usize) -> Result<Self> {
        let db = SqliteDatabase::from_connection(Connection::open_in_memory()?);
        db.execute(
            "CREATE TABLE wp_options (option_id INTEGER PRIMARY KEY, option_name TEXT NOT NULL, option_value TEXT)",
        )?;
        db.execute(
            "INSERT INTO wp_options (option_name, option_value) VALUES \
             ('siteurl', 'https://example.test'), ('blogname', 'It''s a site'), ('empty', NULL)",
        )?;
        Self::build(files, chunk_size, Some(Arc::new(db)))
    }

    fn build(files: usize, chunk_size: usize, database: Option<Arc<dyn Database>>) -> Result<Self> {
        let site = TempDir::new()?;
        let output = TempDir::new()?;
        for i in 0..files {
            fs::write(
                site.path().join(format!("file-{:04}.txt", i)),
                format!("content of file {}\n", i),
            )?;
        }

        let mut config = Config::default();
        config.backup.site_root = site.path().to_path_buf();
        config.backup.output_dir = output.path().to_path_buf();
        config.backup.chunk_size = chunk_size;
        config.database.table_prefix = "wp_".to_string();

        let store = Arc::new(MemoryJobStore::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let state = EngineState::new(config, store.clone(), scheduler.clone(), database);

        Ok(Self {
            site,
            output,
            store,
            scheduler,
            processor: ChunkProcessor::new(state.clone()),
            coordinator: BackupCoordinator::new(state.clone()),
            state,
        })
    }

    /// Run scheduled tasks until nothing is pending; returns every outcome
    pub fn drive(&self) -> Result<Vec<ProcessOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            let tasks = self.scheduler.take_pending();
            if tasks.is_empty() {
                return Ok(outcomes);
            }
            for task in tasks {
                outcomes.push(self.processor.process(task.backup_id())?);
            }
            if outcomes.len() > MAX_CALLS {
                return Err(EngineError::Conflict("scheduler never went idle".into()));
            }
        }
    }

    /// Call `processor` directly until the job terminates
    pub fn run_to_completion(&self, processor: &ChunkProcessor, backup_id: &str) -> Result<()> {
        for _ in 0..MAX_CALLS {
            self.scheduler.take_pending();
            match processor.process(backup_id)? {
                ProcessOutcome::Completed | ProcessOutcome::AlreadyTerminal(_) => return Ok(()),
                _ => {}
            }
        }
        Err(EngineError::Conflict(format!("{} never completed", backup_id)))
    }

    pub fn job(&self, backup_id: &str) -> Result<BackupJob> {
        store::load_job(self.store.as_ref(), backup_id)?
            .ok_or_else(|| EngineError::JobNotFound(backup_id.to_string()))
    }

    /// Raw persisted record, for byte-for-byte comparisons
    pub fn store_value(&self, backup_id: &str) -> Result<Value> {
        self.store
            .get(&store::job_key(backup_id))?
            .ok_or_else(|| EngineError::JobNotFound(backup_id.to_string()))
    }

    pub fn restore_store_value(&self, backup_id: &str, value: Value) -> Result<()> {
        self.store.put(&store::job_key(backup_id), &value, true)
    }

    /// Site file entries of the job's archive, name to content
    pub fn archive_contents(&self, backup_id: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let job = self.job(backup_id)?;
        let mut zip = zip::ZipArchive::new(File::open(&job.archive_path)?)?;
        let prefix = job.manifest_record.files_prefix();

        let mut contents = BTreeMap::new();
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if !entry.name().starts_with(&prefix) {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            contents.insert(name, data);
        }
        Ok(contents)
    }
}
