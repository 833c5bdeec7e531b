//! Custom error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Backup job not found: {0}")]
    JobNotFound(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Cannot open archive: {0}")]
    ArchiveOpen(String),

    #[error("Archive file is missing: {0}")]
    ArchiveMissing(String),

    #[error("Archive integrity check failed: {0}")]
    Integrity(String),
}

impl EngineError {
    /// Stable machine-readable code for the request layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config(_) | EngineError::ConfigParse(_) => "invalid_config",
            EngineError::Io(_) => "io_error",
            EngineError::Serialization(_) => "serialization_error",
            EngineError::Sqlite(_) | EngineError::Database(_) => "database_error",
            EngineError::Pool(_) | EngineError::Store(_) => "store_error",
            EngineError::Archive(_) => "archive_error",
            EngineError::JobNotFound(_) => "job_not_found",
            EngineError::BackupNotFound(_) => "backup_not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::ArchiveOpen(_) => "archive_open_failed",
            EngineError::ArchiveMissing(_) => "archive_missing",
            EngineError::Integrity(_) => "integrity_check_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
