//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file; every field has a default so a
//! partial file (or none at all) is valid.

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root of the site file tree that gets archived
    #[serde(default = "default_site_root")]
    pub site_root: PathBuf,

    /// Directory the archives are written to (always excluded from enumeration)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Files per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Directory names excluded anywhere in a path (case-insensitive)
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// File extensions excluded, without the leading dot (case-insensitive)
    #[serde(default = "default_exclude_extensions")]
    pub exclude_extensions: Vec<String>,

    /// Top-level archive prefix for the site's files
    #[serde(default = "default_files_root")]
    pub files_root: String,

    /// Compression algorithm (zstd, deflate, stored)
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Compression level (1-22 for zstd, 0-9 for deflate)
    #[serde(default = "default_compression_level")]
    pub compression_level: i64,

    /// Delay before the next chunk is requested
    #[serde(default = "default_reschedule_delay_secs")]
    pub reschedule_delay_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file of the site database. No path means no database export.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Only tables whose name starts with this prefix are exported
    #[serde(default)]
    pub table_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file holding job records and the backup catalog
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_site_root() -> PathBuf {
    PathBuf::from("/var/www/site")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/var/www/site/backups")
}

fn default_chunk_size() -> usize {
    500
}

fn default_exclude_dirs() -> Vec<String> {
    vec![".git".to_string(), "node_modules".to_string(), "cache".to_string()]
}

fn default_exclude_extensions() -> Vec<String> {
    vec!["log".to_string()]
}

fn default_files_root() -> String {
    "site".to_string()
}

fn default_compression() -> String {
    "zstd".to_string()
}

fn default_compression_level() -> i64 {
    3
}

fn default_reschedule_delay_secs() -> u64 {
    1
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/backup-engine/jobs.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            site_root: default_site_root(),
            output_dir: default_output_dir(),
            chunk_size: default_chunk_size(),
            exclude_dirs: default_exclude_dirs(),
            exclude_extensions: default_exclude_extensions(),
            files_root: default_files_root(),
            compression: default_compression(),
            compression_level: default_compression_level(),
            reschedule_delay_secs: default_reschedule_delay_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backup: BackupConfig::default(),
            database: DatabaseConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.backup.chunk_size == 0 {
            return Err(EngineError::Config("backup.chunk_size must be at least 1".into()));
        }
        if !matches!(self.backup.compression.as_str(), "zstd" | "deflate" | "stored") {
            return Err(EngineError::Config(format!(
                "unknown compression '{}' (expected zstd, deflate or stored)",
                self.backup.compression
            )));
        }
        if self.backup.files_root.is_empty() || self.backup.files_root.contains('/') {
            return Err(EngineError::Config(
                "backup.files_root must be a single non-empty path segment".into(),
            ));
        }
        Ok(())
    }
}

impl BackupConfig {
    /// Reschedule delay, never below one second
    pub fn reschedule_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reschedule_delay_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backup.chunk_size, 500);
        assert_eq!(config.backup.files_root, "site");
        assert!(config.database.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[backup]\nsite_root = \"/srv/www\"\nchunk_size = 50\n")?;
        writeln!(file, "[database]\ntable_prefix = \"wp_\"")?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.backup.site_root, PathBuf::from("/srv/www"));
        assert_eq!(config.backup.chunk_size, 50);
        assert_eq!(config.backup.compression, "zstd");
        assert_eq!(config.database.table_prefix, "wp_");
        assert_eq!(config.log.level, "info");
        Ok(())
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.backup.chunk_size = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_compression() {
        let mut config = Config::default();
        config.backup.compression = "lzma".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reschedule_delay_floor() {
        let mut config = BackupConfig::default();
        config.reschedule_delay_secs = 0;
        assert_eq!(config.reschedule_delay(), std::time::Duration::from_secs(1));
    }
}
