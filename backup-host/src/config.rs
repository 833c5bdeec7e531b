use backup_engine::Config;
use std::path::{Path, PathBuf};

/// Load the engine configuration: TOML file (if given), then environment
/// overrides (a `.env` file is honoured), then validation.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let _ = dotenvy::dotenv();

    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Apply `BACKUP_*` and `LOG_LEVEL` overrides. Unparsable numbers are ignored.
pub fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("BACKUP_SITE_ROOT") {
        config.backup.site_root = PathBuf::from(v);
    }
    if let Some(v) = var("BACKUP_OUTPUT_DIR") {
        config.backup.output_dir = PathBuf::from(v);
    }
    if let Some(v) = var("BACKUP_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
        config.backup.chunk_size = v;
    }
    if let Some(v) = var("BACKUP_DATABASE_PATH") {
        config.database.path = (!v.is_empty()).then(|| PathBuf::from(v));
    }
    if let Some(v) = var("BACKUP_TABLE_PREFIX") {
        config.database.table_prefix = v;
    }
    if let Some(v) = var("BACKUP_STORE_PATH") {
        config.store.path = PathBuf::from(v);
    }
    if let Some(v) = var("LOG_LEVEL") {
        config.log.level = v;
    }
}
