//! Job store backed by an SQLite options table.

use super::JobStore;
use crate::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS options (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  autoload INTEGER NOT NULL DEFAULT 1,
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

pub fn create_pool(db_path: &Path) -> Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas are per connection, so they run on every pooled connection
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = Pool::builder().max_size(4).build(manager)?;
    Ok(pool)
}

pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let pool = create_pool(db_path)?;
        Self::from_pool(pool)
    }

    pub fn from_pool(pool: DbPool) -> Result<Self> {
        tracing::info!("[Store] Preparing options table");
        let conn = pool.get()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }
}

impl JobStore for SqliteJobStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.pool.get()?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM options WHERE key = ?", params![key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &Value, durable: bool) -> Result<()> {
        let conn = self.pool.get()?;
        let text = serde_json::to_string(value)?;
        conn.execute(
            "INSERT INTO options (key, value, autoload, updated_at) VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, autoload = excluded.autoload, updated_at = excluded.updated_at",
            params![key, text, durable as i64],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let changes = conn.execute("DELETE FROM options WHERE key = ?", params![key])?;
        Ok(changes > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_and_overwrite() -> Result<()> {
        let dir = TempDir::new()?;
        let store = SqliteJobStore::open(&dir.path().join("state/jobs.db"))?;

        assert!(store.get("missing")?.is_none());
        store.put("backup_job_1", &json!({"status": "pending"}), true)?;
        store.put("backup_job_1", &json!({"status": "processing"}), true)?;
        assert_eq!(store.get("backup_job_1")?, Some(json!({"status": "processing"})));

        assert!(store.delete("backup_job_1")?);
        assert!(!store.delete("backup_job_1")?);
        Ok(())
    }

    #[test]
    fn test_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("jobs.db");
        {
            let store = SqliteJobStore::open(&path)?;
            store.put("backup_catalog", &json!([{"backup_id": "a"}]), true)?;
        }
        let reopened = SqliteJobStore::open(&path)?;
        assert_eq!(reopened.get("backup_catalog")?, Some(json!([{"backup_id": "a"}])));
        Ok(())
    }
}
