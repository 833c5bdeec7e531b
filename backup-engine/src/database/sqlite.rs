//! SQLite implementation of the site database connection.

use super::{Database, Row, SqlValue};
use crate::{EngineError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// One connection behind a mutex: connection-scoped pragmas (foreign keys)
/// must hold for a whole replay.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Database("connection mutex poisoned".into()))
    }
}

fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern with `ESCAPE '\'`
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl Database for SqliteDatabase {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        self.query_each(sql, &mut |row| {
            out.push(row.to_vec());
            Ok(())
        })?;
        Ok(out)
    }

    /// Rows are decoded one at a time straight off the cursor
    fn query_each(&self, sql: &str, visit: &mut dyn FnMut(&[SqlValue]) -> Result<()>) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut values = Vec::with_capacity(columns);
        let mut count = 0;
        while let Some(row) = rows.next()? {
            values.clear();
            for i in 0..columns {
                values.push(to_sql_value(row.get_ref(i)?));
            }
            visit(&values)?;
            count += 1;
        }
        Ok(count)
    }

    fn execute(&self, sql: &str) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(sql, [])?)
    }

    fn tables(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' AND name LIKE ?1 ESCAPE '\\'
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![like_prefix(prefix)], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn create_table_sql(&self, table: &str) -> Result<String> {
        let conn = self.lock()?;
        let sql: String = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(sql)
    }

    fn foreign_key_checks(&self, enabled: bool) -> String {
        format!("PRAGMA foreign_keys = {};", if enabled { "ON" } else { "OFF" })
    }
}
