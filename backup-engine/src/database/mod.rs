//! Logical database export and replay.
//!
//! The engine sees the site database only through [`Database`]: raw
//! statement execution plus the two catalog lookups a dump needs.

pub mod dump;
pub mod restore;
pub mod sqlite;

pub use dump::DatabaseDumper;
pub use restore::{DatabaseRestorer, RestoreSummary};
pub use sqlite::SqliteDatabase;

use crate::Result;

/// A single column value as returned by [`Database::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

pub type Row = Vec<SqlValue>;

pub trait Database: Send + Sync {
    /// Run a row-returning statement
    fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Run a row-returning statement, handing each row to `visit` as it is
    /// read. Returns the number of rows visited; an error from `visit`
    /// stops the scan.
    fn query_each(&self, sql: &str, visit: &mut dyn FnMut(&[SqlValue]) -> Result<()>) -> Result<usize> {
        let rows = self.query(sql)?;
        for row in &rows {
            visit(row)?;
        }
        Ok(rows.len())
    }

    /// Run a single statement, returning the affected row count
    fn execute(&self, sql: &str) -> Result<usize>;

    /// Tables whose names start with `prefix`, in the storage engine's listing order
    fn tables(&self, prefix: &str) -> Result<Vec<String>>;

    /// Verbatim `CREATE TABLE` statement for `table`, without trailing `;`
    fn create_table_sql(&self, table: &str) -> Result<String>;

    /// Statement toggling foreign key enforcement, including the trailing `;`
    fn foreign_key_checks(&self, enabled: bool) -> String {
        format!("SET FOREIGN_KEY_CHECKS={};", if enabled { 1 } else { 0 })
    }
}

/// Backtick-quoted identifier
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// SQL literal for a value. Every non-null scalar is quoted.
pub fn quote_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(i) => format!("'{}'", i),
        SqlValue::Real(f) => format!("'{}'", f),
        SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        SqlValue::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for b in bytes {
                hex.push_str(&format!("{:02X}", b));
            }
            hex.push('\'');
            hex
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_value() {
        assert_eq!(quote_value(&SqlValue::Null), "NULL");
        assert_eq!(quote_value(&SqlValue::Integer(-4)), "'-4'");
        assert_eq!(quote_value(&SqlValue::Text("it's".into())), "'it''s'");
        assert_eq!(quote_value(&SqlValue::Blob(vec![0x00, 0xAB])), "X'00AB'");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("wp_posts"), "`wp_posts`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }
}
