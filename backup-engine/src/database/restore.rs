//! Best-effort replay of a logical dump.

use super::Database;

/// Outcome of a replay. Failures are collected, never raised.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub statements: usize,
    pub errors: Vec<String>,
}

impl RestoreSummary {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct DatabaseRestorer<'a> {
    db: &'a dyn Database,
}

impl<'a> DatabaseRestorer<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Self { db }
    }

    /// Execute every statement of `script` independently. A failing
    /// statement is recorded and the replay carries on.
    pub fn restore(&self, script: &str) -> RestoreSummary {
        let mut summary = RestoreSummary::default();

        for (index, statement) in split_statements(script).iter().enumerate() {
            summary.statements += 1;
            if let Err(e) = self.db.execute(statement) {
                let preview: String = statement.chars().take(120).collect();
                tracing::warn!(statement = index + 1, error = %e, "Statement failed during restore");
                summary
                    .errors
                    .push(format!("Statement {} failed: {} [{}]", index + 1, e, preview));
            }
        }

        tracing::info!(
            statements = summary.statements,
            failed = summary.errors.len(),
            "Database replay finished"
        );
        summary
    }
}

/// Split a script into statements at `;` + end of line.
///
/// Blank lines and `--` comment lines between statements are dropped. A
/// line ending in `;` inside an open string literal does not end the
/// statement. Line endings inside a statement are kept byte for byte, so
/// `\r\n` in a multi-line literal survives the replay.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for line in script.split_inclusive('\n') {
        let trimmed = line.trim();

        if !in_quote && current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        let is_comment = !in_quote && trimmed.starts_with("--");
        if !is_comment {
            // '' inside a literal flips twice, leaving the state unchanged
            for c in line.chars() {
                if c == '\'' {
                    in_quote = !in_quote;
                }
            }
        }

        current.push_str(line);

        if !in_quote && !is_comment && trimmed.ends_with(';') {
            let statement = current.trim().trim_end_matches(';').trim_end().to_string();
            if !statement.is_empty() {
                statements.push(statement);
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        statements.push(rest.to_string());
    }

    statements
}
