//! Destination database interface.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::error::{is_lock_error, Error, Result};
use crate::value::{column_names, SqlValue};

/// Result of inserting one row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The row was inserted under this destination id.
    Inserted(i64),
    /// The destination refused the row.
    Failed(String),
}

/// What the importer needs from the destination database.
pub trait Destination {
    /// Bulk-insert `rows` (values in `columns` order) into `table`.
    ///
    /// Returns one outcome per row, in order. A refused row does not stop
    /// the batch; losing the connection or the write lock is an `Err`.
    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<Vec<InsertOutcome>>;

    /// Load the first column of `query` as a set of text keys.
    fn load_set(&self, query: &str) -> Result<HashSet<String>>;
}

/// A SQLite destination database.
pub struct SqliteDestination {
    conn: Connection,
    path: PathBuf,
}

impl SqliteDestination {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "destination database {} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        debug!("Opened destination {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        vec!["?"; columns.len()].join(", ")
    )
}

impl Destination for SqliteDestination {
    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<Vec<InsertOutcome>> {
        let path = self.path.clone();
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::from_write(e, &path))?;
        let mut outcomes = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare_cached(&insert_sql(table, columns))?;
            for values in rows {
                match stmt.execute(params_from_iter(values.iter())) {
                    Ok(_) => outcomes.push(InsertOutcome::Inserted(tx.last_insert_rowid())),
                    Err(e) if is_lock_error(&e) => return Err(Error::StoreLocked(path)),
                    Err(e) => outcomes.push(InsertOutcome::Failed(e.to_string())),
                }
            }
        }
        tx.commit().map_err(|e| Error::from_write(e, &path))?;
        Ok(outcomes)
    }

    fn load_set(&self, query: &str) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(query)?;
        if column_names(&stmt).is_empty() {
            return Err(Error::Config(format!("set query returns no columns: {}", query)));
        }
        let set = stmt
            .query_map([], |row| row.get::<_, SqlValue>(0))?
            .filter_map(|value| match value {
                Ok(value) => value.as_text().map(Ok),
                Err(e) => Some(Err(e)),
            })
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(set)
    }
}
