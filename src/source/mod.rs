//! Source System adapter.
//!
//! The pipeline only needs two capabilities from the platform being
//! migrated: streaming row queries and fetching attachment bytes by key.
//! Both are provided here for a source exported to a SQLite database with
//! attachments laid out in a directory.

mod attachments;

pub use attachments::{AttachmentFetcher, DirectoryAttachments};

use std::path::{Path, PathBuf};

use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::debug;

use crate::error::Result;
use crate::value::{column_names, Row, SqlValue};

/// Read-only handle on the source database.
pub struct SourceDb {
    conn: Connection,
    path: PathBuf,
}

impl SourceDb {
    /// Open the source database without write access.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!("Opened source database {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a single-value count query.
    pub fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Whether the source has a table with the given name.
    pub fn has_table(&self, table: &str) -> Result<bool> {
        let found: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// Stream the rows of a query to `visit` one at a time.
    ///
    /// Stops at the first error returned by `visit`.
    pub fn each_row(
        &self,
        sql: &str,
        params: &[SqlValue],
        visit: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare(sql)?;
        let names = column_names(&stmt);
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            visit(Row::from_sqlite(row, &names)?)?;
        }
        Ok(())
    }

    /// Collect all rows of a query.
    pub fn rows(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        self.each_row(sql, params, &mut |row| {
            out.push(row);
            Ok(())
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture(dir: &Path) -> PathBuf {
        let path = dir.join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER, username TEXT);
             INSERT INTO users VALUES (1, 'alice'), (2, 'bob'), (3, 'carol');",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_count_and_stream() {
        let dir = tempdir().unwrap();
        let source = SourceDb::open(&fixture(dir.path())).unwrap();

        assert_eq!(source.count("SELECT COUNT(*) FROM users").unwrap(), 3);
        assert!(source.has_table("users").unwrap());
        assert!(!source.has_table("posts").unwrap());

        let mut names = Vec::new();
        source
            .each_row(
                "SELECT username FROM users WHERE id > ?1 ORDER BY id",
                &[SqlValue::Integer(1)],
                &mut |row| {
                    names.push(row.text("username").unwrap_or_default());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(names, vec!["bob", "carol"]);
    }

    #[test]
    fn test_source_is_read_only() {
        let dir = tempdir().unwrap();
        let source = SourceDb::open(&fixture(dir.path())).unwrap();
        let err = source
            .each_row("DELETE FROM users RETURNING id", &[], &mut |_| Ok(()))
            .unwrap_err();
        assert!(err.to_string().contains("readonly") || err.to_string().contains("read-only"));
    }
}
