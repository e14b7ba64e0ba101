//! The read side of an import: one connection that sees the mapping table,
//! the Intermediate Store and the upload artifacts together.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use super::mapping::{lookup, MappingType};
use crate::database::{migrate, MigrationSource, SchemaKind};
use crate::error::{Error, Result};
use crate::value::{column_names, Row};

/// Schema alias of the Intermediate Store in importer queries.
pub const SOURCE_SCHEMA: &str = "src";
/// Schema alias of the upload artifact store in importer queries.
pub const FILES_SCHEMA: &str = "files";

const EMPTY_FILES_SQL: &str = "CREATE TABLE files.uploads
(
    id          TEXT PRIMARY KEY NOT NULL,
    url         TEXT,
    sha256      TEXT,
    filesize    INTEGER,
    skip_reason TEXT
)";

/// Importer database connection.
///
/// `main` is the mappings store, `src` the Intermediate Store and `files`
/// the upload artifact store (empty and in-memory when none is given).
pub struct ImportDb {
    conn: Connection,
}

impl ImportDb {
    pub fn open(
        mappings: &Path,
        intermediate: &Path,
        uploads: Option<&Path>,
        busy_timeout: Duration,
    ) -> Result<Self> {
        if !intermediate.exists() {
            return Err(Error::Config(format!(
                "intermediate store {} does not exist; run the converters first",
                intermediate.display()
            )));
        }

        let (conn, _) = migrate(
            mappings,
            &MigrationSource::Embedded(SchemaKind::Mappings),
            busy_timeout,
        )?;
        attach(&conn, intermediate, SOURCE_SCHEMA)?;

        match uploads {
            Some(path) => {
                // Make sure the artifact schema exists even before materializing.
                migrate(
                    path,
                    &MigrationSource::Embedded(SchemaKind::Uploads),
                    busy_timeout,
                )?;
                attach(&conn, path, FILES_SCHEMA)?;
            }
            None => {
                conn.execute("ATTACH DATABASE ':memory:' AS files", [])?;
                conn.execute_batch(EMPTY_FILES_SQL)?;
            }
        }

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Destination id previously recorded for a source entity.
    pub fn destination_id(&self, mapping_type: MappingType, original_id: &str) -> Result<Option<i64>> {
        lookup(&self.conn, "main.mapped_ids", mapping_type, original_id)
    }

    /// Run a single-value count query.
    pub fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Stream the rows of `sql` to `visit`.
    pub fn each_row(&self, sql: &str, visit: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        let mut stmt = self.conn.prepare(sql)?;
        let names = column_names(&stmt);
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            visit(Row::from_sqlite(row, &names)?)?;
        }
        Ok(())
    }
}

fn attach(conn: &Connection, path: &Path, alias: &str) -> Result<()> {
    let location = path
        .to_str()
        .ok_or_else(|| Error::Config(format!("non UTF-8 path: {}", path.display())))?;
    conn.execute(&format!("ATTACH DATABASE ?1 AS {}", alias), [location])?;
    debug!("Attached {} as {}", path.display(), alias);
    Ok(())
}
