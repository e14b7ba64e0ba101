//! Embedded SQLite stores used by the pipeline.
//!
//! The Intermediate Store, the mappings store and the upload artifact store
//! are all plain SQLite files tuned for a single bulk writer. This module
//! opens them, brings their schema up to date and provides the write paths
//! converters use (either the real store or an offline buffer).

pub mod migrator;
pub mod records;
pub mod schema;
pub mod writer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Error, Result};

pub use migrator::{migrate, migrate_connection, MigrationReport, MigrationSource};
pub use records::StagingRecord;
pub use schema::SchemaKind;
pub use writer::{IntermediateStore, ItemWrites, OfflineConnection, StoreWriter};

/// Default time to wait for a competing writer before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// Side files SQLite may create next to a database file.
const SIDE_FILE_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// Open (or create) a store tuned for single-writer bulk inserts.
pub fn open_store(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    // Switching to WAL needs the write lock.
    configure(&conn, busy_timeout).map_err(|e| match e {
        Error::Sqlite(e) => Error::from_write(e, path),
        other => other,
    })?;
    debug!("Opened store {}", path.display());
    Ok(conn)
}

/// Apply the bulk-load pragmas to a connection.
pub fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // auto_vacuum only takes effect before the first table is created
    conn.pragma_update(None, "auto_vacuum", "FULL")?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        debug!("journal_mode is {} (in-memory or unsupported)", mode);
    }
    conn.pragma_update(None, "synchronous", "OFF")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

/// Delete a store file and its journal/shared-memory side files.
///
/// Returns the files that were actually removed.
pub fn reset(path: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for candidate in store_files(path) {
        match std::fs::remove_file(&candidate) {
            Ok(()) => removed.push(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

/// The store file followed by every side file it may have.
pub fn store_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    for suffix in SIDE_FILE_SUFFIXES {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}
