//! Schema migrator.
//!
//! Applies ordered SQL scripts to a store exactly once. Applied scripts are
//! tracked by path in `schema_migrations`; the tracking row is written in the
//! same transaction as the script so a crash can never record a script that
//! did not run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use super::schema::SchemaKind;
use crate::error::{Error, Result};

const TRACKING_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    path       TEXT PRIMARY KEY NOT NULL,
    applied_at TEXT             NOT NULL
)";

/// Where migration scripts come from.
#[derive(Debug, Clone)]
pub enum MigrationSource {
    /// Scripts compiled into the binary.
    Embedded(SchemaKind),
    /// Every `*.sql` file in a directory, identified by file name.
    ///
    /// Each script already runs inside its own transaction, so it must not
    /// contain `BEGIN`/`COMMIT`; such a script fails with
    /// [`Error::MigrationFailed`] and is not recorded.
    Directory(PathBuf),
}

impl From<SchemaKind> for MigrationSource {
    fn from(kind: SchemaKind) -> Self {
        MigrationSource::Embedded(kind)
    }
}

/// A migration script.
#[derive(Debug, Clone)]
pub struct Script {
    pub path: String,
    pub sql: String,
}

/// Outcome of a migrate call.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Scripts applied by this call, in application order.
    pub applied: Vec<String>,
    /// Scripts that were already recorded as applied.
    pub already_applied: usize,
}

impl MigrationSource {
    /// All known scripts in ascending lexical order of their path.
    pub fn scripts(&self) -> Result<Vec<Script>> {
        let mut scripts = match self {
            MigrationSource::Embedded(kind) => kind
                .scripts()
                .iter()
                .map(|(path, sql)| Script {
                    path: (*path).to_string(),
                    sql: (*sql).to_string(),
                })
                .collect::<Vec<_>>(),
            MigrationSource::Directory(dir) => read_directory(dir)?,
        };
        scripts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(scripts)
    }
}

fn read_directory(dir: &Path) -> Result<Vec<Script>> {
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        scripts.push(Script {
            path: name.to_string(),
            sql: std::fs::read_to_string(&path)?,
        });
    }
    Ok(scripts)
}

/// Open or create the store at `path` and bring it to the latest schema.
///
/// The returned connection is the one later used for normal writes.
pub fn migrate(
    path: &Path,
    source: &MigrationSource,
    busy_timeout: Duration,
) -> Result<(Connection, MigrationReport)> {
    let mut conn = super::open_store(path, busy_timeout)?;
    let report = migrate_connection(&mut conn, source).map_err(|e| match e {
        Error::Sqlite(err) => Error::from_write(err, path),
        other => other,
    })?;
    Ok((conn, report))
}

/// Apply pending scripts on an already open connection.
pub fn migrate_connection(
    conn: &mut Connection,
    source: &MigrationSource,
) -> Result<MigrationReport> {
    conn.execute_batch(TRACKING_TABLE_SQL)?;

    let applied = applied_paths(conn)?;
    let mut report = MigrationReport::default();

    for script in source.scripts()? {
        if applied.contains(&script.path) {
            report.already_applied += 1;
            continue;
        }

        info!("Applying migration: {}", script.path);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&script.sql)
            .map_err(|source| Error::MigrationFailed {
                path: script.path.clone(),
                source,
            })?;
        tx.execute(
            "INSERT INTO schema_migrations (path, applied_at) VALUES (?1, ?2)",
            (&script.path, Utc::now().to_rfc3339()),
        )?;
        tx.commit()?;

        report.applied.push(script.path);
    }

    if report.applied.is_empty() {
        info!("No pending migrations");
    } else {
        info!("Applied {} migration(s)", report.applied.len());
    }

    Ok(report)
}

/// Paths recorded in `schema_migrations`.
pub fn applied_paths(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT path FROM schema_migrations")?;
    let paths = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(paths)
}
