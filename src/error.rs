//! Error types for the migration pipeline.
//!
//! Everything in here is fatal for the run that produced it. Failures of a
//! single source row are not represented here; they are collected as
//! [`ItemError`](crate::converters::ItemError)s in the step's run statistics.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("migration {path} failed: {source}")]
    MigrationFailed {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("timed out waiting for the write lock on {}", .0.display())]
    StoreLocked(PathBuf),

    #[error("importer steps form a dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("unknown step: {0}")]
    UnknownStep(String),

    #[error("step '{step}' failed to prepare: {message}")]
    StepSetup { step: String, message: String },

    #[error("worker error: {0}")]
    Worker(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Map a SQLite error raised while writing to the store at `path`,
    /// turning lock contention into [`Error::StoreLocked`].
    pub fn from_write(err: rusqlite::Error, path: &std::path::Path) -> Self {
        if is_lock_error(&err) {
            Error::StoreLocked(path.to_path_buf())
        } else {
            Error::Sqlite(err)
        }
    }
}

/// Whether the error means another connection holds the database lock.
pub fn is_lock_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Whether the error is a constraint violation (unique, not null, ...).
pub fn is_constraint_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

/// Render an error's cause chain below its top-level message.
pub fn cause_chain(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(src) = source {
        causes.push(src.to_string());
        source = src.source();
    }
    if causes.is_empty() {
        None
    } else {
        Some(causes.join(": "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_chain_renders_sources() {
        let err = anyhow::anyhow!("disk full")
            .context("writing attachment")
            .context("processing upload 7");
        let chain = cause_chain(&*err);
        assert_eq!(chain.as_deref(), Some("writing attachment: disk full"));
    }

    #[test]
    fn test_cause_chain_none_without_source() {
        let err = std::io::Error::other("plain");
        assert!(cause_chain(&err).is_none());
    }

    #[test]
    fn test_lock_error_detection() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(is_lock_error(&busy));
        let path = std::path::Path::new("/tmp/intermediate.db");
        assert!(matches!(Error::from_write(busy, path), Error::StoreLocked(_)));
    }
}
