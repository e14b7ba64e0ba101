//! Upload materializer.
//!
//! Writes the binary payload of every staging upload to disk and records
//! where it went in the upload artifact store, which the uploads importer
//! joins against. Uploads that cannot be materialized keep a skip reason
//! and are never imported.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::converters::{ItemError, RunStats};
use crate::database::{migrate, MigrationSource, SchemaKind};
use crate::error::{Error, Result};
use crate::progress::ProgressListener;
use crate::value::SqlValue;

/// Default upper bound for a single upload.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// URL prefix of materialized uploads.
pub const URL_PREFIX: &str = "/uploads/original";

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub uploads_dir: PathBuf,
    pub max_size: u64,
}

/// Construct the storage path for upload content.
///
/// Two-level layout keyed by hash prefix: `{dir}/{hash[0..2]}/{hash}.{ext}`.
pub fn upload_storage_path(dir: &Path, sha256: &str, extension: &str) -> PathBuf {
    dir.join(&sha256[..2]).join(format!("{}.{}", sha256, extension))
}

/// File extension for upload content: sniffed from the bytes, else taken
/// from a filename with a known type, else `bin`.
pub fn upload_extension(data: &[u8], filename: &str) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.extension().to_string();
    }
    if mime_guess::from_path(filename).first().is_some() {
        if let Some(ext) = Path::new(filename).extension().and_then(|e| e.to_str()) {
            return ext.to_lowercase();
        }
    }
    "bin".to_string()
}

pub struct UploadMaterializer {
    conn: Connection,
    options: MaterializeOptions,
}

impl UploadMaterializer {
    /// Open (and migrate) the artifact store and attach the Intermediate Store.
    pub fn open(
        artifacts: &Path,
        intermediate: &Path,
        options: MaterializeOptions,
        busy_timeout: Duration,
    ) -> Result<Self> {
        if !intermediate.exists() {
            return Err(Error::Config(format!(
                "intermediate store {} does not exist",
                intermediate.display()
            )));
        }
        let (conn, _) = migrate(
            artifacts,
            &MigrationSource::Embedded(SchemaKind::Uploads),
            busy_timeout,
        )?;
        let location = intermediate
            .to_str()
            .ok_or_else(|| Error::Config(format!("non UTF-8 path: {}", intermediate.display())))?;
        conn.execute("ATTACH DATABASE ?1 AS src", [location])?;
        Ok(Self { conn, options })
    }

    /// Materialize every staging upload that has no artifact row yet.
    pub fn run(&mut self, progress: &mut dyn ProgressListener) -> Result<RunStats> {
        let pending: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT u.id FROM src.uploads u LEFT JOIN main.uploads f ON f.id = u.id \
                 WHERE f.id IS NULL ORDER BY u.id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };
        info!("{} uploads to materialize", pending.len());
        progress.start("materialize_uploads", Some(pending.len() as u64));

        let mut stats = RunStats::default();
        for id in pending {
            stats.processed_count += 1;
            match self.materialize(&id) {
                Ok(Some(reason)) => {
                    debug!("Upload {} skipped: {}", id, reason);
                    stats.skipped_count += 1;
                }
                Ok(None) => {}
                Err(e) => stats.record_error(ItemError::new(
                    format!("failed to materialize upload {}", id),
                    Some(format!("{:#}", e)),
                    None,
                )),
            }
            progress.advance(&stats);
        }

        progress.finish("materialize_uploads", &stats);
        Ok(stats)
    }

    /// Returns the skip reason, if the upload was not written.
    fn materialize(&mut self, id: &str) -> anyhow::Result<Option<String>> {
        let row = self
            .conn
            .query_row(
                "SELECT filename, sha256, data FROM src.uploads WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, SqlValue>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((filename, sha256, data)) = row else {
            anyhow::bail!("upload {} disappeared from the staging store", id);
        };

        let skip_reason = match data.as_blob() {
            None => Some("missing data".to_string()),
            Some(bytes) if bytes.len() as u64 > self.options.max_size => Some(format!(
                "{} bytes exceeds the {} byte limit",
                bytes.len(),
                self.options.max_size
            )),
            Some(_) if sha256.len() < 2 => anyhow::bail!("invalid sha256 '{}'", sha256),
            Some(_) => None,
        };

        if let Some(reason) = skip_reason {
            self.conn.execute(
                "INSERT INTO main.uploads (id, sha256, skip_reason) VALUES (?1, ?2, ?3)",
                params![id, sha256, reason],
            )?;
            return Ok(Some(reason));
        }

        let bytes = data.as_blob().unwrap_or_default();
        let extension = upload_extension(bytes, &filename);
        let path = upload_storage_path(&self.options.uploads_dir, &sha256, &extension);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, bytes)?;
        }

        let url = format!("{}/{}/{}.{}", URL_PREFIX, &sha256[..2], sha256, extension);
        self.conn.execute(
            "INSERT INTO main.uploads (id, url, sha256, filesize) VALUES (?1, ?2, ?3, ?4)",
            params![id, url, sha256, bytes.len() as i64],
        )?;
        Ok(None)
    }
}
