//! ID Mapping Table: `(original_id, type) -> destination_id`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::database::open_store;
use crate::error::{Error, Result};

/// Destination entity kind a mapping entry refers to.
///
/// The discriminants are stored in `mapped_ids.type` and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    Users = 1,
    Uploads = 2,
    TagGroups = 3,
    Tags = 4,
    SiteSettings = 5,
}

impl MappingType {
    pub const ALL: [MappingType; 5] = [
        MappingType::Users,
        MappingType::Uploads,
        MappingType::TagGroups,
        MappingType::Tags,
        MappingType::SiteSettings,
    ];

    pub fn id(self) -> i64 {
        self as i64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MappingType::Users => "users",
            MappingType::Uploads => "uploads",
            MappingType::TagGroups => "tag_groups",
            MappingType::Tags => "tags",
            MappingType::SiteSettings => "site_settings",
        }
    }
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write handle on the mapping table.
///
/// Kept on its own connection so entries can be committed while a step's
/// row query is still streaming from the importer database.
pub struct MappingTable {
    conn: Connection,
    path: PathBuf,
}

impl MappingTable {
    /// Open the mappings store. Its schema must already be migrated.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = open_store(path, busy_timeout)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Record `(original_id, destination_id)` pairs for one entity kind.
    ///
    /// Existing entries are kept. Returns the number of new entries.
    pub fn insert(&mut self, mapping_type: MappingType, entries: &[(String, i64)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let path = self.path.clone();
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::from_write(e, &path))?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO mapped_ids (original_id, type, destination_id) VALUES (?1, ?2, ?3)",
            )?;
            for (original_id, destination_id) in entries {
                inserted += stmt
                    .execute(params![original_id, mapping_type.id(), destination_id])
                    .map_err(|e| Error::from_write(e, &path))?;
            }
        }
        tx.commit().map_err(|e| Error::from_write(e, &path))?;
        Ok(inserted)
    }

    pub fn get(&self, mapping_type: MappingType, original_id: &str) -> Result<Option<i64>> {
        lookup(&self.conn, "mapped_ids", mapping_type, original_id)
    }

    pub fn count(&self, mapping_type: MappingType) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM mapped_ids WHERE type = ?1",
            [mapping_type.id()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

/// Point lookup against a mapping table reachable as `table` on `conn`.
pub(crate) fn lookup(
    conn: &Connection,
    table: &str,
    mapping_type: MappingType,
    original_id: &str,
) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT destination_id FROM {} WHERE original_id = ?1 AND type = ?2",
        table
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt
        .query_row(params![original_id, mapping_type.id()], |row| row.get(0))
        .optional()?)
}
