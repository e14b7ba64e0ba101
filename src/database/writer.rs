//! Write paths into the Intermediate Store.
//!
//! Converter code never holds the live store connection. It writes through
//! a [`StoreWriter`], which in practice is an [`OfflineConnection`] that
//! buffers parametrized statements. The coordinator owns the only real
//! connection ([`IntermediateStore`]) and applies buffered batches to it.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::migrator::{self, MigrationReport, MigrationSource};
use super::schema::SchemaKind;
use crate::error::{is_constraint_error, Error, Result};
use crate::value::{Row, Statement};

/// Something that accepts writes destined for the Intermediate Store.
pub trait StoreWriter {
    fn execute(&mut self, statement: Statement) -> Result<()>;
}

/// The writes one converted item produced, applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemWrites {
    pub item: Row,
    pub statements: Vec<Statement>,
}

/// In-memory stand-in for a store connection.
///
/// Accumulates every write as a [`Statement`] instead of executing it, and
/// remembers which item each run of statements belongs to.
#[derive(Debug, Default)]
pub struct OfflineConnection {
    statements: Vec<Statement>,
    items: Vec<(Row, Range<usize>)>,
    item_start: usize,
}

impl OfflineConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.statements.clear();
        self.items.clear();
        self.item_start = 0;
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Drop everything buffered after the first `len` statements.
    pub fn truncate(&mut self, len: usize) {
        self.statements.truncate(len);
        self.items.retain(|(_, range)| range.end <= len);
        self.item_start = self.item_start.min(len);
    }

    /// Close the current item: every statement since the previous item
    /// belongs to `item`.
    pub fn finish_item(&mut self, item: &Row) {
        let end = self.statements.len();
        if end > self.item_start {
            self.items.push((item.clone(), self.item_start..end));
        }
        self.item_start = end;
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Hand out the buffered writes grouped by item, leaving the buffer empty.
    ///
    /// Statements not closed by [`finish_item`](Self::finish_item) are dropped.
    pub fn take(&mut self) -> Vec<ItemWrites> {
        let mut statements = std::mem::take(&mut self.statements);
        let items = std::mem::take(&mut self.items);
        self.item_start = 0;
        statements.truncate(items.last().map_or(0, |(_, range)| range.end));

        let mut grouped = Vec::with_capacity(items.len());
        for (item, range) in items.into_iter().rev() {
            grouped.push(ItemWrites {
                item,
                statements: statements.split_off(range.start),
            });
        }
        grouped.reverse();
        grouped
    }
}

impl StoreWriter for OfflineConnection {
    fn execute(&mut self, statement: Statement) -> Result<()> {
        self.statements.push(statement);
        Ok(())
    }
}

/// An item the store refused because one of its writes violated a constraint.
#[derive(Debug, Clone)]
pub struct RejectedItem {
    pub item: Row,
    pub message: String,
}

/// Result of applying one batch of item writes.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Items whose writes were all applied.
    pub applied: usize,
    pub rejected: Vec<RejectedItem>,
}

/// The single writable connection to the Intermediate Store.
pub struct IntermediateStore {
    conn: Connection,
    path: PathBuf,
}

impl IntermediateStore {
    /// Open the store at `path`, migrating it to the embedded intermediate schema.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<(Self, MigrationReport)> {
        let source = MigrationSource::Embedded(SchemaKind::Intermediate);
        let (conn, report) = migrator::migrate(path, &source, busy_timeout)?;
        Ok((
            Self {
                conn,
                path: path.to_path_buf(),
            },
            report,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Apply a batch of item writes in one transaction.
    ///
    /// Each item runs inside its own savepoint. A constraint violation rolls
    /// back that item's writes only; any other failure, including lock
    /// timeouts, aborts the batch.
    pub fn apply(&mut self, items: &[ItemWrites]) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        if items.is_empty() {
            return Ok(outcome);
        }

        let path = self.path.clone();
        let mut tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::from_write(e, &path))?;

        for writes in items {
            let savepoint = tx.savepoint().map_err(|e| Error::from_write(e, &path))?;
            match execute_all(&savepoint, &writes.statements) {
                Ok(()) => {
                    savepoint.commit().map_err(|e| Error::from_write(e, &path))?;
                    outcome.applied += 1;
                }
                Err(e) if is_constraint_error(&e) => {
                    warn!("Rejected staging write: {}", e);
                    // Dropping the savepoint rolls the item back.
                    drop(savepoint);
                    outcome.rejected.push(RejectedItem {
                        item: writes.item.clone(),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(Error::from_write(e, &path)),
            }
        }

        tx.commit().map_err(|e| Error::from_write(e, &path))?;
        Ok(outcome)
    }

    /// Row count of a staging table.
    pub fn count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

fn execute_all(conn: &Connection, statements: &[Statement]) -> rusqlite::Result<()> {
    for statement in statements {
        let mut prepared = conn.prepare_cached(&statement.sql)?;
        prepared.execute(params_from_iter(statement.params.iter()))?;
    }
    Ok(())
}
