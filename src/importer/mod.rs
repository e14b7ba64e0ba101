//! Importer steps: load staging records into the destination database.
//!
//! Each step reads rows from the importer database (mappings, staging
//! records and upload artifacts), maps every foreign key through the ID
//! Mapping Table, and bulk-inserts the result. Steps that other steps refer
//! to record a mapping entry for every row they insert.

mod context;
mod destination;
mod graph;
mod mapping;
mod runner;
pub mod steps;

pub use context::{ImportDb, FILES_SCHEMA, SOURCE_SCHEMA};
pub use destination::{Destination, InsertOutcome, SqliteDestination};
pub use graph::{select_steps, sort_steps, topological_order};
pub use mapping::{MappingTable, MappingType};
pub use runner::{ImportRunner, ImporterOptions};

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::value::{Row, SqlValue};

/// Static facts about an importer step.
#[derive(Debug, Clone, Copy)]
pub struct StepDescriptor {
    pub name: &'static str,
    /// Destination table rows are inserted into.
    pub table: &'static str,
    /// Destination columns, in the order `transform_row` returns values.
    pub column_names: &'static [&'static str],
    /// Steps that must finish before this one starts.
    pub depends_on: &'static [&'static str],
    /// Record a mapping entry of this type for every inserted row.
    pub store_mapped_ids: Option<MappingType>,
}

/// A named set pre-loaded from the destination before a step runs.
#[derive(Debug, Clone, Copy)]
pub struct SetRequirement {
    pub name: &'static str,
    /// Query whose first column forms the set.
    pub query: &'static str,
}

/// One row ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    /// Identity to map to the new destination id, for mapped steps.
    pub original_id: Option<String>,
    pub values: Vec<SqlValue>,
    /// Set entries claimed for this row; released if its insert fails.
    pub claims: Vec<(&'static str, String)>,
}

impl ImportRecord {
    pub fn new(original_id: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            original_id: Some(original_id.into()),
            values,
            claims: Vec::new(),
        }
    }

    pub fn with_claim(mut self, set: &'static str, value: impl Into<String>) -> Self {
        self.claims.push((set, value.into()));
        self
    }
}

/// Lookups available to [`ImporterStep::transform_row`].
pub struct TransformContext<'a> {
    db: &'a ImportDb,
    sets: &'a mut HashMap<&'static str, HashSet<String>>,
}

impl<'a> TransformContext<'a> {
    pub fn new(db: &'a ImportDb, sets: &'a mut HashMap<&'static str, HashSet<String>>) -> Self {
        Self { db, sets }
    }

    /// Whether `value` is in the named set.
    pub fn contains(&self, set: &str, value: &str) -> bool {
        self.sets.get(set).is_some_and(|s| s.contains(value))
    }

    /// Add `value` to the named set. Returns false if it was already present.
    pub fn claim(&mut self, set: &'static str, value: &str) -> bool {
        self.sets.entry(set).or_default().insert(value.to_string())
    }

    /// Undo a claim whose row never reached the destination.
    pub fn release(&mut self, set: &str, value: &str) {
        if let Some(entries) = self.sets.get_mut(set) {
            entries.remove(value);
        }
    }

    /// Destination id of an entity imported by an earlier step.
    pub fn destination_id(&self, mapping_type: MappingType, original_id: &str) -> Result<Option<i64>> {
        self.db.destination_id(mapping_type, original_id)
    }
}

/// A load unit.
pub trait ImporterStep: Send {
    fn descriptor(&self) -> StepDescriptor;

    /// Count query bounding the rows `rows_query` yields.
    fn total_rows_query(&self) -> String;

    /// Rows still to import; rows mapped by an earlier run are excluded.
    fn rows_query(&self) -> String;

    fn required_sets(&self) -> Vec<SetRequirement> {
        Vec::new()
    }

    /// Map one row to destination values, or `None` to skip it.
    fn transform_row(
        &mut self,
        row: &Row,
        ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>>;
}

/// Importer steps in registry order.
pub const IMPORTER_STEPS: &[&str] = &["users", "uploads", "tag_groups", "tags", "site_settings"];

pub fn create_step(name: &str) -> Result<Box<dyn ImporterStep>> {
    let step: Box<dyn ImporterStep> = match name {
        "users" => Box::new(steps::UsersStep),
        "uploads" => Box::new(steps::UploadsStep),
        "tag_groups" => Box::new(steps::TagGroupsStep),
        "tags" => Box::new(steps::TagsStep),
        "site_settings" => Box::new(steps::SiteSettingsStep),
        other => return Err(Error::UnknownStep(other.to_string())),
    };
    Ok(step)
}

/// Exclude rows already mapped for `mapping_type`; `key` is the SQL
/// expression holding the row's original id.
pub(crate) fn unmapped_join(key: &str, mapping_type: MappingType) -> String {
    format!(
        "LEFT JOIN main.mapped_ids mapped ON mapped.original_id = {} AND mapped.type = {}",
        key,
        mapping_type.id()
    )
}
