//! Converter steps: extract rows from the source and transform them into
//! staging records.
//!
//! A step declares a cheap progress bound, a streaming item query and a
//! per-item transform. Steps are resolved by name from a fixed registry so
//! that worker processes can rebuild the same step from its name alone.

mod batch;
pub mod pool;
pub mod protocol;
pub mod runner;
mod stats;
pub mod steps;
pub mod worker;

pub use batch::process_batch;
pub use runner::{ConverterRunner, RunnerOptions};
pub use stats::{ItemError, RunStats};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::database::{StagingRecord, StoreWriter};
use crate::error::{Error, Result};
use crate::source::{AttachmentFetcher, DirectoryAttachments, SourceDb};
use crate::value::Row;

/// Everything a worker needs to rebuild a step's environment.
///
/// Sent to every worker process on startup, so it must stay serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterSettings {
    /// Source database exported from the platform being migrated.
    pub source_db: PathBuf,
    /// Root directory of source attachments, if the source has any.
    pub attachments_dir: Option<PathBuf>,
}

/// Per-process resources a step runs against.
pub struct StepEnv {
    source: SourceDb,
    attachments: Option<Box<dyn AttachmentFetcher>>,
}

impl StepEnv {
    pub fn new(source: SourceDb, attachments: Option<Box<dyn AttachmentFetcher>>) -> Self {
        Self {
            source,
            attachments,
        }
    }

    /// Open the source database and attachment store described by `settings`.
    pub fn open(settings: &ConverterSettings) -> Result<Self> {
        let source = SourceDb::open(&settings.source_db)?;
        let attachments = settings
            .attachments_dir
            .as_ref()
            .map(|dir| Box::new(DirectoryAttachments::new(dir)) as Box<dyn AttachmentFetcher>);
        Ok(Self::new(source, attachments))
    }

    pub fn source(&self) -> &SourceDb {
        &self.source
    }

    pub fn fetch_attachment(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        match &self.attachments {
            Some(fetcher) => fetcher.fetch(key),
            None => anyhow::bail!("no attachments directory configured (needed for '{}')", key),
        }
    }
}

/// Handle passed to [`ConverterStep::process_item`].
pub struct ItemContext<'a> {
    env: &'a StepEnv,
    writer: &'a mut dyn StoreWriter,
}

impl<'a> ItemContext<'a> {
    pub fn new(env: &'a StepEnv, writer: &'a mut dyn StoreWriter) -> Self {
        Self { env, writer }
    }

    pub fn env(&self) -> &StepEnv {
        self.env
    }

    /// Write a staging record.
    pub fn insert<R: StagingRecord>(&mut self, record: &R) -> anyhow::Result<()> {
        self.writer.execute(record.to_statement())?;
        Ok(())
    }

    pub fn fetch_attachment(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.env.fetch_attachment(key)
    }
}

/// An extract + transform unit.
pub trait ConverterStep: Send {
    /// Registry name of the step.
    fn name(&self) -> &'static str;

    /// Build step-scoped lookup indexes. Runs once per process before any
    /// item is enumerated or processed.
    fn execute(&mut self, _env: &StepEnv) -> anyhow::Result<()> {
        Ok(())
    }

    /// Expected number of items, if the source can count them cheaply.
    fn max_progress(&self, env: &StepEnv) -> Result<Option<u64>>;

    /// Stream every item to `emit`.
    fn items(&self, env: &StepEnv, emit: &mut dyn FnMut(Row) -> Result<()>) -> Result<()>;

    /// Transform one item into zero or more staging records.
    fn process_item(&self, item: &Row, ctx: &mut ItemContext<'_>) -> anyhow::Result<()>;
}

/// Converter steps in their default run order.
pub const CONVERTER_STEPS: &[&str] = &["users", "uploads", "site_settings", "tag_groups", "tags"];

/// Instantiate a registered converter step.
pub fn create_step(name: &str) -> Result<Box<dyn ConverterStep>> {
    let step: Box<dyn ConverterStep> = match name {
        "users" => Box::new(steps::UsersStep),
        "uploads" => Box::new(steps::UploadsStep),
        "site_settings" => Box::new(steps::SiteSettingsStep::default()),
        "tag_groups" => Box::new(steps::TagGroupsStep),
        "tags" => Box::new(steps::TagsStep),
        other => return Err(Error::UnknownStep(other.to_string())),
    };
    Ok(step)
}
