//! Importer execution loop.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::{
    sort_steps, Destination, ImportDb, ImportRecord, ImporterStep, InsertOutcome, MappingTable,
    StepDescriptor, TransformContext,
};
use crate::converters::{ItemError, RunStats};
use crate::error::Result;
use crate::progress::ProgressListener;
use crate::value::Row;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ImporterOptions {
    /// Rows per destination insert batch.
    pub batch_size: usize,
}

impl Default for ImporterOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

pub struct ImportRunner<'a> {
    db: &'a ImportDb,
    mappings: &'a mut MappingTable,
    destination: &'a mut dyn Destination,
    options: ImporterOptions,
}

impl<'a> ImportRunner<'a> {
    pub fn new(
        db: &'a ImportDb,
        mappings: &'a mut MappingTable,
        destination: &'a mut dyn Destination,
        options: ImporterOptions,
    ) -> Self {
        Self {
            db,
            mappings,
            destination,
            options,
        }
    }

    /// Sort `steps` by dependency and run them in that order.
    ///
    /// The sort happens before anything runs, so a cycle imports nothing.
    pub fn run(
        &mut self,
        steps: Vec<Box<dyn ImporterStep>>,
        progress: &mut dyn ProgressListener,
    ) -> Result<Vec<(&'static str, RunStats)>> {
        let steps = sort_steps(steps)?;
        let order: Vec<&str> = steps.iter().map(|s| s.descriptor().name).collect();
        info!("Import order: {}", order.join(" → "));

        let mut results = Vec::with_capacity(steps.len());
        for mut step in steps {
            let stats = self.run_step(step.as_mut(), progress)?;
            results.push((step.descriptor().name, stats));
        }
        Ok(results)
    }

    /// Import every remaining row of one step.
    pub fn run_step(
        &mut self,
        step: &mut dyn ImporterStep,
        progress: &mut dyn ProgressListener,
    ) -> Result<RunStats> {
        let descriptor = step.descriptor();
        let batch_size = self.options.batch_size.max(1);

        let mut sets: HashMap<&'static str, HashSet<String>> = HashMap::new();
        for requirement in step.required_sets() {
            let set = self.destination.load_set(requirement.query)?;
            debug!(
                "{}: {} existing entries loaded into '{}'",
                descriptor.name,
                set.len(),
                requirement.name
            );
            sets.insert(requirement.name, set);
        }

        let total = self.db.count(&step.total_rows_query())?;
        info!("Importing '{}' ({} rows)", descriptor.name, total);
        progress.start(descriptor.name, Some(total));

        let mut stats = RunStats::default();
        let mut batch: Vec<(Row, ImportRecord)> = Vec::with_capacity(batch_size);
        let mut ctx = TransformContext::new(self.db, &mut sets);
        let destination = &mut *self.destination;
        let mappings = &mut *self.mappings;

        self.db.each_row(&step.rows_query(), &mut |row| {
            stats.processed_count += 1;
            match step.transform_row(&row, &mut ctx) {
                Ok(Some(record)) => {
                    if record.values.len() == descriptor.column_names.len() {
                        batch.push((row, record));
                    } else {
                        release_claims(&mut ctx, &record);
                        stats.record_error(ItemError::new(
                            format!(
                                "{} values for {} columns",
                                record.values.len(),
                                descriptor.column_names.len()
                            ),
                            None,
                            Some(row),
                        ));
                    }
                }
                Ok(None) => stats.skipped_count += 1,
                Err(e) => stats.record_error(ItemError::from_anyhow(&e, Some(row))),
            }

            if batch.len() >= batch_size {
                flush(&descriptor, &mut batch, destination, mappings, &mut ctx, &mut stats)?;
                progress.advance(&stats);
            }
            Ok(())
        })?;

        if !batch.is_empty() {
            flush(&descriptor, &mut batch, destination, mappings, &mut ctx, &mut stats)?;
        }
        progress.advance(&stats);

        info!(
            "Imported '{}': {} processed, {} skipped, {} errors",
            descriptor.name, stats.processed_count, stats.skipped_count, stats.error_count
        );
        progress.finish(descriptor.name, &stats);
        Ok(stats)
    }
}

/// Insert a batch, then record mapping entries for the rows that made it.
///
/// Mappings are committed before the next batch is built, so a later step
/// never sees an imported row without its mapping. A row the destination
/// refuses gives back the set entries it claimed.
fn flush(
    descriptor: &StepDescriptor,
    batch: &mut Vec<(Row, ImportRecord)>,
    destination: &mut dyn Destination,
    mappings: &mut MappingTable,
    ctx: &mut TransformContext<'_>,
    stats: &mut RunStats,
) -> Result<()> {
    let (sources, mut records): (Vec<Row>, Vec<ImportRecord>) = batch.drain(..).unzip();
    let rows: Vec<_> = records
        .iter_mut()
        .map(|record| std::mem::take(&mut record.values))
        .collect();

    let outcomes = destination.insert_rows(descriptor.table, descriptor.column_names, &rows)?;

    let mut entries = Vec::new();
    for ((source, record), outcome) in sources.into_iter().zip(records).zip(outcomes) {
        match outcome {
            InsertOutcome::Inserted(destination_id) => {
                if let Some(original_id) = record.original_id {
                    entries.push((original_id, destination_id));
                }
            }
            InsertOutcome::Failed(message) => {
                release_claims(ctx, &record);
                stats.record_error(ItemError::new(
                    format!(
                        "insert into {} failed for {}",
                        descriptor.table,
                        record.original_id.as_deref().unwrap_or("row")
                    ),
                    Some(message),
                    Some(source),
                ));
            }
        }
    }

    if let Some(mapping_type) = descriptor.store_mapped_ids {
        let added = mappings.insert(mapping_type, &entries)?;
        debug!("{}: {} mapping entries written", descriptor.name, added);
    }
    Ok(())
}

fn release_claims(ctx: &mut TransformContext<'_>, record: &ImportRecord) {
    for (set, value) in &record.claims {
        ctx.release(set, value);
    }
}
