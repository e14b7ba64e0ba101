//! Importer command.

use console::style;

use crate::config::Settings;
use crate::importer::{select_steps, ImportDb, ImportRunner, MappingTable, SqliteDestination};
use crate::progress::ConsoleProgress;

/// Import the named steps and their dependencies into the destination.
pub async fn cmd_import(settings: &Settings, names: &[String]) -> anyhow::Result<()> {
    let Some(destination_path) = settings.destination_db.as_ref() else {
        anyhow::bail!(
            "No destination database configured. Pass --destination or set destination_db in the config file."
        );
    };

    // Resolve and sort before touching any store, so a bad graph changes nothing.
    let steps = select_steps(names)?;

    let uploads = settings
        .uploads_db
        .exists()
        .then_some(settings.uploads_db.as_path());
    if uploads.is_none() {
        println!(
            "{} No upload artifacts at {}; uploads will use derived URLs",
            style("!").yellow(),
            settings.uploads_db.display()
        );
    }

    let db = ImportDb::open(
        &settings.mappings_db,
        &settings.intermediate_db,
        uploads,
        settings.busy_timeout,
    )?;
    let mut mappings = MappingTable::open(&settings.mappings_db, settings.busy_timeout)?;
    let mut destination = SqliteDestination::open(destination_path, settings.busy_timeout)?;

    println!(
        "{} Importing {} into {}",
        style("→").cyan(),
        settings.intermediate_db.display(),
        destination_path.display()
    );

    let mut progress = ConsoleProgress::new();
    let results = {
        let mut runner = ImportRunner::new(
            &db,
            &mut mappings,
            &mut destination,
            settings.importer_options(),
        );
        runner.run(steps, &mut progress)?
    };

    let errors: u64 = results.iter().map(|(_, stats)| stats.error_count).sum();
    let imported: u64 = results
        .iter()
        .map(|(_, stats)| {
            stats
                .processed_count
                .saturating_sub(stats.skipped_count + stats.error_count)
        })
        .sum();
    println!(
        "{} Imported {} row(s) in {} step(s), {} error(s)",
        if errors > 0 {
            style("!").yellow()
        } else {
            style("✓").green()
        },
        imported,
        results.len(),
        errors
    );
    Ok(())
}
