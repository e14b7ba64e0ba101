//! Converter command.

use console::style;

use crate::config::Settings;
use crate::converters::{ConverterRunner, RunStats, CONVERTER_STEPS};
use crate::database::{self, IntermediateStore};
use crate::error::Error;
use crate::progress::ConsoleProgress;

/// Run the named converter steps (all of them when `names` is empty).
pub async fn cmd_convert(settings: &Settings, names: &[String], reset: bool) -> anyhow::Result<()> {
    let Some(converter_settings) = settings.converter_settings() else {
        anyhow::bail!("No source database configured. Pass --source or set source_db in the config file.");
    };

    let steps: Vec<String> = if names.is_empty() {
        CONVERTER_STEPS.iter().map(|s| s.to_string()).collect()
    } else {
        names.to_vec()
    };
    if let Some(unknown) = steps.iter().find(|s| !CONVERTER_STEPS.contains(&s.as_str())) {
        return Err(Error::UnknownStep(unknown.clone()).into());
    }

    if reset {
        for path in database::reset(&settings.intermediate_db)? {
            println!("  {} Removed {}", style("✓").green(), path.display());
        }
    }

    println!(
        "{} Converting {} into {}",
        style("→").cyan(),
        converter_settings.source_db.display(),
        settings.intermediate_db.display()
    );
    let (mut store, report) = IntermediateStore::open(&settings.intermediate_db, settings.busy_timeout)?;
    if !report.applied.is_empty() {
        println!(
            "  Applied {} schema script(s)",
            style(report.applied.len()).cyan()
        );
    }

    let mut runner = ConverterRunner::new(&mut store, converter_settings, settings.runner_options());
    let mut progress = ConsoleProgress::new();
    let mut overall = RunStats::default();
    for name in &steps {
        let stats = runner.run_step(name, &mut progress).await?;
        overall.merge(stats);
    }

    println!(
        "{} Converted {} item(s) in {} step(s), {} error(s)",
        if overall.error_count > 0 {
            style("!").yellow()
        } else {
            style("✓").green()
        },
        overall.processed_count,
        steps.len(),
        overall.error_count
    );
    Ok(())
}
