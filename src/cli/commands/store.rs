//! Store management commands.

use std::path::{Path, PathBuf};

use console::style;

use crate::config::Settings;
use crate::database::{self, MigrationSource, SchemaKind};

/// Run pending schema scripts against a store.
pub async fn cmd_migrate(
    settings: &Settings,
    store: &Path,
    migrations_dir: Option<PathBuf>,
    schema: SchemaKind,
) -> anyhow::Result<()> {
    let source = match migrations_dir {
        Some(dir) => {
            println!(
                "{} Migrating {} from {}",
                style("→").cyan(),
                store.display(),
                dir.display()
            );
            MigrationSource::Directory(dir)
        }
        None => {
            println!(
                "{} Migrating {} ({} schema)",
                style("→").cyan(),
                store.display(),
                schema
            );
            MigrationSource::Embedded(schema)
        }
    };

    let (_conn, report) = database::migrate(store, &source, settings.busy_timeout)?;

    if report.applied.is_empty() {
        println!("{} Schema is already up to date.", style("✓").green());
        return Ok(());
    }
    for path in &report.applied {
        println!("  {} {}", style("✓").green(), path);
    }
    println!(
        "{} Applied {} script(s), {} already applied",
        style("✓").green(),
        report.applied.len(),
        report.already_applied
    );
    Ok(())
}

/// Delete a store and its side files.
pub async fn cmd_reset(store: &Path) -> anyhow::Result<()> {
    let removed = database::reset(store)?;
    if removed.is_empty() {
        println!(
            "{} Nothing to remove at {}",
            style("!").yellow(),
            store.display()
        );
        return Ok(());
    }
    for path in &removed {
        println!("  {} Removed {}", style("✓").green(), path.display());
    }
    Ok(())
}
