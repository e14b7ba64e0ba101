//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod convert;
mod import;
mod steps;
mod store;
mod uploads;
mod worker;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::database::SchemaKind;

#[derive(Parser)]
#[command(name = "dmig")]
#[command(about = "Migrate forum data into Discourse through an intermediate store")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "DMIG_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the intermediate, mappings and uploads stores
    #[arg(long, global = true, env = "DMIG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create a store if needed and apply pending schema scripts
    Migrate {
        /// Store file to migrate
        store: PathBuf,
        /// Apply the *.sql files of this directory instead of an embedded schema
        #[arg(long)]
        migrations_dir: Option<PathBuf>,
        /// Embedded schema to apply
        #[arg(long, value_enum, default_value_t = SchemaKind::Intermediate)]
        schema: SchemaKind,
    },

    /// Delete a store and its journal files
    Reset {
        /// Store file to delete
        store: PathBuf,
    },

    /// Run converter steps from the source into the intermediate store
    Convert {
        /// Steps to run (default: all, in registry order)
        steps: Vec<String>,
        /// Worker processes (0 = run in this process)
        #[arg(short, long, env = "DMIG_WORKERS")]
        workers: Option<usize>,
        /// Items per batch
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Source database
        #[arg(long, env = "DMIG_SOURCE_DB")]
        source: Option<PathBuf>,
        /// Source attachments directory
        #[arg(long, env = "DMIG_ATTACHMENTS_DIR")]
        attachments: Option<PathBuf>,
        /// Start from an empty intermediate store
        #[arg(long)]
        reset: bool,
    },

    /// Write staged upload payloads to the uploads directory
    MaterializeUploads,

    /// Run importer steps from the intermediate store into the destination
    Import {
        /// Steps to run; dependencies are added automatically (default: all)
        steps: Vec<String>,
        /// Destination database
        #[arg(short, long, env = "DMIG_DESTINATION_DB")]
        destination: Option<PathBuf>,
        /// Rows per destination batch
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// List converter and importer steps
    Steps,

    /// Worker process entry point (spawned by `convert`)
    #[command(hide = true)]
    Worker,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Workers only talk the wire protocol; they get everything else from `init`.
    if matches!(cli.command, Commands::Worker) {
        return worker::cmd_worker();
    }

    let options = LoadOptions {
        config_path: cli.config,
        data_dir: cli.data_dir,
    };
    let (mut settings, _config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Migrate {
            store,
            migrations_dir,
            schema,
        } => store::cmd_migrate(&settings, &store, migrations_dir, schema).await,
        Commands::Reset { store } => store::cmd_reset(&store).await,
        Commands::Convert {
            steps,
            workers,
            batch_size,
            source,
            attachments,
            reset,
        } => {
            if let Some(workers) = workers {
                settings.workers = workers;
            }
            if let Some(batch_size) = batch_size {
                settings.converter_batch_size = batch_size;
            }
            if source.is_some() {
                settings.source_db = source;
            }
            if attachments.is_some() {
                settings.attachments_dir = attachments;
            }
            convert::cmd_convert(&settings, &steps, reset).await
        }
        Commands::MaterializeUploads => uploads::cmd_materialize_uploads(&settings).await,
        Commands::Import {
            steps,
            destination,
            batch_size,
        } => {
            if destination.is_some() {
                settings.destination_db = destination;
            }
            if let Some(batch_size) = batch_size {
                settings.importer_batch_size = batch_size;
            }
            import::cmd_import(&settings, &steps).await
        }
        Commands::Steps => steps::cmd_steps().await,
        Commands::Worker => worker::cmd_worker(),
    }
}
