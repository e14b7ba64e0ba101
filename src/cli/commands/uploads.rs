//! Upload materialization command.

use console::style;

use crate::config::Settings;
use crate::progress::ConsoleProgress;
use crate::uploads::UploadMaterializer;

/// Write every staged upload payload to the uploads directory.
pub async fn cmd_materialize_uploads(settings: &Settings) -> anyhow::Result<()> {
    println!(
        "{} Materializing uploads into {}",
        style("→").cyan(),
        settings.uploads_dir.display()
    );

    let mut materializer = UploadMaterializer::open(
        &settings.uploads_db,
        &settings.intermediate_db,
        settings.materialize_options(),
        settings.busy_timeout,
    )?;
    materializer.run(&mut ConsoleProgress::new())?;
    Ok(())
}
