//! Hidden worker entry point.

use crate::converters::worker;

/// Serve converter batches over stdin/stdout until told to stop.
pub fn cmd_worker() -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    worker::serve(stdin.lock(), stdout.lock())?;
    Ok(())
}
