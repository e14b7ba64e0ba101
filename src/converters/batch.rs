//! Batch processing shared by worker processes and the inline runner.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::debug;

use super::{ConverterStep, ItemContext, ItemError, RunStats, StepEnv};
use crate::database::OfflineConnection;
use crate::value::Row;

/// Run `process_item` over a batch, buffering writes in `offline`.
///
/// The buffer is cleared first. Writes of a successful item are closed off
/// under that item. A failing item (error or panic) is recorded and its
/// partial writes are discarded; the rest of the batch still runs.
pub fn process_batch(
    step: &dyn ConverterStep,
    env: &StepEnv,
    items: &[Row],
    offline: &mut OfflineConnection,
) -> RunStats {
    offline.clear();
    let mut stats = RunStats::default();

    for item in items {
        stats.processed_count += 1;
        let mark = offline.len();

        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = ItemContext::new(env, &mut *offline);
            step.process_item(item, &mut ctx)
        }));

        let error = match result {
            Ok(Ok(())) => {
                offline.finish_item(item);
                continue;
            }
            Ok(Err(e)) => ItemError::from_anyhow(&e, Some(item.clone())),
            Err(panic) => ItemError::new(
                "item processing panicked",
                Some(panic_message(panic.as_ref())),
                Some(item.clone()),
            ),
        };

        debug!("{}: {}", step.name(), error.message);
        offline.truncate(mark);
        stats.record_error(error);
    }

    stats
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
