//! Worker process side of the parallel job runner.
//!
//! A worker is a long-lived process that builds one converter step, then
//! answers batch requests until told to shut down. It never opens the
//! Intermediate Store; every write the step makes is captured by an
//! [`OfflineConnection`] and returned to the coordinator.

use std::io::{BufRead, Write};

use tracing::{debug, info, warn};

use super::protocol::{write_line, WorkerRequest, WorkerResponse};
use super::{create_step, process_batch, ConverterSettings, ConverterStep, StepEnv};
use crate::database::OfflineConnection;
use crate::error::Result;

struct WorkerState {
    step: Box<dyn ConverterStep>,
    env: StepEnv,
    offline: OfflineConnection,
}

impl WorkerState {
    fn init(step_name: &str, settings: &ConverterSettings) -> anyhow::Result<Self> {
        let mut step = create_step(step_name)?;
        let env = StepEnv::open(settings)?;
        step.execute(&env)?;
        Ok(Self {
            step,
            env,
            offline: OfflineConnection::new(),
        })
    }
}

/// Serve requests from `input` until shutdown or end of input.
///
/// A line that does not decode is answered with `Failed` so the
/// coordinator can fail that batch; the worker keeps serving.
pub fn serve<R: BufRead, W: Write>(input: R, mut output: W) -> Result<()> {
    let mut state: Option<WorkerState> = None;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Undecodable request: {}", e);
                write_line(
                    &mut output,
                    &WorkerResponse::Failed {
                        message: format!("undecodable request: {}", e),
                    },
                )?;
                continue;
            }
        };

        let response = match request {
            WorkerRequest::Init { step, settings } => {
                match WorkerState::init(&step, &settings) {
                    Ok(ready) => {
                        info!("Worker {} ready for step '{}'", std::process::id(), step);
                        state = Some(ready);
                        WorkerResponse::Ready
                    }
                    Err(e) => WorkerResponse::Failed {
                        message: format!("{:#}", e),
                    },
                }
            }
            WorkerRequest::Batch { id, items } => match state.as_mut() {
                Some(worker) => {
                    let stats =
                        process_batch(worker.step.as_ref(), &worker.env, &items, &mut worker.offline);
                    debug!(
                        "Batch {}: {} items, {} errors",
                        id, stats.processed_count, stats.error_count
                    );
                    WorkerResponse::BatchDone {
                        id,
                        writes: worker.offline.take(),
                        stats,
                    }
                }
                None => WorkerResponse::Failed {
                    message: "batch received before init".to_string(),
                },
            },
            WorkerRequest::Shutdown => break,
        };

        write_line(&mut output, &response)?;
    }

    Ok(())
}
