//! Converter step execution: inline or fanned out to worker processes.
//!
//! Either way the coordinator owns the only connection to the Intermediate
//! Store. Items are grouped into batches, each batch is transformed into
//! per-item writes (in-process or by a worker), and those are applied one
//! batch at a time in the order they complete.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::pool::{Batch, BatchResult, WorkerCommand, WorkerProcess};
use super::{
    create_step, process_batch, ConverterSettings, ConverterStep, ItemError, RunStats, StepEnv,
};
use crate::database::{IntermediateStore, ItemWrites, OfflineConnection};
use crate::error::{Error, Result};
use crate::progress::ProgressListener;
use crate::value::Row;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Tuning knobs for a converter run.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Worker processes; 0 runs every batch in-process.
    pub workers: usize,
    /// Items per batch.
    pub batch_size: usize,
    /// Worker program; defaults to re-executing the current binary.
    pub worker_command: Option<WorkerCommand>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            batch_size: DEFAULT_BATCH_SIZE,
            worker_command: None,
        }
    }
}

pub struct ConverterRunner<'a> {
    store: &'a mut IntermediateStore,
    settings: ConverterSettings,
    options: RunnerOptions,
}

impl<'a> ConverterRunner<'a> {
    pub fn new(
        store: &'a mut IntermediateStore,
        settings: ConverterSettings,
        options: RunnerOptions,
    ) -> Self {
        Self {
            store,
            settings,
            options,
        }
    }

    /// Run one registered step to completion.
    ///
    /// Returns the step's aggregated statistics. Item failures are recorded
    /// there; only fatal errors are returned as `Err`.
    pub async fn run_step(
        &mut self,
        name: &str,
        progress: &mut dyn ProgressListener,
    ) -> Result<RunStats> {
        let mut step = create_step(name)?;
        let env = StepEnv::open(&self.settings)?;
        step.execute(&env).map_err(|e| Error::StepSetup {
            step: name.to_string(),
            message: format!("{:#}", e),
        })?;

        let max_progress = step.max_progress(&env)?;
        info!(
            "Converting '{}' ({} items, {} workers)",
            name,
            max_progress.map_or("unknown".to_string(), |n| n.to_string()),
            self.options.workers
        );
        progress.start(name, max_progress);

        let totals = if self.options.workers == 0 {
            self.run_inline(step.as_ref(), &env, progress)?
        } else {
            self.run_parallel(step, env, progress).await?
        };

        info!(
            "Converted '{}': {} processed, {} errors",
            name, totals.processed_count, totals.error_count
        );
        progress.finish(name, &totals);
        Ok(totals)
    }

    /// Process every item in this process, one batch at a time.
    pub fn run_inline(
        &mut self,
        step: &dyn ConverterStep,
        env: &StepEnv,
        progress: &mut dyn ProgressListener,
    ) -> Result<RunStats> {
        let batch_size = self.options.batch_size.max(1);
        let mut totals = RunStats::default();
        let mut offline = OfflineConnection::new();
        let mut pending: Vec<Row> = Vec::with_capacity(batch_size);
        let store = &mut *self.store;

        let mut flush = |items: &[Row], totals: &mut RunStats| -> Result<()> {
            let stats = process_batch(step, env, items, &mut offline);
            let writes = offline.take();
            apply_result(store, writes, stats, totals)?;
            progress.advance(totals);
            Ok(())
        };

        step.items(env, &mut |row| {
            pending.push(row);
            if pending.len() >= batch_size {
                flush(&pending, &mut totals)?;
                pending.clear();
            }
            Ok(())
        })?;
        if !pending.is_empty() {
            flush(&pending, &mut totals)?;
        }

        Ok(totals)
    }

    /// Fan batches out to worker processes and apply their writes here.
    async fn run_parallel(
        &mut self,
        step: Box<dyn ConverterStep>,
        env: StepEnv,
        progress: &mut dyn ProgressListener,
    ) -> Result<RunStats> {
        let workers = self.options.workers;
        let batch_size = self.options.batch_size.max(1);
        let command = match &self.options.worker_command {
            Some(command) => command.clone(),
            None => WorkerCommand::current_exe()?,
        };
        let step_name = step.name();

        // Bounded: the producer waits while every worker is busy.
        let (batch_tx, batch_rx) = mpsc::channel::<Batch>(workers);
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<Result<BatchResult>>(workers);

        let producer = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut pending: Vec<Row> = Vec::with_capacity(batch_size);
            let mut next_id = 0u64;
            let mut dispatch = |items: Vec<Row>| -> Result<()> {
                next_id += 1;
                batch_tx
                    .blocking_send(Batch { id: next_id, items })
                    .map_err(|_| Error::Worker("no worker is accepting batches".to_string()))
            };

            step.items(&env, &mut |row| {
                pending.push(row);
                if pending.len() >= batch_size {
                    dispatch(std::mem::replace(
                        &mut pending,
                        Vec::with_capacity(batch_size),
                    ))?;
                }
                Ok(())
            })?;
            if !pending.is_empty() {
                dispatch(pending)?;
            }
            Ok(next_id)
        });

        let mut tasks = JoinSet::new();
        for index in 0..workers {
            tasks.spawn(worker_loop(
                index,
                command.clone(),
                step_name,
                self.settings.clone(),
                Arc::clone(&batch_rx),
                result_tx.clone(),
            ));
        }
        drop(result_tx);
        drop(batch_rx);

        let mut totals = RunStats::default();
        while let Some(result) = result_rx.recv().await {
            // A fatal error drops `tasks`, which aborts the workers.
            let result = result?;
            debug!("Applying batch {} ({} items)", result.id, result.writes.len());
            apply_result(&mut *self.store, result.writes, result.stats, &mut totals)?;
            progress.advance(&totals);
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| Error::Worker(format!("worker task failed: {}", e)))?;
        }
        let batches = producer
            .await
            .map_err(|e| Error::Worker(format!("item producer failed: {}", e)))??;
        debug!("Step '{}' dispatched {} batches", step_name, batches);

        Ok(totals)
    }
}

/// Pull batches until the queue closes, restarting the process after a crash.
async fn worker_loop(
    index: usize,
    command: WorkerCommand,
    step: &'static str,
    settings: ConverterSettings,
    batches: Arc<Mutex<mpsc::Receiver<Batch>>>,
    results: mpsc::Sender<Result<BatchResult>>,
) {
    let mut process: Option<WorkerProcess> = None;

    loop {
        let next = batches.lock().await.recv().await;
        let Some(batch) = next else { break };

        if process.is_none() {
            match WorkerProcess::spawn(index, &command, step, &settings).await {
                Ok(worker) => process = Some(worker),
                Err(e) => {
                    let _ = results.send(Err(e)).await;
                    return;
                }
            }
        }
        let Some(worker) = process.as_mut() else {
            break;
        };

        let outcome = worker.run_batch(&batch).await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let message = format!("worker {} lost batch {}: {}", index, batch.id, e);
                warn!("{}", message);
                if let Some(dead) = process.take() {
                    dead.kill().await;
                }
                BatchResult {
                    id: batch.id,
                    writes: Vec::new(),
                    stats: RunStats::failed_batch(&batch.items, &message),
                }
            }
        };

        if results.send(Ok(result)).await.is_err() {
            break;
        }
    }

    if let Some(worker) = process {
        worker.shutdown().await;
    }
}

/// Apply one batch of item writes and fold its statistics into `totals`.
fn apply_result(
    store: &mut IntermediateStore,
    writes: Vec<ItemWrites>,
    mut stats: RunStats,
    totals: &mut RunStats,
) -> Result<()> {
    let outcome = store.apply(&writes)?;
    for rejected in outcome.rejected {
        stats.record_error(ItemError::new(
            "staging write rejected",
            Some(rejected.message),
            Some(rejected.item),
        ));
    }
    totals.merge(stats);
    Ok(())
}
