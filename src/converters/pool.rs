//! Coordinator side of a worker process.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::protocol::{encode_line, OutgoingRequest, WorkerResponse};
use super::{ConverterSettings, RunStats};
use crate::database::ItemWrites;
use crate::error::{Error, Result};
use crate::value::Row;

/// How to launch a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["worker".into()],
        }
    }

    /// Re-execute the running binary in worker mode.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

/// A batch of items dispatched to one worker.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: u64,
    pub items: Vec<Row>,
}

/// What a worker sent back for a batch.
#[derive(Debug)]
pub struct BatchResult {
    pub id: u64,
    pub writes: Vec<ItemWrites>,
    pub stats: RunStats,
}

/// A live worker process with an initialized step.
pub struct WorkerProcess {
    index: usize,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    /// Start a worker and wait until it has built `step`.
    ///
    /// A worker that cannot initialize is an error for the whole step.
    pub async fn spawn(
        index: usize,
        command: &WorkerCommand,
        step: &str,
        settings: &ConverterSettings,
    ) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Worker(format!(
                    "failed to start {}: {}",
                    command.program.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Worker("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Worker("worker stdout unavailable".to_string()))?;

        let mut worker = Self {
            index,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        worker.send(&OutgoingRequest::Init { step, settings }).await?;
        match worker.receive().await? {
            WorkerResponse::Ready => {
                debug!("Worker {} ready (pid {:?})", index, worker.child.id());
                Ok(worker)
            }
            WorkerResponse::Failed { message } => Err(Error::Worker(format!(
                "worker {} could not initialize step '{}': {}",
                index, step, message
            ))),
            other => Err(Error::Worker(format!(
                "worker {} sent {:?} instead of ready",
                index, other
            ))),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Hand a batch to the worker and wait for its writes.
    pub async fn run_batch(&mut self, batch: &Batch) -> Result<BatchResult> {
        self.send(&OutgoingRequest::Batch {
            id: batch.id,
            items: &batch.items,
        })
        .await?;

        match self.receive().await? {
            WorkerResponse::BatchDone { id, writes, stats } if id == batch.id => {
                Ok(BatchResult { id, writes, stats })
            }
            WorkerResponse::Failed { message } => Err(Error::Worker(message)),
            other => Err(Error::Worker(format!(
                "unexpected response to batch {}: {:?}",
                batch.id, other
            ))),
        }
    }

    /// Ask the worker to exit and reap it.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.send(&OutgoingRequest::Shutdown).await {
            debug!("Worker {} gone before shutdown: {}", self.index, e);
        }
        drop(self.stdin);
        match self.child.wait().await {
            Ok(status) if !status.success() => {
                warn!("Worker {} exited with {}", self.index, status)
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to reap worker {}: {}", self.index, e),
        }
    }

    /// Terminate a worker that can no longer be trusted.
    pub async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("Failed to kill worker {}: {}", self.index, e);
        }
    }

    async fn send(&mut self, request: &OutgoingRequest<'_>) -> Result<()> {
        let line = encode_line(request)?;
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<WorkerResponse> {
        match self.stdout.next_line().await? {
            Some(line) => Ok(serde_json::from_str(&line)?),
            None => Err(Error::Worker(format!(
                "worker {} exited unexpectedly",
                self.index
            ))),
        }
    }
}
