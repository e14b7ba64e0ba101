//! Wire protocol between the coordinator and worker processes.
//!
//! One JSON document per line. The coordinator writes requests to the
//! worker's stdin and reads responses from its stdout.

use std::io::Write;

use serde::{Deserialize, Serialize};

use super::{ConverterSettings, RunStats};
use crate::database::ItemWrites;
use crate::value::Row;

/// A request as received by a worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Build the named step and its environment. Sent once per process.
    Init {
        step: String,
        settings: ConverterSettings,
    },
    /// Process a batch of items.
    Batch { id: u64, items: Vec<Row> },
    /// Exit after answering nothing further.
    Shutdown,
}

/// A request as sent by the coordinator; borrows its payload.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingRequest<'a> {
    Init {
        step: &'a str,
        settings: &'a ConverterSettings,
    },
    Batch {
        id: u64,
        items: &'a [Row],
    },
    Shutdown,
}

/// A worker's answer to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    Ready,
    BatchDone {
        id: u64,
        writes: Vec<ItemWrites>,
        stats: RunStats,
    },
    Failed {
        message: String,
    },
}

/// Serialize `message` as one line and flush it.
pub fn write_line<W: Write, T: Serialize>(out: &mut W, message: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, message)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Encode `message` as a newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}
