// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message types for the supervisor event bus and worker control
//! channels.

use mirsync_core::{JobContext, MirrorStatus};
use tokio::sync::{mpsc, oneshot};

/// Messages arriving at the supervisor's event loop.
#[derive(Debug)]
pub enum Event {
    /// Status change from a worker; `ctx` is a snapshot of the run's
    /// context at emission time.
    Update { mirror: String, status: MirrorStatus, ctx: JobContext },

    /// A worker has drained and exited. Carries the worker id so the
    /// supervisor can tell a drained worker from one it already
    /// replaced or stopped.
    ConfigAck { mirror: String, worker_id: u64 },

    /// Operator request forwarded by the control server. The reply
    /// string is sent back on `reply`, a channel dedicated to this
    /// request.
    Command {
        op: String,
        target: String,
        kwargs: serde_json::Map<String, serde_json::Value>,
        reply: oneshot::Sender<String>,
    },
}

/// Control messages sent to one worker's inbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    /// Finish the current run (if any), ack, and exit.
    Terminate,
}

pub type EventTx = mpsc::Sender<Event>;
pub type EventRx = mpsc::Receiver<Event>;

const BUS_CAPACITY: usize = 64;

pub fn channel() -> (EventTx, EventRx) {
    mpsc::channel(BUS_CAPACITY)
}
