// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control server: accepts one connection at a time on the Unix
//! socket, forwards each decoded request onto the event bus, and
//! writes the supervisor's reply back.
//!
//! The control plane is not a throughput path; handling connections
//! sequentially keeps replies trivially matched to requests.

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::bus::{Event, EventTx};
use crate::protocol::{self, ProtocolError, DEFAULT_TIMEOUT};

/// Reply for any frame that could not be read or decoded.
const INVALID_COMMAND: &str = "Invalid Command";

pub struct ControlServer {
    listener: UnixListener,
    events: EventTx,
}

impl ControlServer {
    pub fn new(listener: UnixListener, events: EventTx) -> Self {
        ControlServer { listener, events }
    }

    /// Accept loop; runs until the task is dropped.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = ?addr.as_pathname(), "control server listening");
        }
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    if let Err(e) = self.handle_connection(stream).await {
                        match e {
                            ProtocolError::ConnectionClosed => debug!("client disconnected"),
                            e => debug!("control connection error: {}", e),
                        }
                    }
                }
                Err(e) => error!("control accept error: {}", e),
            }
        }
    }

    async fn handle_connection(&self, mut stream: UnixStream) -> Result<(), ProtocolError> {
        let (mut reader, mut writer) = stream.split();

        let reply = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
            Ok(request) => {
                debug!(cmd = %request.cmd, target = %request.target, "control request");
                self.dispatch(request).await
            }
            Err(ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => {
                debug!("malformed control request: {}", e);
                INVALID_COMMAND.to_string()
            }
        };

        protocol::write_reply(&mut writer, &reply, DEFAULT_TIMEOUT).await
    }

    /// Forward the request to the supervisor and wait for its reply on
    /// a channel dedicated to this request.
    async fn dispatch(&self, request: protocol::Request) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        let event = Event::Command {
            op: request.cmd,
            target: request.target,
            kwargs: request.kwargs,
            reply: reply_tx,
        };
        if self.events.send(event).await.is_err() {
            return "supervisor unavailable".to_string();
        }
        reply_rx.await.unwrap_or_else(|_| "supervisor unavailable".to_string())
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
