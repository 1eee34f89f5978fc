// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-socket client.

use std::path::PathBuf;

use anyhow::{Context, Result};
use mirsync_daemon::protocol::{self, Request, DEFAULT_TIMEOUT};
use tokio::net::UnixStream;

pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        ControlClient { socket_path: socket_path.into() }
    }

    /// Send one command and return the daemon's reply string.
    pub async fn send(&self, request: &Request) -> Result<String> {
        let mut stream = UnixStream::connect(&self.socket_path).await.with_context(|| {
            format!(
                "failed to connect to {} (is mirsyncd running?)",
                self.socket_path.display()
            )
        })?;
        let (mut reader, mut writer) = stream.split();

        let body = protocol::encode(request)?;
        protocol::write_frame(&mut writer, &body).await?;
        let reply = protocol::read_reply(&mut reader, DEFAULT_TIMEOUT).await?;
        Ok(reply)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
