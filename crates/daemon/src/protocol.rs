// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format for the control socket.
//!
//! Frame: 2-byte length prefix (big-endian) + UTF-8 payload. Requests
//! are JSON `{cmd, target, kwargs?}`; replies are plain strings in the
//! same framing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,
}

/// Maximum frame body (16-bit length prefix).
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Default I/O timeout for one control exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Request from the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub cmd: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl Request {
    pub fn new(cmd: impl Into<String>, target: impl Into<String>) -> Self {
        Request { cmd: cmd.into(), target: target.into(), kwargs: serde_json::Map::new() }
    }
}

/// Encode a request to JSON bytes (without length prefix)
pub fn encode(request: &Request) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(request)?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: json.len(), max: MAX_FRAME_SIZE });
    }
    Ok(json)
}

/// Decode a request from a frame body
pub fn decode(bytes: &[u8]) -> Result<Request, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read a length-prefixed frame from an async reader
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed frame to an async writer
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: data.len(), max: MAX_FRAME_SIZE });
    }
    writer.write_all(&(data.len() as u16).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode a request with timeout
pub async fn read_request<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_frame(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&bytes)
}

/// Write a reply string with timeout
pub async fn write_reply<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    reply: &str,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    tokio::time::timeout(timeout, write_frame(writer, reply.as_bytes()))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

/// Read a reply string with timeout (client side)
pub async fn read_reply<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<String, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_frame(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "protocol_property_tests.rs"]
mod property_tests;
