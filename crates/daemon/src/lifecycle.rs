// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and shutdown plumbing: pidfile lock, control socket
//! setup, cleanup.

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to acquire pidfile lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("control socket {0} is in use by another daemon")]
    SocketBusy(PathBuf),

    #[error("failed to bind control socket {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Take the exclusive pidfile lock and write our PID into it.
///
/// The returned file must be kept alive for the daemon's lifetime;
/// dropping it releases the lock.
pub fn acquire_pidfile(path: &Path) -> Result<File, LifecycleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Open without truncating so a lock failure doesn't wipe the
    // running daemon's PID.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    Ok(lock_file)
}

/// Bind the control socket, replacing a stale socket file.
///
/// A leftover path is only unlinked when nothing answers on it; a live
/// daemon on the other end is a hard error.
pub async fn bind_control_socket(path: &Path) -> Result<UnixListener, LifecycleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        match tokio::net::UnixStream::connect(path).await {
            Ok(_) => return Err(LifecycleError::SocketBusy(path.to_path_buf())),
            Err(_) => {
                info!(path = %path.display(), "removing stale control socket");
                std::fs::remove_file(path)?;
            }
        }
    }

    let listener = UnixListener::bind(path)
        .map_err(|e| LifecycleError::BindFailed(path.to_path_buf(), e))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(listener)
}

/// Remove the control socket and pidfile on the way out.
pub fn cleanup(socket_path: &Path, pidfile: &Path) {
    for path in [socket_path, pidfile] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), "cleanup failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
