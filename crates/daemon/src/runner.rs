// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process execution for providers, hooks and the snapshot GC.
//!
//! Every child runs in its own process group so that a termination
//! signal reaches the whole pipeline the child may have spawned (rsync
//! forks, shell pipelines), not just the immediate child.

use std::path::PathBuf;
use std::process::Stdio;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Process execution errors
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the child's merged stdout/stderr goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Write to a file. `truncate` controls whether an existing file is
    /// replaced or appended to (two-stage runs share one log).
    File { path: PathBuf, truncate: bool },
    Null,
    Inherit,
}

/// A command to run: argv, extra environment, optional working
/// directory and an output sink. stderr is always merged into stdout.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub stdout: OutputSink,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>) -> Self {
        CommandSpec { argv, env: Vec::new(), cwd: None, stdout: OutputSink::Null }
    }

    /// Spawn the child in a fresh process group.
    pub fn spawn(&self) -> Result<RunningProcess, RunnerError> {
        let (program, args) = self.argv.split_first().ok_or(RunnerError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        match &self.stdout {
            OutputSink::File { path, truncate } => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(*truncate)
                    .append(!*truncate)
                    .open(path)
                    .map_err(|source| RunnerError::LogFile { path: path.clone(), source })?;
                let stderr = file
                    .try_clone()
                    .map_err(|source| RunnerError::LogFile { path: path.clone(), source })?;
                cmd.stdout(Stdio::from(file));
                cmd.stderr(Stdio::from(stderr));
            }
            OutputSink::Null => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
            OutputSink::Inherit => {
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
            }
        }

        cmd.stdin(Stdio::null());
        cmd.process_group(0);
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|source| RunnerError::Spawn { command: program.clone(), source })?;
        debug!(command = %program, pid = ?child.id(), "spawned child");

        Ok(RunningProcess { child, program: program.clone() })
    }
}

/// Handle on a spawned child.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    program: String,
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit, returning its exit code (-1 when
    /// killed by a signal). On cancellation the child's process group
    /// is sent SIGTERM and then reaped.
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<i32, RunnerError> {
        tokio::select! {
            status = self.child.wait() => Ok(exit_code(status?)),
            _ = cancel.cancelled() => {
                self.terminate();
                let status = self.child.wait().await?;
                Ok(exit_code(status))
            }
        }
    }

    /// Send SIGTERM to the child's process group.
    pub fn terminate(&self) {
        if let Some(pid) = self.child.id() {
            debug!(command = %self.program, pid, "terminating process group");
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(command = %self.program, pid, "failed to signal process group: {}", e);
            }
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
