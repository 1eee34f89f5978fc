// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre/post hooks attached to a mirror's sync pipeline.
//!
//! Hooks come in ordered chains. `before_job`/`before_exec` run in
//! chain order, `after_exec`/`after_job` in reverse chain order; the
//! worker's recursive descent guarantees that. Hooks only implement
//! the callbacks they care about.

mod btrfs;
mod cmd_exec;
mod loglimit;

pub use btrfs::BtrfsHook;
pub use cmd_exec::{CmdExecHook, ExecAt};
pub use loglimit::LogLimitHook;

use std::path::PathBuf;

use async_trait::async_trait;
use mirsync_core::{JobContext, MirrorStatus};
use thiserror::Error;

/// Hook errors
#[derive(Debug, Error)]
pub enum HookError {
    #[error("not a snapshot subvolume: {0}")]
    InvalidSubvolume(PathBuf),

    #[error("command exited with status {0}")]
    CommandFailed(i32),

    #[error("invalid hook command: {0}")]
    BadCommand(#[from] shell_words::ParseError),

    #[error(transparent)]
    Runner(#[from] crate::runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A pre/post capability attached to a provider.
///
/// Default implementations are no-ops so concrete hooks only override
/// the pairs they need. `after_*` receive the status computed by the
/// stages they wrap; returning an error from an `after_*` is logged by
/// the worker but never changes that status.
#[async_trait]
pub trait JobHook: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    async fn before_job(&self, _ctx: &mut JobContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn before_exec(&self, _ctx: &mut JobContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn after_exec(
        &self,
        _status: MirrorStatus,
        _ctx: &mut JobContext,
    ) -> Result<(), HookError> {
        Ok(())
    }

    async fn after_job(
        &self,
        _status: MirrorStatus,
        _ctx: &mut JobContext,
    ) -> Result<(), HookError> {
        Ok(())
    }
}
