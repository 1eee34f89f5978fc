// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External command hook, attached either before or after the job.

use async_trait::async_trait;
use mirsync_core::{JobContext, MirrorStatus};
use tokio_util::sync::CancellationToken;

use crate::runner::CommandSpec;

use super::{HookError, JobHook};

/// Where in the job a [`CmdExecHook`] fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecAt {
    PreSync,
    PostSync,
}

#[derive(Debug)]
pub struct CmdExecHook {
    argv: Vec<String>,
    exec_at: ExecAt,
}

impl CmdExecHook {
    /// Split `command` by POSIX token rules at construction so a bad
    /// command line is a config-time error, not a per-run one.
    pub fn new(command: &str, exec_at: ExecAt) -> Result<Self, HookError> {
        let argv = shell_words::split(command)?;
        if argv.is_empty() {
            return Err(HookError::Runner(crate::runner::RunnerError::EmptyCommand));
        }
        Ok(CmdExecHook { argv, exec_at })
    }

    async fn run_command(
        &self,
        ctx: &JobContext,
        status: Option<MirrorStatus>,
    ) -> Result<(), HookError> {
        let mut spec = CommandSpec::new(self.argv.clone());
        spec.env = vec![
            ("TUNASYNC_MIRROR_NAME".to_string(), ctx.mirror_name.clone()),
            ("TUNASYNC_WORKING_DIR".to_string(), ctx.current_dir.to_string_lossy().into_owned()),
            (
                "TUNASYNC_JOB_EXIT_STATUS".to_string(),
                status.map(|s| s.to_string()).unwrap_or_default(),
            ),
        ];

        let code = spec.spawn()?.wait(&CancellationToken::new()).await?;
        if code != 0 {
            return Err(HookError::CommandFailed(code));
        }
        Ok(())
    }
}

#[async_trait]
impl JobHook for CmdExecHook {
    fn name(&self) -> &'static str {
        match self.exec_at {
            ExecAt::PreSync => "exec-pre-sync",
            ExecAt::PostSync => "exec-post-sync",
        }
    }

    async fn before_job(&self, ctx: &mut JobContext) -> Result<(), HookError> {
        if self.exec_at == ExecAt::PreSync {
            self.run_command(ctx, None).await?;
        }
        Ok(())
    }

    async fn after_job(&self, status: MirrorStatus, ctx: &mut JobContext) -> Result<(), HookError> {
        if self.exec_at == ExecAt::PostSync {
            self.run_command(ctx, Some(status)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "cmd_exec_tests.rs"]
mod tests;
