// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transfer strategies: one provider performs a single sync pass for a
//! mirror, writing its output to the run's log file.

mod rsync;
mod shell;
mod two_stage;

pub use rsync::RsyncProvider;
pub use shell::ShellProvider;
pub use two_stage::TwoStageRsyncProvider;

use std::path::PathBuf;

use async_trait::async_trait;
use mirsync_config::{MirrorConfig, ProviderKind, Settings};
use mirsync_core::{format_log_date, substitute, Clock, JobContext};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::hooks::{
    BtrfsHook, CmdExecHook, ExecAt, HookError, JobHook, LogLimitHook,
};
use crate::runner::RunnerError;

/// Provider execution errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors building providers or hook chains from config.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("mirror {mirror}: unknown stage 1 profile `{profile}`")]
    UnknownProfile { mirror: String, profile: String },

    #[error("mirror {mirror}: bad hook command: {source}")]
    BadHookCommand {
        mirror: String,
        #[source]
        source: HookError,
    },

    #[error("mirror {mirror}: uses snapshots but config has no [btrfs] section")]
    MissingBtrfsSection { mirror: String },
}

/// A mirror-specific transfer strategy.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Run one sync pass and return the transfer's final exit code.
    /// Cancellation terminates the running child's process group.
    async fn run(&self, ctx: &JobContext, cancel: &CancellationToken)
        -> Result<i32, ProviderError>;
}

/// Log file for this run: the rotation hook usually put it in the
/// context; fall back to substituting the template directly.
pub(crate) fn resolve_log_file<C: Clock>(
    ctx: &JobContext,
    template: &str,
    clock: &C,
) -> PathBuf {
    if let Some(path) = &ctx.log_file {
        return path.clone();
    }
    let date = format_log_date(clock.epoch_ms());
    PathBuf::from(substitute(template, &[("date", &date)]))
}

/// Build the provider for a validated mirror config.
pub fn build_provider(cfg: &MirrorConfig) -> Result<Box<dyn Provider>, BuildError> {
    match cfg.provider_kind {
        ProviderKind::Rsync => Ok(Box::new(RsyncProvider::from_config(cfg))),
        ProviderKind::TwoStageRsync => {
            Ok(Box::new(TwoStageRsyncProvider::from_config(cfg)?))
        }
        ProviderKind::Shell => Ok(Box::new(ShellProvider::from_config(cfg))),
    }
}

/// Build the hook chain for a mirror: snapshot hook first (when
/// enabled), command hooks in the middle, log rotation last.
pub fn build_hooks(
    cfg: &MirrorConfig,
    settings: &Settings,
) -> Result<Vec<Box<dyn JobHook>>, BuildError> {
    let mut hooks: Vec<Box<dyn JobHook>> = Vec::new();

    if cfg.use_snapshot {
        let btrfs = settings
            .btrfs
            .as_ref()
            .ok_or_else(|| BuildError::MissingBtrfsSection { mirror: cfg.name.clone() })?;
        let paths = btrfs.paths_for(&settings.global.mirror_root, &cfg.name);
        hooks.push(Box::new(BtrfsHook::new(paths.service_dir, paths.working_dir, paths.gc_dir)));
    }

    for (command, at) in [
        (&cfg.exec_pre_sync, ExecAt::PreSync),
        (&cfg.exec_post_sync, ExecAt::PostSync),
    ] {
        if let Some(command) = command {
            let hook = CmdExecHook::new(command, at)
                .map_err(|source| BuildError::BadHookCommand { mirror: cfg.name.clone(), source })?;
            hooks.push(Box::new(hook));
        }
    }

    hooks.push(Box::new(LogLimitHook::new(
        cfg.name.clone(),
        cfg.log_dir.clone(),
        cfg.log_file_template.clone(),
    )));

    Ok(hooks)
}

/// Resolve the directory a transfer writes into.
pub(crate) fn working_dir(ctx: &JobContext) -> String {
    ctx.current_dir.to_string_lossy().into_owned()
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
