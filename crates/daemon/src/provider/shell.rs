// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell command provider for mirrors that need a custom pipeline.

use std::path::PathBuf;

use async_trait::async_trait;
use mirsync_config::MirrorConfig;
use mirsync_core::{Clock, JobContext, SystemClock};
use tokio_util::sync::CancellationToken;

use crate::runner::{CommandSpec, OutputSink, RunnerError};

use super::{resolve_log_file, working_dir, Provider, ProviderError};

pub struct ShellProvider<C: Clock = SystemClock> {
    name: String,
    command: String,
    upstream_url: String,
    local_dir: PathBuf,
    log_file_template: String,
    log_stdout: bool,
    clock: C,
}

impl ShellProvider<SystemClock> {
    pub fn from_config(cfg: &MirrorConfig) -> Self {
        ShellProvider {
            name: cfg.name.clone(),
            command: cfg.command.clone().unwrap_or_default(),
            upstream_url: cfg.upstream_url.clone().unwrap_or_default(),
            local_dir: cfg.local_dir.clone(),
            log_file_template: cfg.log_file_template.clone(),
            log_stdout: cfg.log_stdout,
            clock: SystemClock,
        }
    }
}

#[async_trait]
impl<C: Clock + 'static> Provider for ShellProvider<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<i32, ProviderError> {
        let log_file = resolve_log_file(ctx, &self.log_file_template, &self.clock);

        let argv = shell_words::split(&self.command)
            .map_err(|e| RunnerError::Spawn {
                command: self.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?;

        let mut spec = CommandSpec::new(argv);
        spec.env = vec![
            ("TUNASYNC_MIRROR_NAME".to_string(), self.name.clone()),
            ("TUNASYNC_LOCAL_DIR".to_string(), self.local_dir.to_string_lossy().into_owned()),
            ("TUNASYNC_WORKING_DIR".to_string(), working_dir(ctx)),
            ("TUNASYNC_UPSTREAM_URL".to_string(), self.upstream_url.clone()),
            ("TUNASYNC_LOG_FILE".to_string(), log_file.to_string_lossy().into_owned()),
        ];
        spec.stdout = if self.log_stdout {
            OutputSink::File { path: log_file, truncate: true }
        } else {
            OutputSink::Null
        };

        Ok(spec.spawn()?.wait(cancel).await?)
    }
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
