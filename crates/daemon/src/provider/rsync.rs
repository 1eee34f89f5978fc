// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-stage rsync provider.

use async_trait::async_trait;
use mirsync_config::MirrorConfig;
use mirsync_core::{Clock, JobContext, SystemClock};
use tokio_util::sync::CancellationToken;

use crate::runner::{CommandSpec, OutputSink};

use super::{resolve_log_file, working_dir, Provider, ProviderError};

/// Baseline rsync options shared with the two-stage provider's second
/// stage.
pub(crate) const DEFAULT_RSYNC_OPTIONS: &[&str] = &[
    "-aHvh",
    "--no-o",
    "--no-g",
    "--stats",
    "--exclude",
    ".~tmp~/",
    "--delete",
    "--delete-after",
    "--delay-updates",
    "--safe-links",
    "--timeout=120",
    "--contimeout=120",
];

pub struct RsyncProvider<C: Clock = SystemClock> {
    name: String,
    upstream_url: String,
    use_ipv6: bool,
    exclude_file: Option<String>,
    password: Option<String>,
    log_file_template: String,
    clock: C,
}

impl RsyncProvider<SystemClock> {
    pub fn from_config(cfg: &MirrorConfig) -> Self {
        RsyncProvider {
            name: cfg.name.clone(),
            upstream_url: cfg.upstream_url.clone().unwrap_or_default(),
            use_ipv6: cfg.use_ipv6,
            exclude_file: cfg
                .exclude_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            password: cfg.password.clone(),
            log_file_template: cfg.log_file_template.clone(),
            clock: SystemClock,
        }
    }
}

impl<C: Clock> RsyncProvider<C> {
    fn options(&self) -> Vec<String> {
        let mut options: Vec<String> =
            DEFAULT_RSYNC_OPTIONS.iter().map(|o| o.to_string()).collect();
        if self.use_ipv6 {
            options.push("-6".to_string());
        }
        if let Some(exclude) = &self.exclude_file {
            options.push("--exclude-from".to_string());
            options.push(exclude.clone());
        }
        options
    }

    pub(crate) fn build_argv(&self, ctx: &JobContext) -> Vec<String> {
        let mut argv = vec!["rsync".to_string()];
        argv.extend(self.options());
        argv.push(self.upstream_url.clone());
        argv.push(working_dir(ctx));
        argv
    }
}

#[async_trait]
impl<C: Clock + 'static> Provider for RsyncProvider<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<i32, ProviderError> {
        let log_file = resolve_log_file(ctx, &self.log_file_template, &self.clock);

        let mut spec = CommandSpec::new(self.build_argv(ctx));
        if let Some(password) = &self.password {
            spec.env.push(("RSYNC_PASSWORD".to_string(), password.clone()));
        }
        spec.stdout = OutputSink::File { path: log_file, truncate: true };

        Ok(spec.spawn()?.wait(cancel).await?)
    }
}

#[cfg(test)]
#[path = "rsync_tests.rs"]
pub(crate) mod tests;
