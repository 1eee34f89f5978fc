// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-stage rsync provider.
//!
//! Stage 1 is a metadata-light pass that skips the release indexes the
//! profile names, shrinking the window in which indexes point at
//! packages that have not arrived yet. Stage 2 is the full transfer
//! with deletions.

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use mirsync_config::MirrorConfig;
use mirsync_core::{Clock, JobContext, SystemClock};
use tokio_util::sync::CancellationToken;

use crate::runner::{CommandSpec, OutputSink};

use super::rsync::DEFAULT_RSYNC_OPTIONS;
use super::{resolve_log_file, working_dir, BuildError, Provider, ProviderError};

pub(crate) const STAGE1_OPTIONS: &[&str] = &[
    "-aHvh",
    "--no-o",
    "--no-g",
    "--exclude",
    ".~tmp~/",
    "--safe-links",
    "--timeout=120",
    "--contimeout=120",
];

/// Metadata patterns excluded from stage 1, per profile.
fn stage1_profile(profile: &str) -> Option<&'static [&'static str]> {
    match profile {
        "debian" => {
            Some(&["Packages*", "Sources*", "Release*", "InRelease", "i18n/*", "ls-lR*"])
        }
        _ => None,
    }
}

#[derive(Debug)]
pub struct TwoStageRsyncProvider<C: Clock = SystemClock> {
    name: String,
    upstream_url: String,
    use_ipv6: bool,
    exclude_file: Option<String>,
    password: Option<String>,
    log_file_template: String,
    stage1_excludes: &'static [&'static str],
    clock: C,
}

impl TwoStageRsyncProvider<SystemClock> {
    pub fn from_config(cfg: &MirrorConfig) -> Result<Self, BuildError> {
        let profile = cfg.two_stage_profile.clone().unwrap_or_default();
        let stage1_excludes = stage1_profile(&profile).ok_or_else(|| {
            BuildError::UnknownProfile { mirror: cfg.name.clone(), profile: profile.clone() }
        })?;
        Ok(TwoStageRsyncProvider {
            name: cfg.name.clone(),
            upstream_url: cfg.upstream_url.clone().unwrap_or_default(),
            use_ipv6: cfg.use_ipv6,
            exclude_file: cfg
                .exclude_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            password: cfg.password.clone(),
            log_file_template: cfg.log_file_template.clone(),
            stage1_excludes,
            clock: SystemClock,
        })
    }
}

impl<C: Clock> TwoStageRsyncProvider<C> {
    pub(crate) fn options(&self, stage: u8) -> Vec<String> {
        let base = if stage == 1 { STAGE1_OPTIONS } else { DEFAULT_RSYNC_OPTIONS };
        let mut options: Vec<String> = base.iter().map(|o| o.to_string()).collect();

        if stage == 1 {
            for pattern in self.stage1_excludes {
                options.push("--exclude".to_string());
                options.push(pattern.to_string());
            }
        }
        if self.use_ipv6 {
            options.push("-6".to_string());
        }
        if let Some(exclude) = &self.exclude_file {
            options.push("--exclude-from".to_string());
            options.push(exclude.clone());
        }
        options
    }

    pub(crate) fn build_argv(&self, stage: u8, ctx: &JobContext) -> Vec<String> {
        let mut argv = vec!["rsync".to_string()];
        argv.extend(self.options(stage));
        argv.push(self.upstream_url.clone());
        argv.push(working_dir(ctx));
        argv
    }
}

fn write_stage_banner(log_file: &Path, stage: u8, truncate: bool) -> std::io::Result<()> {
    if log_file == Path::new("/dev/null") {
        return Ok(());
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(truncate)
        .append(!truncate)
        .open(log_file)?;
    writeln!(file, "==== Stage {stage} Begins ====\n")
}

#[async_trait]
impl<C: Clock + 'static> Provider for TwoStageRsyncProvider<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<i32, ProviderError> {
        let log_file = resolve_log_file(ctx, &self.log_file_template, &self.clock);

        let mut code = 0;
        for stage in [1u8, 2] {
            write_stage_banner(&log_file, stage, stage == 1)?;

            let mut spec = CommandSpec::new(self.build_argv(stage, ctx));
            if let Some(password) = &self.password {
                spec.env.push(("RSYNC_PASSWORD".to_string(), password.clone()));
            }
            spec.stdout = OutputSink::File { path: log_file.clone(), truncate: false };

            code = spec.spawn()?.wait(cancel).await?;
            if code != 0 {
                // stage 1 failure aborts stage 2
                break;
            }
        }
        Ok(code)
    }
}

#[cfg(test)]
#[path = "two_stage_tests.rs"]
mod tests;
