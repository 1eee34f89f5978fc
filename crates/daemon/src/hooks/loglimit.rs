// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log rotation hook: names the run's log file, prunes old logs and
//! maintains the `latest` symlink.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use mirsync_core::{format_log_date, substitute, Clock, JobContext, MirrorStatus, SystemClock};
use tracing::warn;

use super::{HookError, JobHook};

pub const DEFAULT_LOG_LIMIT: usize = 10;

pub struct LogLimitHook<C: Clock = SystemClock> {
    mirror_name: String,
    log_dir: PathBuf,
    log_file_template: String,
    limit: usize,
    clock: C,
}

impl LogLimitHook<SystemClock> {
    pub fn new(
        mirror_name: impl Into<String>,
        log_dir: impl Into<PathBuf>,
        log_file_template: impl Into<String>,
    ) -> Self {
        Self::with_clock(mirror_name, log_dir, log_file_template, SystemClock)
    }
}

impl<C: Clock> LogLimitHook<C> {
    pub fn with_clock(
        mirror_name: impl Into<String>,
        log_dir: impl Into<PathBuf>,
        log_file_template: impl Into<String>,
        clock: C,
    ) -> Self {
        LogLimitHook {
            mirror_name: mirror_name.into(),
            log_dir: log_dir.into(),
            log_file_template: log_file_template.into(),
            limit: DEFAULT_LOG_LIMIT,
            clock,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Delete prefix-matching log files beyond the newest `limit`.
    fn prune_old_logs(&self) -> Result<(), HookError> {
        let mut logs: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.log_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if !name.starts_with(&self.mirror_name) || name == "latest" {
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            logs.push((mtime, entry.path()));
        }

        logs.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, old) in logs.into_iter().skip(self.limit) {
            if let Err(e) = std::fs::remove_file(&old) {
                warn!(path = %old.display(), "failed to remove old log: {}", e);
            }
        }
        Ok(())
    }
}

/// Point `link` at `target`, replacing any previous link.
fn create_link(link: &Path, target: &Path) {
    if link == target {
        return;
    }
    if std::fs::symlink_metadata(link).is_ok() {
        if let Err(e) = std::fs::remove_file(link) {
            warn!(link = %link.display(), "failed to remove old symlink: {}", e);
            return;
        }
    }
    if let Err(e) = std::os::unix::fs::symlink(target, link) {
        warn!(link = %link.display(), "failed to create symlink: {}", e);
    }
}

#[async_trait]
impl<C: Clock + 'static> JobHook for LogLimitHook<C> {
    fn name(&self) -> &'static str {
        "loglimit"
    }

    async fn before_job(&self, ctx: &mut JobContext) -> Result<(), HookError> {
        let date = format_log_date(self.clock.epoch_ms());
        let log_file = PathBuf::from(substitute(&self.log_file_template, &[("date", &date)]));
        ctx.log_file = Some(log_file.clone());
        if ctx.log_disabled() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.log_dir)?;
        let log_link = self.log_dir.join("latest");
        ctx.log_link = Some(log_link.clone());

        self.prune_old_logs()?;
        create_link(&log_link, &log_file);
        Ok(())
    }

    async fn after_job(&self, status: MirrorStatus, ctx: &mut JobContext) -> Result<(), HookError> {
        if ctx.log_disabled() || status != MirrorStatus::Fail {
            return Ok(());
        }
        let (Some(log_file), Some(log_link)) = (ctx.log_file.clone(), ctx.log_link.clone()) else {
            return Ok(());
        };

        let mut failed = log_file.clone().into_os_string();
        failed.push(".fail");
        let failed = PathBuf::from(failed);
        match std::fs::rename(&log_file, &failed) {
            Ok(()) => {
                create_link(&log_link, &failed);
                ctx.log_file = Some(failed);
            }
            Err(e) => warn!(path = %log_file.display(), "failed to rename failed log: {}", e),
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "loglimit_tests.rs"]
mod tests;
