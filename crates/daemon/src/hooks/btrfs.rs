// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Copy-on-write snapshot hook.
//!
//! Before the job, the service volume is snapshotted into a working
//! volume and the transfer is pointed at the copy. After a successful
//! job the copy is published by two renames; readers of `service_dir`
//! never observe a half-synced tree. Failed runs leave the working
//! volume in place for the offline GC pass.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mirsync_core::{substitute, Clock, JobContext, MirrorStatus, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::runner::CommandSpec;

use super::{HookError, JobHook};

pub struct BtrfsHook {
    service_dir: PathBuf,
    working_dir: PathBuf,
    /// Template with a `{timestamp}` placeholder, filled at commit time.
    gc_dir: String,
    btrfs_bin: String,
}

impl BtrfsHook {
    pub fn new(
        service_dir: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        gc_dir: impl Into<String>,
    ) -> Self {
        BtrfsHook {
            service_dir: service_dir.into(),
            working_dir: working_dir.into(),
            gc_dir: gc_dir.into(),
            btrfs_bin: "btrfs".to_string(),
        }
    }

    /// Override the btrfs executable (tests use a stub).
    pub fn with_btrfs_bin(mut self, bin: impl Into<String>) -> Self {
        self.btrfs_bin = bin.into();
        self
    }

    async fn btrfs(&self, args: &[&str]) -> Result<i32, HookError> {
        let mut argv = vec![self.btrfs_bin.clone()];
        argv.extend(args.iter().map(|a| a.to_string()));
        let spec = CommandSpec::new(argv);
        Ok(spec.spawn()?.wait(&CancellationToken::new()).await?)
    }

    async fn ensure_subvolume(&self) -> Result<(), HookError> {
        let service = self.service_dir.to_string_lossy().into_owned();
        let code = self.btrfs(&["subvolume", "show", &service]).await?;
        if code != 0 {
            return Err(HookError::InvalidSubvolume(self.service_dir.clone()));
        }
        Ok(())
    }

    async fn create_working_snapshot(&self) -> Result<(), HookError> {
        self.ensure_subvolume().await?;
        if self.working_dir.exists() {
            warn!(
                working_dir = %self.working_dir.display(),
                "working dir already exists, is another sync running? reusing it"
            );
            return Ok(());
        }
        let service = self.service_dir.to_string_lossy().into_owned();
        let working = self.working_dir.to_string_lossy().into_owned();
        let code = self.btrfs(&["subvolume", "snapshot", &service, &working]).await?;
        if code != 0 {
            return Err(HookError::CommandFailed(code));
        }
        Ok(())
    }

    async fn commit_changes(&self, epoch_ms: u64) -> Result<(), HookError> {
        self.ensure_subvolume().await?;
        let timestamp = (epoch_ms / 1000).to_string();
        let gc_dir = substitute(&self.gc_dir, &[("timestamp", timestamp.as_str())]);

        std::fs::rename(&self.service_dir, Path::new(&gc_dir))?;
        std::fs::rename(&self.working_dir, &self.service_dir)?;
        info!(
            service_dir = %self.service_dir.display(),
            gc_dir = %gc_dir,
            "published snapshot, old tree queued for gc"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHook for BtrfsHook {
    fn name(&self) -> &'static str {
        "btrfs"
    }

    async fn before_job(&self, ctx: &mut JobContext) -> Result<(), HookError> {
        self.create_working_snapshot().await?;
        ctx.current_dir = self.working_dir.clone();
        Ok(())
    }

    async fn after_job(&self, status: MirrorStatus, _ctx: &mut JobContext) -> Result<(), HookError> {
        if status.is_success() {
            self.commit_changes(SystemClock.epoch_ms()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "btrfs_tests.rs"]
mod tests;
