// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-iteration job context shared between hooks and providers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Mutable state for one sync iteration.
///
/// A fresh context is allocated at the start of every iteration and a
/// snapshot of it travels with each status update, so the supervisor can
/// answer `log` queries without reaching into worker state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub mirror_name: String,
    /// Directory the transfer writes into. Starts as the mirror's
    /// `local_dir`; the snapshot hook repoints it at the working copy.
    pub current_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_link: Option<PathBuf>,
}

impl JobContext {
    pub fn new(mirror_name: impl Into<String>, local_dir: impl Into<PathBuf>) -> Self {
        JobContext {
            mirror_name: mirror_name.into(),
            current_dir: local_dir.into(),
            log_file: None,
            log_link: None,
        }
    }

    /// True when logging is disabled for this run.
    pub fn log_disabled(&self) -> bool {
        self.log_file.as_deref() == Some(Path::new("/dev/null"))
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
