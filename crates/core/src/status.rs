// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mirror status values and their wire/persistence strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of one mirror, as shown to operators and persisted
/// in the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MirrorStatus {
    /// Never synced since the daemon knows about it.
    None,
    /// Iteration started; waiting for a slot or running pre hooks.
    PreSyncing,
    /// Transfer attempt in progress.
    Syncing,
    Success,
    Fail,
    /// Worker stopped by an operator.
    Paused,
}

impl MirrorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MirrorStatus::None => "none",
            MirrorStatus::PreSyncing => "pre-syncing",
            MirrorStatus::Syncing => "syncing",
            MirrorStatus::Success => "success",
            MirrorStatus::Fail => "fail",
            MirrorStatus::Paused => "paused",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, MirrorStatus::Success)
    }
}

impl fmt::Display for MirrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
