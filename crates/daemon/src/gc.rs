// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline garbage collector for published snapshots.
//!
//! Successful snapshot commits rename the previous service tree to
//! `_gc_<epoch>`; this pass walks the mirror root and deletes those
//! subvolumes with the copy-on-write delete primitive.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::runner::CommandSpec;

const MAX_WALK_DEPTH: usize = 2;

#[derive(Debug, Error)]
pub enum GcError {
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// True for directory names of the form `_gc_<digits>`.
fn is_gc_dir(name: &str) -> bool {
    name.strip_prefix("_gc_")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn find_gc_dirs(dir: &Path, depth: usize, found: &mut Vec<PathBuf>) -> Result<(), GcError> {
    if depth > MAX_WALK_DEPTH {
        return Ok(());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|source| GcError::Walk { path: dir.to_path_buf(), source })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if is_gc_dir(&name.to_string_lossy()) {
            found.push(path);
        } else {
            find_gc_dirs(&path, depth + 1, found)?;
        }
    }
    Ok(())
}

/// Delete every garbage snapshot under `mirror_root`. Returns how many
/// were removed; individual delete failures are logged and skipped.
pub async fn collect_garbage(mirror_root: &Path, btrfs_bin: &str) -> Result<usize, GcError> {
    let mut targets = Vec::new();
    find_gc_dirs(mirror_root, 1, &mut targets)?;

    let mut removed = 0;
    for dir in targets {
        info!(path = %dir.display(), "deleting garbage snapshot");
        let argv = vec![
            btrfs_bin.to_string(),
            "subvolume".to_string(),
            "delete".to_string(),
            dir.to_string_lossy().into_owned(),
        ];
        match CommandSpec::new(argv).spawn() {
            Ok(process) => match process.wait(&CancellationToken::new()).await {
                Ok(0) => removed += 1,
                Ok(code) => warn!(path = %dir.display(), code, "snapshot delete failed"),
                Err(e) => warn!(path = %dir.display(), "snapshot delete failed: {}", e),
            },
            Err(e) => warn!(path = %dir.display(), "snapshot delete failed: {}", e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
#[path = "gc_tests.rs"]
mod tests;
