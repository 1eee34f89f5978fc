// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw config file structure and loading.

use std::path::{Path, PathBuf};

use mirsync_core::substitute;
use serde::Deserialize;
use thiserror::Error;

use crate::mirror::MirrorConfig;

/// Config loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("mirror {mirror}: missing required field `{field}`")]
    MissingField { mirror: String, field: &'static str },

    #[error("mirror {mirror}: unknown provider `{provider}`")]
    UnknownProvider { mirror: String, provider: String },

    #[error("mirror {mirror}: uses snapshots but config has no [btrfs] section")]
    MissingBtrfsSection { mirror: String },

    #[error("duplicate mirror name `{0}`")]
    DuplicateMirror(String),
}

/// Fully parsed config file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub global: GlobalSettings,
    #[serde(default)]
    pub btrfs: Option<BtrfsSettings>,
    #[serde(default)]
    pub mirrors: Vec<MirrorEntry>,
}

/// The `[global]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GlobalSettings {
    pub mirror_root: String,
    /// Template for per-mirror local directories (`{mirror_root}`,
    /// `{mirror_name}`).
    pub local_dir: String,
    pub log_dir: PathBuf,
    pub concurrent: usize,
    /// Default sync interval in minutes.
    pub interval: u64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default)]
    pub use_btrfs: bool,
    pub status_file: PathBuf,
    pub ctrl_addr: PathBuf,
}

fn default_max_retry() -> u32 {
    1
}

/// The `[btrfs]` table: path templates over `{mirror_root}`,
/// `{mirror_name}` and (for `gc_dir`) `{timestamp}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BtrfsSettings {
    pub service_dir: String,
    pub working_dir: String,
    pub gc_dir: String,
}

/// Snapshot paths derived for one mirror. `gc_dir` keeps its
/// `{timestamp}` placeholder until commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct BtrfsPaths {
    pub service_dir: PathBuf,
    pub working_dir: PathBuf,
    pub gc_dir: String,
}

impl BtrfsSettings {
    pub fn paths_for(&self, mirror_root: &str, mirror_name: &str) -> BtrfsPaths {
        let vars = [("mirror_root", mirror_root), ("mirror_name", mirror_name)];
        BtrfsPaths {
            service_dir: PathBuf::from(substitute(&self.service_dir, &vars)),
            working_dir: PathBuf::from(substitute(&self.working_dir, &vars)),
            gc_dir: substitute(&self.gc_dir, &vars),
        }
    }
}

/// One raw `[[mirrors]]` entry, before validation and derivation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MirrorEntry {
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub local_dir: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub interval: Option<u64>,
    /// Start delay for the first run, in seconds.
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default)]
    pub max_retry: Option<u32>,
    #[serde(default)]
    pub use_ipv6: Option<bool>,
    #[serde(default)]
    pub exclude_file: Option<PathBuf>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub use_btrfs: Option<bool>,
    #[serde(default)]
    pub log_stdout: Option<bool>,
    #[serde(default)]
    pub stage1_profile: Option<String>,
    #[serde(default)]
    pub exec_pre_sync: Option<String>,
    #[serde(default)]
    pub exec_post_sync: Option<String>,
}

impl Settings {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&text)
    }

    /// Parse config from a TOML string.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Validate every mirror entry and derive its effective config.
    pub fn mirror_configs(&self) -> Result<Vec<MirrorConfig>, ConfigError> {
        let mut out: Vec<MirrorConfig> = Vec::with_capacity(self.mirrors.len());
        for entry in &self.mirrors {
            if out.iter().any(|m| m.name == entry.name) {
                return Err(ConfigError::DuplicateMirror(entry.name.clone()));
            }
            let cfg = MirrorConfig::from_entry(entry, &self.global)?;
            if cfg.use_snapshot && self.btrfs.is_none() {
                return Err(ConfigError::MissingBtrfsSection { mirror: cfg.name });
            }
            out.push(cfg);
        }
        Ok(out)
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
pub(crate) mod tests;
