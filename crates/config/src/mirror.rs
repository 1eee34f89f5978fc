// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validated per-mirror configuration.

use std::path::PathBuf;

use mirsync_core::substitute;

use crate::settings::{ConfigError, GlobalSettings, MirrorEntry};

/// Transfer strategy selected for a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Rsync,
    TwoStageRsync,
    Shell,
}

impl ProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "rsync" => Some(ProviderKind::Rsync),
            "two_stage_rsync" => Some(ProviderKind::TwoStageRsync),
            "shell" => Some(ProviderKind::Shell),
            _ => None,
        }
    }
}

/// Effective configuration of one mirror after validation and template
/// derivation. Immutable once built; reload decisions compare whole
/// values, so `PartialEq` must cover every field.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorConfig {
    pub name: String,
    pub provider_kind: ProviderKind,
    pub upstream_url: Option<String>,
    pub command: Option<String>,
    pub local_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Full log file path template with a `{date}` placeholder, or
    /// `/dev/null` to disable logging.
    pub log_file_template: String,
    pub interval_minutes: u64,
    pub delay_seconds: u64,
    pub max_retry: u32,
    pub use_snapshot: bool,
    pub exclude_file: Option<PathBuf>,
    pub password: Option<String>,
    pub use_ipv6: bool,
    pub log_stdout: bool,
    pub two_stage_profile: Option<String>,
    pub exec_pre_sync: Option<String>,
    pub exec_post_sync: Option<String>,
}

impl MirrorConfig {
    pub fn from_entry(entry: &MirrorEntry, global: &GlobalSettings) -> Result<Self, ConfigError> {
        let provider_kind = ProviderKind::parse(&entry.provider).ok_or_else(|| {
            ConfigError::UnknownProvider {
                mirror: entry.name.clone(),
                provider: entry.provider.clone(),
            }
        })?;

        match provider_kind {
            ProviderKind::Rsync | ProviderKind::TwoStageRsync => {
                if entry.upstream.is_none() {
                    return Err(missing(&entry.name, "upstream"));
                }
            }
            ProviderKind::Shell => {
                if entry.command.is_none() {
                    return Err(missing(&entry.name, "command"));
                }
            }
        }
        if provider_kind == ProviderKind::TwoStageRsync && entry.stage1_profile.is_none() {
            return Err(missing(&entry.name, "stage1_profile"));
        }

        let vars = [("mirror_root", global.mirror_root.as_str()), ("mirror_name", entry.name.as_str())];
        let local_dir_tmpl = entry.local_dir.as_deref().unwrap_or(&global.local_dir);
        let local_dir = PathBuf::from(substitute(local_dir_tmpl, &vars));

        let log_file_template = match &entry.log_file {
            Some(template) => substitute(template, &vars),
            None => global
                .log_dir
                .join(&entry.name)
                .join(format!("{}_{{date}}.log", entry.name))
                .to_string_lossy()
                .into_owned(),
        };
        let log_dir = PathBuf::from(&log_file_template)
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| missing(&entry.name, "log_file"))?;

        Ok(MirrorConfig {
            name: entry.name.clone(),
            provider_kind,
            upstream_url: entry.upstream.clone(),
            command: entry.command.clone(),
            local_dir,
            log_dir,
            log_file_template,
            interval_minutes: entry.interval.unwrap_or(global.interval),
            delay_seconds: entry.delay.unwrap_or(0),
            max_retry: entry.max_retry.unwrap_or(global.max_retry),
            use_snapshot: entry.use_btrfs.unwrap_or(global.use_btrfs),
            exclude_file: entry.exclude_file.clone(),
            password: entry.password.clone(),
            use_ipv6: entry.use_ipv6.unwrap_or(false),
            log_stdout: entry.log_stdout.unwrap_or(true),
            two_stage_profile: entry.stage1_profile.clone(),
            exec_pre_sync: entry.exec_pre_sync.clone(),
            exec_post_sync: entry.exec_post_sync.clone(),
        })
    }
}

fn missing(mirror: &str, field: &'static str) -> ConfigError {
    ConfigError::MissingField { mirror: mirror.to_string(), field }
}

#[cfg(test)]
#[path = "mirror_tests.rs"]
mod tests;
