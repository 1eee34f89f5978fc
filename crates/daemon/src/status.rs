// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory mirror status table with best-effort JSON persistence.
//!
//! The supervisor is the only writer. Every mutation rewrites the
//! status file (write-temp then rename) so readers outside the daemon
//! always see a complete JSON document; a failed write is logged and
//! the in-memory table stays authoritative.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use mirsync_core::{format_status_time, Clock, JobContext, MirrorStatus, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One persisted mirror record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,
    pub status: MirrorStatus,
    /// `%Y-%m-%d %H:%M:%S` of the last successful sync, `-` if never.
    pub last_update: String,
    pub upstream: String,
}

struct MirrorState {
    record: StatusRecord,
    /// Context snapshot from the latest update; feeds the `log`
    /// command. Not persisted.
    ctx: Option<JobContext>,
}

pub struct StatusStore<C: Clock = SystemClock> {
    dbfile: PathBuf,
    mirrors: BTreeMap<String, MirrorState>,
    clock: C,
}

impl StatusStore<SystemClock> {
    pub fn load(dbfile: impl Into<PathBuf>, mirrors: &[(String, String)]) -> Self {
        Self::load_with_clock(dbfile, mirrors, SystemClock)
    }
}

impl<C: Clock> StatusStore<C> {
    /// Build the table from config (`mirrors` is name → upstream) and
    /// merge persisted status/last_update back in. Config wins for
    /// membership and upstream; mirrors gone from the config are
    /// dropped.
    pub fn load_with_clock(
        dbfile: impl Into<PathBuf>,
        mirrors: &[(String, String)],
        clock: C,
    ) -> Self {
        let dbfile = dbfile.into();
        let mut table = BTreeMap::new();
        for (name, upstream) in mirrors {
            table.insert(
                name.clone(),
                MirrorState {
                    record: StatusRecord {
                        name: name.clone(),
                        status: MirrorStatus::None,
                        last_update: "-".to_string(),
                        upstream: upstream.clone(),
                    },
                    ctx: None,
                },
            );
        }

        match std::fs::read(&dbfile) {
            Ok(bytes) => match serde_json::from_slice::<Vec<StatusRecord>>(&bytes) {
                Ok(persisted) => {
                    for record in persisted {
                        if let Some(state) = table.get_mut(&record.name) {
                            state.record.status = record.status;
                            state.record.last_update = record.last_update;
                        }
                    }
                }
                Err(e) => warn!(path = %dbfile.display(), "ignoring corrupt status file: {}", e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dbfile.display(), "failed to read status file: {}", e),
        }

        StatusStore { dbfile, mirrors: table, clock }
    }

    /// Record a status change. `last_update` advances only on success.
    pub fn update(&mut self, name: &str, status: MirrorStatus, ctx: JobContext) {
        let state = self.mirrors.entry(name.to_string()).or_insert_with(|| MirrorState {
            record: StatusRecord {
                name: name.to_string(),
                status: MirrorStatus::None,
                last_update: "-".to_string(),
                upstream: String::new(),
            },
            ctx: None,
        });
        state.record.status = status;
        if status.is_success() {
            state.record.last_update = format_status_time(self.clock.epoch_ms());
        }
        state.ctx = Some(ctx);
        debug!(mirror = %name, %status, "status updated");
        self.persist();
    }

    /// Overwrite a status without touching `last_update` or the
    /// context (used for `paused`).
    pub fn set_status(&mut self, name: &str, status: MirrorStatus) {
        if let Some(state) = self.mirrors.get_mut(name) {
            state.record.status = status;
            self.persist();
        }
    }

    /// Re-pull the upstream field after a reload, creating the record
    /// if the mirror is new.
    pub fn refresh(&mut self, name: &str, upstream: String) {
        let state = self.mirrors.entry(name.to_string()).or_insert_with(|| MirrorState {
            record: StatusRecord {
                name: name.to_string(),
                status: MirrorStatus::None,
                last_update: "-".to_string(),
                upstream: String::new(),
            },
            ctx: None,
        });
        state.record.upstream = upstream;
        self.persist();
    }

    pub fn get(&self, name: &str) -> Option<&StatusRecord> {
        self.mirrors.get(name).map(|s| &s.record)
    }

    pub fn ctx(&self, name: &str) -> Option<&JobContext> {
        self.mirrors.get(name).and_then(|s| s.ctx.as_ref())
    }

    /// One-line summary for a single mirror.
    pub fn get_line(&self, name: &str) -> String {
        match self.get(name) {
            Some(record) => format!(
                "{}: {}, last update: {}",
                record.name, record.status, record.last_update
            ),
            None => format!("{name}: unknown mirror"),
        }
    }

    /// Fixed-width table of every mirror: header, separator, one row
    /// per mirror, each column padded to its widest cell.
    pub fn list_formatted(&self) -> String {
        let header = ["NAME", "LAST UPDATE", "STATUS"];
        let rows: Vec<[String; 3]> = self
            .mirrors
            .values()
            .map(|s| {
                [
                    s.record.name.clone(),
                    s.record.last_update.clone(),
                    s.record.status.to_string(),
                ]
            })
            .collect();

        let mut widths = [header[0].len(), header[1].len(), header[2].len()];
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.len());
            }
        }

        let render = |cells: [&str; 3]| -> String {
            format!(
                "{:<w0$}  {:<w1$}  {:<w2$}",
                cells[0],
                cells[1],
                cells[2],
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
            )
            .trim_end()
            .to_string()
        };

        let mut lines = Vec::with_capacity(rows.len() + 2);
        lines.push(render(header));
        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        lines.push(render([&separator[0], &separator[1], &separator[2]]));
        for row in &rows {
            lines.push(render([&row[0], &row[1], &row[2]]));
        }
        lines.join("\n")
    }

    /// Path of the n-th newest log file for a mirror, resolved from
    /// its last context snapshot.
    pub fn log_path(&self, name: &str, n: usize) -> String {
        let Some(ctx) = self.ctx(name) else {
            return "/dev/null".to_string();
        };

        if n == 0 {
            return ctx
                .log_link
                .as_ref()
                .or(ctx.log_file.as_ref())
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "/dev/null".to_string());
        }

        let Some(log_dir) = ctx.log_file.as_ref().and_then(|f| f.parent()) else {
            return "/dev/null".to_string();
        };
        let mut logs: Vec<(SystemTime, PathBuf)> = Vec::new();
        let Ok(entries) = std::fs::read_dir(log_dir) else {
            return "/dev/null".to_string();
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let fname = file_name.to_string_lossy();
            if !fname.starts_with(name) || fname == "latest" {
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            logs.push((mtime, entry.path()));
        }
        if logs.len() <= n {
            return format!("Only {} log files available", logs.len());
        }
        logs.sort_by(|a, b| b.0.cmp(&a.0));
        logs[n].1.display().to_string()
    }

    fn persist(&self) {
        if let Err(e) = self.try_persist() {
            warn!(path = %self.dbfile.display(), "failed to write status file: {}", e);
        }
    }

    fn try_persist(&self) -> std::io::Result<()> {
        let records: Vec<&StatusRecord> = self.mirrors.values().map(|s| &s.record).collect();
        let json = serde_json::to_vec_pretty(&records).map_err(std::io::Error::other)?;

        let tmp = temp_path(&self.dbfile);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.dbfile)
    }
}

fn temp_path(dbfile: &Path) -> PathBuf {
    let mut name = dbfile.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dbfile.with_file_name(name)
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
