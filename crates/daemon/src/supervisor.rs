// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor: owns the worker table, the concurrency gate, the status
//! store and the event bus; dispatches operator commands and handles
//! reload and shutdown.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mirsync_config::{ConfigError, MirrorConfig, Settings};
use mirsync_core::MirrorStatus;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{self, Event, EventRx, EventTx, WorkerControl};
use crate::provider::{self, BuildError};
use crate::status::StatusStore;
use crate::worker::{JobSpec, JobWorker};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("unknown mirror {0}")]
    UnknownMirror(String),

    #[error("failed to install signal handler: {0}")]
    Signal(std::io::Error),
}

struct WorkerHandle {
    id: u64,
    inbound: mpsc::Sender<WorkerControl>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    /// Set by a soft reload: when this worker acks, respawn it.
    draining: bool,
}

pub struct Supervisor {
    settings: Settings,
    config_path: PathBuf,
    mirrors: BTreeMap<String, MirrorConfig>,
    workers: HashMap<String, WorkerHandle>,
    /// Mirrors that have been spawned at least once; later spawns run
    /// with zero delay.
    started_once: HashSet<String>,
    semaphore: Arc<Semaphore>,
    status: StatusStore,
    events_tx: EventTx,
    events_rx: EventRx,
    shutdown: CancellationToken,
    next_worker_id: u64,
}

impl Supervisor {
    pub fn new(settings: Settings, config_path: PathBuf) -> Result<Self, SupervisorError> {
        let configs = settings.mirror_configs()?;
        let upstreams: Vec<(String, String)> = configs
            .iter()
            .map(|c| (c.name.clone(), c.upstream_url.clone().unwrap_or_default()))
            .collect();
        let status = StatusStore::load(settings.global.status_file.clone(), &upstreams);

        let mirrors = configs.into_iter().map(|c| (c.name.clone(), c)).collect();
        let semaphore = Arc::new(Semaphore::new(settings.global.concurrent));
        let (events_tx, events_rx) = bus::channel();

        Ok(Supervisor {
            settings,
            config_path,
            mirrors,
            workers: HashMap::new(),
            started_once: HashSet::new(),
            semaphore,
            status,
            events_tx,
            events_rx,
            shutdown: CancellationToken::new(),
            next_worker_id: 0,
        })
    }

    /// Sender for the control server and tests.
    pub fn event_sender(&self) -> EventTx {
        self.events_tx.clone()
    }

    /// Token that makes `run` exit as if INT/TERM had arrived.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn all configured workers and run the event loop until a
    /// shutdown signal arrives.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        use tokio::signal::unix::{signal, SignalKind};

        let names: Vec<String> = self.mirrors.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.start_worker(&name) {
                error!(mirror = %name, "failed to start worker: {}", e);
            }
        }

        let mut sigint = signal(SignalKind::interrupt()).map_err(SupervisorError::Signal)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(SupervisorError::Signal)?;
        let mut sigusr1 = signal(SignalKind::user_defined1()).map_err(SupervisorError::Signal)?;
        let mut sigusr2 = signal(SignalKind::user_defined2()).map_err(SupervisorError::Signal)?;

        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sigusr1.recv() => self.reload(false).await,
                _ = sigusr2.recv() => self.reload(true).await,
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.terminate_all().await;
        Ok(())
    }

    pub(crate) async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Update { mirror, status, ctx } => {
                self.status.update(&mirror, status, ctx);
            }
            Event::ConfigAck { mirror, worker_id } => {
                self.handle_ack(&mirror, worker_id);
            }
            Event::Command { op, target, kwargs, reply } => {
                let response = self.handle_command(&op, &target, &kwargs).await;
                let _ = reply.send(response);
            }
        }
    }

    /// A worker drained and exited. Respawn it only when a soft reload
    /// marked it as draining; acks from stopped or replaced workers
    /// are dropped.
    fn handle_ack(&mut self, mirror: &str, worker_id: u64) {
        let draining = matches!(
            self.workers.get(mirror),
            Some(handle) if handle.id == worker_id && handle.draining
        );
        if !draining {
            debug!(mirror, worker_id, "ignoring ack from retired worker");
            return;
        }

        info!(mirror, "new configuration applied");
        self.workers.remove(mirror);
        if let Err(e) = self.start_worker(mirror) {
            error!(mirror, "failed to restart worker: {}", e);
        }
    }

    pub(crate) async fn handle_command(
        &mut self,
        op: &str,
        target: &str,
        kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> String {
        if target != "__ALL__" && !self.mirrors.contains_key(target) {
            return "Invalid target".to_string();
        }

        match op {
            "start" => {
                if self.workers.contains_key(target) {
                    return format!("{target} already running");
                }
                match self.start_worker(target) {
                    Ok(()) => format!("Started Job: {target}"),
                    Err(e) => format!("failed to start {target}: {e}"),
                }
            }

            "stop" => {
                if !self.stop_worker(target) {
                    return format!("{target} not running");
                }
                self.status.set_status(target, MirrorStatus::Paused);
                format!("Stopped Job: {target}")
            }

            "restart" => {
                if !self.workers.contains_key(target) {
                    return format!("{target} not running");
                }
                self.stop_worker(target);
                match self.start_worker(target) {
                    Ok(()) => format!("Restarted Job: {target}"),
                    Err(e) => format!("failed to restart {target}: {e}"),
                }
            }

            "status" => {
                if target == "__ALL__" {
                    self.status.list_formatted()
                } else {
                    self.status.get_line(target)
                }
            }

            "log" => {
                let n = kwargs.get("n").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                self.status.log_path(target, n)
            }

            _ => "Invalid command".to_string(),
        }
    }

    /// Spawn a worker for a configured mirror. The first spawn honors
    /// the configured start delay; every later one runs immediately.
    pub(crate) fn start_worker(&mut self, name: &str) -> Result<(), SupervisorError> {
        let cfg = self
            .mirrors
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownMirror(name.to_string()))?;

        let provider = provider::build_provider(cfg)?;
        let hooks = provider::build_hooks(cfg, &self.settings)?;
        let delay = if self.started_once.insert(name.to_string()) {
            Duration::from_secs(cfg.delay_seconds)
        } else {
            Duration::ZERO
        };

        let id = self.next_worker_id;
        self.next_worker_id += 1;
        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let spec = JobSpec {
            name: name.to_string(),
            local_dir: cfg.local_dir.clone(),
            interval: Duration::from_secs(cfg.interval_minutes * 60),
            delay,
            max_retry: cfg.max_retry,
            provider,
            hooks,
        };
        let worker = JobWorker::new(
            id,
            spec,
            Arc::clone(&self.semaphore),
            inbound_rx,
            self.events_tx.clone(),
            cancel.clone(),
        );
        let join = tokio::spawn(worker.run());

        self.workers.insert(
            name.to_string(),
            WorkerHandle { id, inbound: inbound_tx, cancel, join, draining: false },
        );
        info!(mirror = %name, worker_id = id, "started worker");
        Ok(())
    }

    /// Force-stop a worker: cancel its token (terminating any child)
    /// and drop it from the table. Returns false when not running.
    pub(crate) fn stop_worker(&mut self, name: &str) -> bool {
        match self.workers.remove(name) {
            Some(handle) => {
                handle.cancel.cancel();
                info!(mirror = %name, worker_id = handle.id, "stopped worker");
                true
            }
            None => false,
        }
    }

    /// Re-parse the config file and apply changes. Parse failures keep
    /// the previous config.
    pub(crate) async fn reload(&mut self, force: bool) {
        info!(force, "reloading mirror configs");

        let settings = match Settings::load(&self.config_path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("reload failed, keeping previous config: {}", e);
                return;
            }
        };
        let configs = match settings.mirror_configs() {
            Ok(configs) => configs,
            Err(e) => {
                error!("reload failed, keeping previous config: {}", e);
                return;
            }
        };
        self.settings = settings;

        for cfg in configs {
            let name = cfg.name.clone();
            if self.mirrors.get(&name) == Some(&cfg) {
                continue;
            }
            let upstream = cfg.upstream_url.clone().unwrap_or_default();
            self.mirrors.insert(name.clone(), cfg);

            if self.workers.contains_key(&name) {
                if force {
                    self.stop_worker(&name);
                    if let Err(e) = self.start_worker(&name) {
                        error!(mirror = %name, "failed to restart worker: {}", e);
                    }
                } else if let Some(handle) = self.workers.get_mut(&name) {
                    handle.draining = true;
                    if handle.inbound.send(WorkerControl::Terminate).await.is_err() {
                        warn!(mirror = %name, "worker control channel closed");
                    } else {
                        info!(mirror = %name, "new configuration queued");
                    }
                }
            } else {
                info!(mirror = %name, "new mirror");
                if let Err(e) = self.start_worker(&name) {
                    error!(mirror = %name, "failed to start worker: {}", e);
                }
            }

            self.status.refresh(&name, upstream);
        }
    }

    /// Cancel every worker and wait (bounded) for them to exit.
    async fn terminate_all(&mut self) {
        info!("terminating workers");
        for handle in self.workers.values() {
            handle.cancel.cancel();
        }
        for (name, handle) in self.workers.drain() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle.join).await.is_err() {
                warn!(mirror = %name, "worker did not exit within grace period");
            }
        }
        info!("Good Bye");
    }

    #[cfg(test)]
    pub(crate) fn worker_id(&self, name: &str) -> Option<u64> {
        self.workers.get(name).map(|h| h.id)
    }

    #[cfg(test)]
    pub(crate) fn has_worker(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Receive and handle one bus event (test event-loop step).
    #[cfg(test)]
    pub(crate) async fn pump_one(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
