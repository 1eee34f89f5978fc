// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-mirror job worker.
//!
//! One worker task owns one mirror's sync loop: optional start delay,
//! then iterations of acquire-gate → hook pipeline → interval sleep.
//! The pipeline is a recursive descent over the hook chain so that
//! `after_*` callbacks unwind in strict reverse order of their
//! `before_*` counterparts, no matter where a stage failed.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use mirsync_core::{JobContext, MirrorStatus};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventTx, WorkerControl};
use crate::hooks::JobHook;
use crate::provider::Provider;

/// Everything a worker needs to run one mirror.
pub struct JobSpec {
    pub name: String,
    pub local_dir: PathBuf,
    pub interval: Duration,
    pub delay: Duration,
    pub max_retry: u32,
    pub provider: Box<dyn Provider>,
    pub hooks: Vec<Box<dyn JobHook>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct JobWorker {
    id: u64,
    spec: JobSpec,
    semaphore: Arc<Semaphore>,
    inbound: mpsc::Receiver<WorkerControl>,
    events: EventTx,
    cancel: CancellationToken,
}

impl JobWorker {
    pub fn new(
        id: u64,
        spec: JobSpec,
        semaphore: Arc<Semaphore>,
        inbound: mpsc::Receiver<WorkerControl>,
        events: EventTx,
        cancel: CancellationToken,
    ) -> Self {
        JobWorker { id, spec, semaphore, inbound, events, cancel }
    }

    /// Worker task body. Runs until terminated or cancelled, then acks
    /// and returns.
    pub async fn run(mut self) {
        if !self.spec.delay.is_zero() {
            debug!(mirror = %self.spec.name, delay = ?self.spec.delay, "delaying first sync");
            if self.sleep_or_quit(self.spec.delay).await == Flow::Quit {
                self.ack_quit().await;
                return;
            }
        }

        loop {
            let mut ctx = JobContext::new(self.spec.name.clone(), self.spec.local_dir.clone());
            self.emit(MirrorStatus::PreSyncing, &ctx).await;

            let permit = tokio::select! {
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
                message = self.inbound.recv() => {
                    debug!(mirror = %self.spec.name, ?message, "terminated while waiting for a slot");
                    break;
                }
                _ = self.cancel.cancelled() => break,
            };

            info!(mirror = %self.spec.name, "start syncing");
            let status = self.run_pipeline(&mut ctx).await;
            self.emit(status, &ctx).await;
            drop(permit);
            info!(mirror = %self.spec.name, %status, "syncing finished");

            if self.cancel.is_cancelled() {
                break;
            }
            if self.sleep_or_quit(self.spec.interval).await == Flow::Quit {
                break;
            }
        }

        self.ack_quit().await;
    }

    /// Sleep up to `duration`, waking early on a terminate request or
    /// cancellation.
    async fn sleep_or_quit(&mut self, duration: Duration) -> Flow {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Flow::Continue,
            message = self.inbound.recv() => match message {
                Some(WorkerControl::Terminate) | None => Flow::Quit,
            },
            _ = self.cancel.cancelled() => Flow::Quit,
        }
    }

    /// Run the four-stage pipeline: job hooks wrap the retry loop,
    /// exec hooks wrap each transfer attempt.
    async fn run_pipeline(&self, ctx: &mut JobContext) -> MirrorStatus {
        self.job_hook(0, ctx).await
    }

    /// Stage 1: descend through `before_job`s, ascend through
    /// `after_job`s. Boxed future because the recursion depth follows
    /// the hook chain.
    fn job_hook<'a>(
        &'a self,
        index: usize,
        ctx: &'a mut JobContext,
    ) -> Pin<Box<dyn Future<Output = MirrorStatus> + Send + 'a>> {
        Box::pin(async move {
            if index == self.spec.hooks.len() {
                return self.set_retry(ctx).await;
            }
            let hook = &self.spec.hooks[index];

            let status = match hook.before_job(ctx).await {
                Ok(()) => self.job_hook(index + 1, ctx).await,
                Err(e) => {
                    warn!(mirror = %self.spec.name, hook = hook.name(), "before_job failed: {}", e);
                    MirrorStatus::Fail
                }
            };

            if let Err(e) = hook.after_job(status, ctx).await {
                warn!(mirror = %self.spec.name, hook = hook.name(), "after_job failed: {}", e);
            }
            status
        })
    }

    /// Stage 2: retry loop around the exec-hook descent.
    async fn set_retry(&self, ctx: &mut JobContext) -> MirrorStatus {
        let mut status = MirrorStatus::Fail;
        for attempt in 0..self.spec.max_retry {
            self.emit(MirrorStatus::Syncing, ctx).await;
            status = self.exec_hook(0, ctx).await;
            if status.is_success() || self.cancel.is_cancelled() {
                break;
            }
            if attempt + 1 < self.spec.max_retry {
                warn!(mirror = %self.spec.name, attempt, "sync failed, retrying");
            }
        }
        status
    }

    /// Stage 3: exec hooks, unwinding like the job hooks.
    fn exec_hook<'a>(
        &'a self,
        index: usize,
        ctx: &'a mut JobContext,
    ) -> Pin<Box<dyn Future<Output = MirrorStatus> + Send + 'a>> {
        Box::pin(async move {
            if index == self.spec.hooks.len() {
                return self.exec(ctx).await;
            }
            let hook = &self.spec.hooks[index];

            let status = match hook.before_exec(ctx).await {
                Ok(()) => self.exec_hook(index + 1, ctx).await,
                Err(e) => {
                    warn!(mirror = %self.spec.name, hook = hook.name(), "before_exec failed: {}", e);
                    MirrorStatus::Fail
                }
            };

            if let Err(e) = hook.after_exec(status, ctx).await {
                warn!(mirror = %self.spec.name, hook = hook.name(), "after_exec failed: {}", e);
            }
            status
        })
    }

    /// Stage 4: the transfer itself.
    async fn exec(&self, ctx: &mut JobContext) -> MirrorStatus {
        match self.spec.provider.run(ctx, &self.cancel).await {
            Ok(0) => MirrorStatus::Success,
            Ok(code) => {
                warn!(mirror = %self.spec.name, code, "provider exited with failure");
                MirrorStatus::Fail
            }
            Err(e) => {
                warn!(mirror = %self.spec.name, "provider failed to run: {}", e);
                MirrorStatus::Fail
            }
        }
    }

    async fn emit(&self, status: MirrorStatus, ctx: &JobContext) {
        let event = Event::Update {
            mirror: self.spec.name.clone(),
            status,
            ctx: ctx.clone(),
        };
        if self.events.send(event).await.is_err() {
            debug!(mirror = %self.spec.name, "event bus closed");
        }
    }

    async fn ack_quit(&self) {
        let event = Event::ConfigAck { mirror: self.spec.name.clone(), worker_id: self.id };
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
