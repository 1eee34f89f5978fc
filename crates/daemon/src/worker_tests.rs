// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::{self, EventRx};
use crate::hooks::HookError;
use crate::provider::ProviderError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::timeout;

type Log = Arc<Mutex<Vec<String>>>;

/// Provider that pops a scripted exit code per attempt and records its
/// execution (and the number of concurrent executions) for assertions.
struct ScriptedProvider {
    codes: Mutex<VecDeque<i32>>,
    run_time: Duration,
    log: Log,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    fn new(codes: &[i32], log: Log) -> Self {
        ScriptedProvider {
            codes: Mutex::new(codes.iter().copied().collect()),
            run_time: Duration::ZERO,
            log,
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        _ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<i32, ProviderError> {
        self.log.lock().unwrap().push("exec".to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let cancelled = if self.run_time.is_zero() {
            cancel.is_cancelled()
        } else {
            tokio::select! {
                _ = tokio::time::sleep(self.run_time) => false,
                _ = cancel.cancelled() => true,
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        if cancelled {
            return Ok(-1);
        }
        Ok(self.codes.lock().unwrap().pop_front().unwrap_or(0))
    }
}

/// Hook that records every callback, optionally failing one of them.
struct RecorderHook {
    label: &'static str,
    log: Log,
    fail_before_job: bool,
    fail_before_exec: bool,
}

impl RecorderHook {
    fn new(label: &'static str, log: Log) -> Self {
        RecorderHook { label, log, fail_before_job: false, fail_before_exec: false }
    }

    fn record(&self, method: &str, status: Option<MirrorStatus>) {
        let entry = match status {
            Some(status) => format!("{}:{}:{}", self.label, method, status),
            None => format!("{}:{}", self.label, method),
        };
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl JobHook for RecorderHook {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn before_job(&self, _ctx: &mut JobContext) -> Result<(), HookError> {
        self.record("before_job", None);
        if self.fail_before_job {
            return Err(HookError::CommandFailed(1));
        }
        Ok(())
    }

    async fn before_exec(&self, _ctx: &mut JobContext) -> Result<(), HookError> {
        self.record("before_exec", None);
        if self.fail_before_exec {
            return Err(HookError::CommandFailed(1));
        }
        Ok(())
    }

    async fn after_exec(&self, status: MirrorStatus, _ctx: &mut JobContext) -> Result<(), HookError> {
        self.record("after_exec", Some(status));
        Ok(())
    }

    async fn after_job(&self, status: MirrorStatus, _ctx: &mut JobContext) -> Result<(), HookError> {
        self.record("after_job", Some(status));
        Ok(())
    }
}

struct TestWorker {
    control: mpsc::Sender<WorkerControl>,
    events: EventRx,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

fn spawn_worker(
    provider: ScriptedProvider,
    hooks: Vec<Box<dyn JobHook>>,
    max_retry: u32,
    delay: Duration,
    semaphore: Arc<Semaphore>,
) -> TestWorker {
    let (events_tx, events) = bus::channel();
    let (control, inbound) = mpsc::channel(4);
    let cancel = CancellationToken::new();

    let spec = JobSpec {
        name: "m".to_string(),
        local_dir: PathBuf::from("/srv/m"),
        interval: Duration::from_secs(3600),
        delay,
        max_retry,
        provider: Box::new(provider),
        hooks,
    };
    let worker = JobWorker::new(1, spec, semaphore, inbound, events_tx, cancel.clone());
    let join = tokio::spawn(worker.run());

    TestWorker { control, events, cancel, join }
}

async fn next_update(events: &mut EventRx) -> (MirrorStatus, JobContext) {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("bus closed");
        match event {
            Event::Update { status, ctx, .. } => return (status, ctx),
            Event::ConfigAck { .. } => panic!("unexpected ack"),
            Event::Command { .. } => unreachable!(),
        }
    }
}

async fn statuses_until_terminal(events: &mut EventRx) -> Vec<MirrorStatus> {
    let mut seen = Vec::new();
    loop {
        let (status, _) = next_update(events).await;
        seen.push(status);
        if matches!(status, MirrorStatus::Success | MirrorStatus::Fail) {
            return seen;
        }
    }
}

#[tokio::test]
async fn hooks_unwind_in_reverse_order() {
    let log: Log = Arc::default();
    let hooks: Vec<Box<dyn JobHook>> = vec![
        Box::new(RecorderHook::new("a", Arc::clone(&log))),
        Box::new(RecorderHook::new("b", Arc::clone(&log))),
    ];
    let provider = ScriptedProvider::new(&[0], Arc::clone(&log));
    let mut w = spawn_worker(provider, hooks, 1, Duration::ZERO, Arc::new(Semaphore::new(1)));

    let seen = statuses_until_terminal(&mut w.events).await;
    assert_eq!(seen.last(), Some(&MirrorStatus::Success));

    w.cancel.cancel();
    w.join.await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(
        entries,
        [
            "a:before_job",
            "b:before_job",
            "a:before_exec",
            "b:before_exec",
            "exec",
            "b:after_exec:success",
            "a:after_exec:success",
            "b:after_job:success",
            "a:after_job:success",
        ]
    );
}

#[tokio::test]
async fn failing_before_job_gets_its_after_job_and_skips_inner_hooks() {
    let log: Log = Arc::default();
    let mut failing = RecorderHook::new("b", Arc::clone(&log));
    failing.fail_before_job = true;
    let hooks: Vec<Box<dyn JobHook>> = vec![
        Box::new(RecorderHook::new("a", Arc::clone(&log))),
        Box::new(failing),
    ];
    let provider = ScriptedProvider::new(&[0], Arc::clone(&log));
    let mut w = spawn_worker(provider, hooks, 3, Duration::ZERO, Arc::new(Semaphore::new(1)));

    let seen = statuses_until_terminal(&mut w.events).await;
    assert_eq!(seen, [MirrorStatus::PreSyncing, MirrorStatus::Fail]);

    w.cancel.cancel();
    w.join.await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(
        entries,
        ["a:before_job", "b:before_job", "b:after_job:fail", "a:after_job:fail"],
        "transfer must not run and each started hook unwinds exactly once"
    );
}

#[tokio::test]
async fn failing_before_exec_fails_each_attempt_but_still_unwinds() {
    let log: Log = Arc::default();
    let mut failing = RecorderHook::new("b", Arc::clone(&log));
    failing.fail_before_exec = true;
    let hooks: Vec<Box<dyn JobHook>> = vec![
        Box::new(RecorderHook::new("a", Arc::clone(&log))),
        Box::new(failing),
    ];
    let provider = ScriptedProvider::new(&[0], Arc::clone(&log));
    let mut w = spawn_worker(provider, hooks, 2, Duration::ZERO, Arc::new(Semaphore::new(1)));

    let seen = statuses_until_terminal(&mut w.events).await;
    assert_eq!(
        seen,
        [MirrorStatus::PreSyncing, MirrorStatus::Syncing, MirrorStatus::Syncing, MirrorStatus::Fail]
    );

    w.cancel.cancel();
    w.join.await.unwrap();

    let entries = log.lock().unwrap().clone();
    let attempt = ["a:before_exec", "b:before_exec", "b:after_exec:fail", "a:after_exec:fail"];
    let mut expected = vec!["a:before_job", "b:before_job"];
    expected.extend(attempt);
    expected.extend(attempt);
    expected.extend(["b:after_job:fail", "a:after_job:fail"]);
    assert_eq!(entries, expected, "no exec entry: the transfer never started");
}

#[tokio::test]
async fn retries_emit_one_syncing_update_per_attempt() {
    let log: Log = Arc::default();
    let provider = ScriptedProvider::new(&[1, 1, 0], Arc::clone(&log));
    let mut w = spawn_worker(provider, Vec::new(), 3, Duration::ZERO, Arc::new(Semaphore::new(1)));

    let seen = statuses_until_terminal(&mut w.events).await;
    assert_eq!(
        seen,
        [
            MirrorStatus::PreSyncing,
            MirrorStatus::Syncing,
            MirrorStatus::Syncing,
            MirrorStatus::Syncing,
            MirrorStatus::Success,
        ]
    );

    w.cancel.cancel();
    w.join.await.unwrap();
}

#[tokio::test]
async fn retries_stop_at_max_retry() {
    let log: Log = Arc::default();
    let provider = ScriptedProvider::new(&[1, 1, 1, 1], Arc::clone(&log));
    let mut w = spawn_worker(provider, Vec::new(), 2, Duration::ZERO, Arc::new(Semaphore::new(1)));

    let seen = statuses_until_terminal(&mut w.events).await;
    assert_eq!(
        seen,
        [
            MirrorStatus::PreSyncing,
            MirrorStatus::Syncing,
            MirrorStatus::Syncing,
            MirrorStatus::Fail,
        ]
    );

    w.cancel.cancel();
    w.join.await.unwrap();
}

#[tokio::test]
async fn concurrent_transfers_never_exceed_the_gate() {
    let semaphore = Arc::new(Semaphore::new(2));
    let log: Log = Arc::default();
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for _ in 0..3 {
        let mut provider = ScriptedProvider::new(&[0, 0, 0, 0], Arc::clone(&log));
        provider.run_time = Duration::from_millis(100);
        provider.running = Arc::clone(&running);
        provider.max_running = Arc::clone(&max_running);
        workers.push(spawn_worker(
            provider,
            Vec::new(),
            1,
            Duration::ZERO,
            Arc::clone(&semaphore),
        ));
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    for w in &workers {
        w.cancel.cancel();
    }
    for w in workers {
        w.join.await.unwrap();
    }

    let peak = max_running.load(Ordering::SeqCst);
    assert!(peak <= 2, "gate breached: {peak} concurrent transfers");
    assert_eq!(peak, 2, "with three eager workers both slots should fill");
}

#[tokio::test]
async fn terminate_during_interval_sleep_acks_and_exits() {
    let log: Log = Arc::default();
    let provider = ScriptedProvider::new(&[0], Arc::clone(&log));
    let mut w = spawn_worker(provider, Vec::new(), 1, Duration::ZERO, Arc::new(Semaphore::new(1)));

    let seen = statuses_until_terminal(&mut w.events).await;
    assert_eq!(seen.last(), Some(&MirrorStatus::Success));

    w.control.send(WorkerControl::Terminate).await.unwrap();

    let event = timeout(Duration::from_secs(5), w.events.recv()).await.unwrap().unwrap();
    assert!(
        matches!(event, Event::ConfigAck { ref mirror, worker_id: 1 } if mirror == "m"),
        "expected quit ack, got {event:?}"
    );
    w.join.await.unwrap();
}

#[tokio::test]
async fn terminate_during_start_delay_skips_the_first_sync() {
    let log: Log = Arc::default();
    let provider = ScriptedProvider::new(&[0], Arc::clone(&log));
    let mut w = spawn_worker(
        provider,
        Vec::new(),
        1,
        Duration::from_secs(30),
        Arc::new(Semaphore::new(1)),
    );

    w.control.send(WorkerControl::Terminate).await.unwrap();

    let event = timeout(Duration::from_secs(5), w.events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, Event::ConfigAck { .. }), "got {event:?}");
    w.join.await.unwrap();
    assert!(log.lock().unwrap().is_empty(), "no sync may run during the delay");
}

#[tokio::test]
async fn cancellation_mid_transfer_fails_the_run_and_still_unwinds() {
    let log: Log = Arc::default();
    let hooks: Vec<Box<dyn JobHook>> =
        vec![Box::new(RecorderHook::new("a", Arc::clone(&log)))];
    let mut provider = ScriptedProvider::new(&[0], Arc::clone(&log));
    provider.run_time = Duration::from_secs(30);
    let mut w = spawn_worker(provider, hooks, 3, Duration::ZERO, Arc::new(Semaphore::new(1)));

    // wait until the transfer is underway
    let (status, _) = next_update(&mut w.events).await;
    assert_eq!(status, MirrorStatus::PreSyncing);
    let (status, _) = next_update(&mut w.events).await;
    assert_eq!(status, MirrorStatus::Syncing);
    tokio::time::sleep(Duration::from_millis(50)).await;

    w.cancel.cancel();

    let (status, _) = next_update(&mut w.events).await;
    assert_eq!(status, MirrorStatus::Fail, "terminated transfer reports fail");

    let event = timeout(Duration::from_secs(5), w.events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, Event::ConfigAck { .. }), "got {event:?}");
    w.join.await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(
        entries,
        [
            "a:before_job",
            "a:before_exec",
            "exec",
            "a:after_exec:fail",
            "a:after_job:fail",
        ],
        "hooks unwind even when the transfer was terminated"
    );
}

#[tokio::test]
async fn each_iteration_gets_a_fresh_context() {
    let log: Log = Arc::default();
    let provider = ScriptedProvider::new(&[0], Arc::clone(&log));
    let mut w = spawn_worker(provider, Vec::new(), 1, Duration::ZERO, Arc::new(Semaphore::new(1)));

    let (_, ctx) = next_update(&mut w.events).await;
    assert_eq!(ctx.mirror_name, "m");
    assert_eq!(ctx.current_dir, PathBuf::from("/srv/m"));
    assert!(ctx.log_file.is_none(), "fresh ctx must not inherit a log file");

    w.cancel.cancel();
    w.join.await.unwrap();
}
