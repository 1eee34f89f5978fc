// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mirsync_core::JobContext;
use std::path::Path;
use std::time::Instant;
use tokio::time::timeout;

fn config_text(dir: &Path, command: &str, interval: u64, extra_mirrors: &str) -> String {
    format!(
        r#"
[global]
mirror_root = "{root}"
local_dir = "{{mirror_root}}/{{mirror_name}}"
log_dir = "{root}/logs"
concurrent = 2
interval = {interval}
max_retry = 1
status_file = "{root}/status.json"
ctrl_addr = "{root}/ctrl.sock"

[[mirrors]]
name = "m"
provider = "shell"
command = "{command}"
{extra_mirrors}
"#,
        root = dir.display(),
    )
}

fn supervisor_in(dir: &Path, command: &str, interval: u64) -> Supervisor {
    let config_path = dir.join("mirsync.toml");
    std::fs::write(&config_path, config_text(dir, command, interval, "")).unwrap();
    let settings = Settings::load(&config_path).unwrap();
    Supervisor::new(settings, config_path).unwrap()
}

fn no_kwargs() -> serde_json::Map<String, serde_json::Value> {
    serde_json::Map::new()
}

/// Pump bus events until `done` returns true or the timeout expires.
async fn pump_until(
    sup: &mut Supervisor,
    deadline: Duration,
    mut done: impl FnMut(&Supervisor) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done(sup) {
            return true;
        }
        let _ = timeout(Duration::from_millis(200), sup.pump_one()).await;
    }
    done(sup)
}

#[tokio::test]
async fn control_commands_manage_the_worker_table() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "sleep 30", 60);

    assert_eq!(sup.handle_command("start", "m", &no_kwargs()).await, "Started Job: m");
    assert!(sup.has_worker("m"));
    assert_eq!(sup.handle_command("start", "m", &no_kwargs()).await, "m already running");

    let first_id = sup.worker_id("m").unwrap();
    assert_eq!(sup.handle_command("restart", "m", &no_kwargs()).await, "Restarted Job: m");
    assert_ne!(sup.worker_id("m").unwrap(), first_id, "restart must spawn a fresh worker");

    assert_eq!(sup.handle_command("stop", "m", &no_kwargs()).await, "Stopped Job: m");
    assert!(!sup.has_worker("m"));
    assert_eq!(sup.handle_command("stop", "m", &no_kwargs()).await, "m not running");
    assert_eq!(sup.handle_command("restart", "m", &no_kwargs()).await, "m not running");
}

#[tokio::test]
async fn invalid_target_and_command_replies() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "true", 60);

    assert_eq!(sup.handle_command("start", "nope", &no_kwargs()).await, "Invalid target");
    assert_eq!(sup.handle_command("frobnicate", "m", &no_kwargs()).await, "Invalid command");
    assert_eq!(sup.handle_command("frobnicate", "__ALL__", &no_kwargs()).await, "Invalid command");
}

#[tokio::test]
async fn stop_marks_the_mirror_paused() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "sleep 30", 60);

    sup.handle_command("start", "m", &no_kwargs()).await;
    sup.handle_command("stop", "m", &no_kwargs()).await;

    let line = sup.handle_command("status", "m", &no_kwargs()).await;
    assert!(line.contains("paused"), "got: {line}");
}

#[tokio::test]
async fn status_updates_flow_into_the_store() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "true", 60);

    sup.handle_event(Event::Update {
        mirror: "m".to_string(),
        status: MirrorStatus::Syncing,
        ctx: JobContext::new("m", "/srv/m"),
    })
    .await;

    let line = sup.handle_command("status", "m", &no_kwargs()).await;
    assert!(line.contains("syncing"), "got: {line}");

    let table = sup.handle_command("status", "__ALL__", &no_kwargs()).await;
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 3, "header + separator + one mirror:\n{table}");
}

#[tokio::test]
async fn reload_with_equal_config_keeps_the_worker() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "sleep 30", 60);
    sup.start_worker("m").unwrap();
    let id = sup.worker_id("m").unwrap();

    sup.reload(false).await;
    assert_eq!(sup.worker_id("m"), Some(id), "deep-equal reload must not restart");

    sup.reload(true).await;
    assert_eq!(sup.worker_id("m"), Some(id), "even a forced one");
}

#[tokio::test]
async fn soft_reload_drains_then_respawns_on_ack() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "true", 60);
    sup.start_worker("m").unwrap();
    let id = sup.worker_id("m").unwrap();

    // change the interval so the config is no longer deep-equal
    let config_path = tmp.path().join("mirsync.toml");
    std::fs::write(&config_path, config_text(tmp.path(), "true", 30, "")).unwrap();
    sup.reload(false).await;

    let respawned = pump_until(&mut sup, Duration::from_secs(10), |s| {
        s.worker_id("m").is_some_and(|current| current != id)
    })
    .await;
    assert!(respawned, "drained worker must be replaced after its ack");
}

#[tokio::test]
async fn force_reload_replaces_the_worker_immediately() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "sleep 30", 60);
    sup.start_worker("m").unwrap();
    let id = sup.worker_id("m").unwrap();

    let config_path = tmp.path().join("mirsync.toml");
    std::fs::write(&config_path, config_text(tmp.path(), "sleep 30", 30, "")).unwrap();
    sup.reload(true).await;

    let new_id = sup.worker_id("m").unwrap();
    assert_ne!(new_id, id);

    // the killed worker's stray ack must not spawn yet another worker
    pump_until(&mut sup, Duration::from_secs(2), |_| false).await;
    assert_eq!(sup.worker_id("m"), Some(new_id));
}

#[tokio::test]
async fn reload_starts_workers_for_new_mirrors() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "true", 60);
    sup.start_worker("m").unwrap();

    let extra = r#"
[[mirrors]]
name = "m2"
provider = "shell"
command = "true"
"#;
    let config_path = tmp.path().join("mirsync.toml");
    std::fs::write(&config_path, config_text(tmp.path(), "true", 60, extra)).unwrap();
    sup.reload(false).await;

    assert!(sup.has_worker("m2"), "new mirror gets a worker");
    assert!(sup.handle_command("status", "__ALL__", &no_kwargs()).await.contains("m2"));
}

#[tokio::test]
async fn broken_reload_keeps_previous_config() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "sleep 30", 60);
    sup.start_worker("m").unwrap();
    let id = sup.worker_id("m").unwrap();

    let config_path = tmp.path().join("mirsync.toml");
    std::fs::write(&config_path, "this is not toml [[[").unwrap();
    sup.reload(false).await;

    assert_eq!(sup.worker_id("m"), Some(id), "broken config must change nothing");
    assert_eq!(sup.handle_command("start", "m", &no_kwargs()).await, "m already running");
}

#[tokio::test]
async fn run_serves_commands_until_shutdown() {
    let tmp = tempfile::tempdir().unwrap();
    let sup = supervisor_in(tmp.path(), "true", 60);
    let events = sup.event_sender();
    let shutdown = sup.shutdown_token();
    let join = tokio::spawn(sup.run());

    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    events
        .send(Event::Command {
            op: "status".to_string(),
            target: "__ALL__".to_string(),
            kwargs: no_kwargs(),
            reply: reply_tx,
        })
        .await
        .unwrap();
    let table = timeout(Duration::from_secs(5), reply_rx).await.unwrap().unwrap();
    assert!(table.contains("NAME"), "got: {table}");
    assert!(table.contains('m'), "configured mirror listed: {table}");

    shutdown.cancel();
    timeout(Duration::from_secs(15), join).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn log_command_resolves_from_ctx_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sup = supervisor_in(tmp.path(), "true", 60);

    assert_eq!(sup.handle_command("log", "m", &no_kwargs()).await, "/dev/null");

    let mut ctx = JobContext::new("m", "/srv/m");
    ctx.log_file = Some(tmp.path().join("m_x.log"));
    ctx.log_link = Some(tmp.path().join("latest"));
    sup.handle_event(Event::Update {
        mirror: "m".to_string(),
        status: MirrorStatus::Success,
        ctx,
    })
    .await;

    assert_eq!(
        sup.handle_command("log", "m", &no_kwargs()).await,
        tmp.path().join("latest").display().to_string()
    );
}
