// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn recording_command(out: &std::path::Path) -> String {
    format!(
        "sh -c 'echo \"$TUNASYNC_MIRROR_NAME $TUNASYNC_WORKING_DIR $TUNASYNC_JOB_EXIT_STATUS\" > {}'",
        out.display()
    )
}

#[tokio::test]
async fn pre_sync_runs_in_before_job_without_status() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let hook = CmdExecHook::new(&recording_command(&out), ExecAt::PreSync).unwrap();

    let mut ctx = JobContext::new("debian", "/srv/debian");
    hook.before_job(&mut ctx).await.unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap().trim_end(), "debian /srv/debian");

    // post side of the pair is a no-op
    std::fs::remove_file(&out).unwrap();
    hook.after_job(MirrorStatus::Success, &mut ctx).await.unwrap();
    assert!(!out.exists());
}

#[tokio::test]
async fn post_sync_runs_in_after_job_with_status() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let hook = CmdExecHook::new(&recording_command(&out), ExecAt::PostSync).unwrap();

    let mut ctx = JobContext::new("debian", "/srv/debian");
    hook.before_job(&mut ctx).await.unwrap();
    assert!(!out.exists(), "pre side of the pair must be a no-op");

    hook.after_job(MirrorStatus::Fail, &mut ctx).await.unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap().trim_end(), "debian /srv/debian fail");
}

#[tokio::test]
async fn nonzero_exit_is_an_error() {
    let hook = CmdExecHook::new("sh -c 'exit 7'", ExecAt::PreSync).unwrap();
    let mut ctx = JobContext::new("debian", "/srv/debian");
    let err = hook.before_job(&mut ctx).await.unwrap_err();
    assert!(matches!(err, HookError::CommandFailed(7)));
}

#[test]
fn unbalanced_quotes_are_a_construction_error() {
    let err = CmdExecHook::new("echo 'unterminated", ExecAt::PreSync).unwrap_err();
    assert!(matches!(err, HookError::BadCommand(_)));
}

#[test]
fn empty_command_is_rejected() {
    assert!(CmdExecHook::new("", ExecAt::PostSync).is_err());
}
