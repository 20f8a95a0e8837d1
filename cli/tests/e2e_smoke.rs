//! ABOUTME: End-to-end smoke test for the runjob binary
//! ABOUTME: Exercises process exit codes against a real SQLite-backed run

use std::process::Command;
use std::time::Duration;
use tempfile::tempdir;

fn runjob() -> Command {
    Command::new(env!("CARGO_BIN_EXE_runjob"))
}

#[test]
fn helloworld_run_once_exits_success() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("jobslib.db");

    let output = runjob()
        .args(["helloworld", "--run-once", "--db-path"])
        .arg(&db_path)
        .output()
        .expect("spawn runjob");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Hello World!"));
}

#[test]
fn unknown_task_exits_with_argument_error() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("jobslib.db");

    let output = runjob()
        .args(["not-a-real-task", "--run-once", "--db-path"])
        .arg(&db_path)
        .output()
        .expect("spawn runjob");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn check_liveness_fails_before_any_job_has_run() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("jobslib.db");

    let output = runjob()
        .args(["check-liveness", "--max-age", "60", "--db-path"])
        .arg(&db_path)
        .output()
        .expect("spawn runjob");

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn check_liveness_succeeds_after_a_successful_run() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("jobslib.db");

    let run = runjob()
        .args(["helloworld", "--run-once", "--db-path"])
        .arg(&db_path)
        .output()
        .expect("spawn runjob");
    assert!(run.status.success());

    let check = runjob()
        .args(["check-liveness", "--max-age", "60", "--db-path"])
        .arg(&db_path)
        .output()
        .expect("spawn runjob");
    assert!(check.status.success());
}

#[test]
fn contended_lock_still_exits_success_in_one_shot_mode() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("jobslib.db");

    // `oneinstance` without --run-once holds the lease for a while; a
    // second one-shot invocation against the same key should see the
    // lock as held and exit 0 without running the body.
    let mut holder = runjob()
        .args(["oneinstance", "--db-path"])
        .arg(&db_path)
        .spawn()
        .expect("spawn holder");

    std::thread::sleep(Duration::from_millis(200));

    let contended = runjob()
        .args(["oneinstance", "--run-once", "--db-path"])
        .arg(&db_path)
        .output()
        .expect("spawn contended runjob");
    assert!(contended.status.success());

    holder.kill().ok();
    holder.wait().ok();
}
