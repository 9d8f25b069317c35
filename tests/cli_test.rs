// ABOUTME: End-to-end tests of the billing-mirror binary for paths that need no provider
// ABOUTME: Selector validation, local clear and status against a temporary database

use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_billing-mirror"))
        .current_dir(dir)
        .env_remove("BILLING_API_KEY")
        .env_remove("RUST_LOG")
        .arg("--database")
        .arg(dir.join("mirror.db"))
        .args(args)
        .output()
        .expect("failed to run billing-mirror")
}

#[test]
fn unknown_sync_selector_fails_before_any_work() {
    let dir = tempdir().unwrap();
    let output = run(dir.path(), &["sync", "customers", "widgets"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("widgets"), "stderr: {}", stderr);
    assert!(stderr.contains("subscriptions"), "stderr: {}", stderr);
    assert!(!dir.path().join("mirror.db").exists());
}

#[test]
fn sync_without_api_key_is_rejected() {
    let dir = tempdir().unwrap();
    let output = run(dir.path(), &["sync", "plans"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("API key"), "stderr: {}", stderr);
}

#[test]
fn clear_and_status_work_offline() {
    let dir = tempdir().unwrap();

    let cleared = run(dir.path(), &["clear", "--yes"]);
    assert!(cleared.status.success());
    assert!(String::from_utf8_lossy(&cleared.stdout).contains("Removed 0 mirrored rows."));

    let status = run(dir.path(), &["status"]);
    assert!(status.status.success());
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("invoice_line_items"));
    assert!(stdout.contains("never"));
}

#[test]
fn show_rejects_unknown_kinds() {
    let dir = tempdir().unwrap();
    let output = run(dir.path(), &["show", "widget", "w_1"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown entity kind"));
}
