//! CLI integration tests for keylock
//!
//! Tests the keylock CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a command with an isolated config directory
#[allow(deprecated)]
fn keylock_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("keylock").unwrap();
    cmd.env("KEYLOCK_CONFIG_DIR", config_dir.path());
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_simulate_text_output() {
    let temp_dir = TempDir::new().unwrap();

    keylock_cmd(&temp_dir)
        .args(["simulate", "--tasks", "12", "--keys", "3", "--hold-ms", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulated 12 tasks over 3 keys"))
        .stdout(predicate::str::contains("completed: 12"))
        .stdout(predicate::str::contains("overlaps:  0"));
}

#[test]
fn test_simulate_json_output_with_batches() {
    let temp_dir = TempDir::new().unwrap();

    keylock_cmd(&temp_dir)
        .args([
            "simulate", "--tasks", "10", "--keys", "4", "--batch", "2", "--hold-ms", "1", "--format",
            "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"completed\": 10"))
        .stdout(predicate::str::contains("\"batch\": 2"))
        .stdout(predicate::str::contains("\"overlaps\": 0"));
}

#[test]
fn test_simulate_reports_rejections() {
    let temp_dir = TempDir::new().unwrap();

    // one holder, one waiter, the rest refused at admission
    keylock_cmd(&temp_dir)
        .args([
            "simulate", "--tasks", "10", "--keys", "1", "--hold-ms", "200", "--max-pending", "1",
            "--format", "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"completed\": 2"))
        .stdout(predicate::str::contains("\"rejected\": 8"));
}

#[test]
fn test_simulate_reports_timeouts() {
    let temp_dir = TempDir::new().unwrap();

    keylock_cmd(&temp_dir)
        .args([
            "simulate", "--tasks", "3", "--keys", "1", "--hold-ms", "100", "--timeout-ms", "1",
            "--format", "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"completed\": 1"))
        .stdout(predicate::str::contains("\"timed_out\": 2"));
}

#[test]
fn test_simulate_uses_configured_max_pending() {
    let temp_dir = TempDir::new().unwrap();

    keylock_cmd(&temp_dir)
        .args(["config", "set", "lock.max_pending", "1"])
        .assert()
        .success();

    keylock_cmd(&temp_dir)
        .args([
            "simulate", "--tasks", "4", "--keys", "1", "--hold-ms", "200", "--format", "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rejected\": 2"));
}

#[test]
fn test_simulate_rejects_zero_keys() {
    let temp_dir = TempDir::new().unwrap();

    keylock_cmd(&temp_dir)
        .args(["simulate", "--keys", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1"));
}

#[test]
fn test_config_set_get_list_reset() {
    let temp_dir = TempDir::new().unwrap();

    keylock_cmd(&temp_dir)
        .args(["config", "set", "lock.timeout_ms", "250"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set lock.timeout_ms = 250"));

    keylock_cmd(&temp_dir)
        .args(["config", "get", "lock.timeout_ms"])
        .assert()
        .success()
        .stdout(predicate::str::diff("250\n"));

    keylock_cmd(&temp_dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lock.timeout_ms = 250"))
        .stdout(predicate::str::contains("lock.max_pending = 1000"));

    keylock_cmd(&temp_dir)
        .args(["config", "reset"])
        .assert()
        .success();

    keylock_cmd(&temp_dir)
        .args(["config", "get", "lock.timeout_ms"])
        .assert()
        .success()
        .stdout(predicate::str::diff("0\n"));
}

#[test]
fn test_config_rejects_invalid_values() {
    let temp_dir = TempDir::new().unwrap();

    keylock_cmd(&temp_dir)
        .args(["config", "set", "lock.max_pending", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive integer"));

    keylock_cmd(&temp_dir)
        .args(["config", "get", "lock.unknown"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_config_path_honours_override() {
    let temp_dir = TempDir::new().unwrap();

    keylock_cmd(&temp_dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains(
            temp_dir.path().to_string_lossy().into_owned(),
        ));
}
