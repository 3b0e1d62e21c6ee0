//! CLI integration tests using assert_cmd.
//!
//! No solver binary is needed: `run` is only exercised up to its
//! pre-launch checks.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

#[allow(deprecated)]
fn pouch() -> Command {
    let mut cmd = Command::cargo_bin("pouch").unwrap();
    for var in [
        "PUZZLE_NUMBER",
        "TARGET_PUBLIC_KEY",
        "NUM_WORKERS",
        "WORKER_ID",
        "POUCH_DATA_DIR",
        "KANGAROO_BINARY",
        "GPU_ENABLED",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

// --- Help ---

#[test]
fn help_shows_all_subcommands() {
    pouch().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("monitor"))
            .and(predicate::str::contains("stats"))
            .and(predicate::str::contains("ranges")),
    );
}

#[test]
fn help_run_shows_solver_options() {
    pouch()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--worker-id")
                .and(predicate::str::contains("--dp-bits"))
                .and(predicate::str::contains("--save-interval"))
                .and(predicate::str::contains("--gpu"))
                .and(predicate::str::contains("--kangaroo-binary")),
        );
}

// --- Ranges ---

#[test]
fn ranges_prints_partition() {
    pouch()
        .args(["--puzzle", "20", "--workers", "4", "ranges"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Worker 0: 0x80000 to 0x9ffff")
                .and(predicate::str::contains("Worker 3: 0xe0000 to 0xfffff"))
                .and(predicate::str::contains("131,072 keys")),
        );
}

#[test]
fn ranges_reads_environment() {
    pouch()
        .env("PUZZLE_NUMBER", "8")
        .env("NUM_WORKERS", "3")
        .arg("ranges")
        .assert()
        .success()
        .stdout(predicate::str::contains("Worker 2: 0xd4 to 0xff"));
}

#[test]
fn too_many_workers_is_a_config_error() {
    pouch()
        .args(["--puzzle", "2", "--workers", "5", "ranges"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn bad_target_is_rejected() {
    pouch()
        .args(["--target", "02abc", "ranges"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("target public key"));
}

// --- Run ---

#[test]
fn run_rejects_out_of_range_worker() {
    pouch()
        .args(["--workers", "2", "run", "--worker-id", "2"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("worker id 2 out of range"));
}

#[test]
fn run_without_solver_reports_missing_dependency() {
    let dir = tempfile::tempdir().unwrap();
    pouch()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["run", "--kangaroo-binary"])
        .arg(dir.path().join("kangaroo"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("solver binary not found").and(predicate::str::contains("make")));
}

// --- Stats ---

#[test]
fn stats_without_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    pouch()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoint data found"));
}

#[test]
fn stats_reports_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("checkpoints")).unwrap();
    fs::write(
        dir.path().join("checkpoints/worker_0.json"),
        r#"{
            "worker_id": 0,
            "keys_checked": "4096",
            "current_key": "0x81000",
            "start_key": "0x80000",
            "end_key": "0xfffff",
            "timestamp": "2025-01-01T00:00:00+00:00",
            "progress_percent": 0.78125,
            "started_at": "2024-12-31T23:00:00+00:00"
        }"#,
    )
    .unwrap();
    pouch()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["--puzzle", "20", "stats", "--details"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Bitcoin Puzzle 20 - Detailed Statistics")
                .and(predicate::str::contains("4,096"))
                .and(predicate::str::contains("Worker 0:"))
                .and(predicate::str::contains("Current Key:    0x81000")),
        );
}
