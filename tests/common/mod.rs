//! Shared test helpers for integration tests.
//!
//! Fake solvers are small `/bin/sh` scripts standing in for Kangaroo. They
//! print whatever lines a test needs and exit.

#![allow(dead_code)]

use pouch::config::{DeviceMode, PuzzleConfig, SolverSettings, DEFAULT_TARGET};
use pouch::range::partition;
use pouch::worker::WorkerConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Serializes tests that write and then exec a script. Executing a file while
/// another thread's forked child still holds it open for writing fails with
/// ETXTBSY.
static SCRIPT_LOCK: Mutex<()> = Mutex::new(());

pub fn script_lock() -> MutexGuard<'static, ()> {
    SCRIPT_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

/// Write an executable shell script at `dir/name` with the given body.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// Worker config for puzzle 24 split across `num_workers`, driving `binary`.
pub fn worker_config(binary: PathBuf, num_workers: u32, worker_id: u32) -> WorkerConfig {
    let puzzle = PuzzleConfig::new(24, DEFAULT_TARGET).unwrap();
    let range = partition(puzzle.interval(), num_workers, worker_id).unwrap();
    let solver = SolverSettings {
        binary,
        dp_bits: 12,
        save_interval: Duration::from_secs(1),
        mode: DeviceMode::Cpu { threads: 2 },
    };
    let mut cfg = WorkerConfig::new(puzzle, range, solver);
    cfg.poll_interval = Duration::from_millis(50);
    cfg.termination_grace = Duration::from_secs(2);
    cfg
}
