//! Worker loop integration tests against fake solvers.
//!
//! Each test writes a `/bin/sh` script that behaves like a fragment of a
//! Kangaroo run (banner, progress redraws, a found key, an early exit) and
//! drives it through `worker::run` on a real filesystem store.

#![cfg(unix)]

mod common;

use pouch::config::DEFAULT_TARGET;
use pouch::range::partition;
use pouch::solution::{self, Arbitration, SolutionArbiter};
use pouch::status::{self, StatusRead};
use pouch::store::{keys, FsStore, Store};
use pouch::worker::{self, WorkerOutcome};
use pouch::{checkpoint, config::PuzzleConfig};
use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const PROGRESS: &str = "[1.20 MK/s][GPU 0.00 MK/s][Count 2^10.00][Dead 0][01s (Avg 3.0s)][0.1/0.2MB]";

// --- Found key ---

#[test]
fn found_key_is_published_and_solver_stopped() {
    let _guard = common::script_lock();
    let dir = tempfile::tempdir().unwrap();
    let script = common::write_script(
        dir.path(),
        "kangaroo",
        &format!(
            "echo 'Kangaroo v2.2'\n\
             printf '{progress}\\r'\n\
             echo 'Key# 0 [1S]Pub:  0x{target}'\n\
             echo '       Priv: 0x800ABC'\n\
             exec sleep 30",
            progress = PROGRESS,
            target = DEFAULT_TARGET.to_uppercase(),
        ),
    );
    let store = FsStore::new(dir.path().join("data"));
    let cfg = common::worker_config(script, 2, 0);
    let stop = AtomicBool::new(false);

    let started = Instant::now();
    let outcome = worker::run(&store, &cfg, &stop).unwrap();
    assert!(started.elapsed() < Duration::from_secs(20), "solver was not stopped");

    match &outcome {
        WorkerOutcome::Found {
            record,
            arbitration,
        } => {
            assert_eq!(record.private_key, "0x800abc");
            assert_eq!(record.worker_id, 0);
            assert!(!record.range_anomaly);
            assert_eq!(*arbitration, Some(Arbitration::Won));
        }
        other => panic!("expected Found, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 0);

    let canonical = solution::load_canonical(&store).unwrap();
    assert_eq!(canonical.private_key, "0x800abc");
    assert_eq!(canonical.public_key, DEFAULT_TARGET);
    assert!(canonical.raw_private_key.is_none());
    assert!(store.exists(keys::SOLUTION_TXT).unwrap());
    assert!(store.exists(&keys::candidate_json(0)).unwrap());

    // The progress line arrived before the key.
    assert!(matches!(status::load(&store, 0), StatusRead::Ready(_)));
    assert_eq!(checkpoint::load(&store, 0).unwrap().keys_checked, 1024);
}

#[test]
fn second_finder_leaves_canonical_record_alone() {
    let _guard = common::script_lock();
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path().join("data"));
    let first = common::write_script(dir.path(), "first", "echo 'Priv: 0x800001'");
    let second = common::write_script(dir.path(), "second", "echo 'Priv: 0xC00002'");
    let stop = AtomicBool::new(false);

    let a = worker::run(&store, &common::worker_config(first, 2, 0), &stop).unwrap();
    let b = worker::run(&store, &common::worker_config(second, 2, 1), &stop).unwrap();

    assert!(matches!(
        a,
        WorkerOutcome::Found {
            arbitration: Some(Arbitration::Won),
            ..
        }
    ));
    assert!(matches!(
        b,
        WorkerOutcome::Found {
            arbitration: Some(Arbitration::AlreadyResolved),
            ..
        }
    ));
    assert_eq!(b.exit_code(), 0);
    assert_eq!(solution::load_canonical(&store).unwrap().worker_id, 0);
    assert!(store.exists(&keys::candidate_json(1)).unwrap());
}

#[test]
fn malformed_key_line_does_not_end_the_run() {
    let _guard = common::script_lock();
    let dir = tempfile::tempdir().unwrap();
    let script = common::write_script(
        dir.path(),
        "kangaroo",
        "echo 'Priv: 0xZZZZ'\necho 'Priv: 0x9ABCDE'",
    );
    let store = FsStore::new(dir.path().join("data"));
    let stop = AtomicBool::new(false);
    let outcome = worker::run(&store, &common::worker_config(script, 1, 0), &stop).unwrap();
    match outcome {
        WorkerOutcome::Found { record, .. } => assert_eq!(record.private_key, "0x9abcde"),
        other => panic!("expected Found, got {:?}", other),
    }
}

// --- Exit and cancellation ---

#[test]
fn solver_exit_without_result() {
    let _guard = common::script_lock();
    let dir = tempfile::tempdir().unwrap();
    let script = common::write_script(
        dir.path(),
        "kangaroo",
        &format!("echo '{}'\nexit 3", PROGRESS),
    );
    let store = FsStore::new(dir.path().join("data"));
    let stop = AtomicBool::new(false);
    let outcome = worker::run(&store, &common::worker_config(script, 1, 0), &stop).unwrap();

    assert_eq!(outcome, WorkerOutcome::Exited(Some(3)));
    assert_eq!(outcome.exit_code(), 1);
    assert!(!store.exists(keys::SOLUTION_JSON).unwrap());
    match status::load(&store, 0) {
        StatusRead::Ready(s) => assert_eq!(s.status_line, PROGRESS),
        other => panic!("expected Ready, got {:?}", other),
    }
}

#[test]
fn stop_flag_cancels_running_solver() {
    let _guard = common::script_lock();
    let dir = tempfile::tempdir().unwrap();
    let script = common::write_script(dir.path(), "kangaroo", "exec sleep 30");
    let store = FsStore::new(dir.path().join("data"));
    let stop = Arc::new(AtomicBool::new(false));

    let setter = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        setter.store(true, std::sync::atomic::Ordering::Relaxed);
    });

    let started = Instant::now();
    let outcome = worker::run(&store, &common::worker_config(script, 1, 0), &stop).unwrap();
    handle.join().unwrap();

    assert_eq!(outcome, WorkerOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn stop_flag_cancels_solver_after_output_closes() {
    let _guard = common::script_lock();
    let dir = tempfile::tempdir().unwrap();
    let script = common::write_script(
        dir.path(),
        "kangaroo",
        "echo 'Kangaroo v2.2'\nexec sleep 30 >/dev/null 2>&1",
    );
    let store = FsStore::new(dir.path().join("data"));
    let stop = Arc::new(AtomicBool::new(false));

    let setter = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        setter.store(true, std::sync::atomic::Ordering::Relaxed);
    });

    let started = Instant::now();
    let outcome = worker::run(&store, &common::worker_config(script, 1, 0), &stop).unwrap();
    handle.join().unwrap();

    assert_eq!(outcome, WorkerOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
}

// --- Launch ---

#[test]
fn input_descriptor_and_resume_flag() {
    let _guard = common::script_lock();
    let dir = tempfile::tempdir().unwrap();
    let args_log = dir.path().join("args.txt");
    let script = common::write_script(
        dir.path(),
        "kangaroo",
        &format!("echo \"$@\" > '{}'", args_log.display()),
    );
    let store = FsStore::new(dir.path().join("data"));
    let cfg = common::worker_config(script, 2, 1);
    let stop = AtomicBool::new(false);

    worker::run(&store, &cfg, &stop).unwrap();
    let fresh = fs::read_to_string(&args_log).unwrap();
    assert!(fresh.starts_with("-t 2 -d 12 -w "), "args: {}", fresh);
    assert!(!fresh.contains("-i "));
    assert!(fresh.contains("-wi 1"));

    let input = store.read(&keys::input_file(1)).unwrap().unwrap();
    let input = String::from_utf8(input).unwrap();
    let lines: Vec<&str> = input.lines().collect();
    assert_eq!(lines, vec!["C00000", "FFFFFF", DEFAULT_TARGET]);

    store.write(&keys::work_file(1), b"opaque").unwrap();
    worker::run(&store, &cfg, &stop).unwrap();
    let resumed = fs::read_to_string(&args_log).unwrap();
    assert!(resumed.contains("-i "), "args: {}", resumed);
    assert_eq!(store.read(&keys::work_file(1)).unwrap().unwrap(), b"opaque");
}

// --- Arbitration race ---

#[test]
fn concurrent_publishers_produce_one_canonical_record() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let puzzle = PuzzleConfig::new(24, DEFAULT_TARGET).unwrap();
    let workers = 8u32;
    let barrier = Arc::new(Barrier::new(workers as usize));

    let handles: Vec<_> = (0..workers)
        .map(|id| {
            let root = root.clone();
            let puzzle = puzzle.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = FsStore::new(root);
                let range = partition(puzzle.interval(), workers, id).unwrap();
                let raw = format!("0x{:X}", range.low().to_u64().unwrap() + 7);
                let arbiter = SolutionArbiter::new(&puzzle, range, keys::work_file(id));
                let candidate = arbiter.parse(&raw).unwrap();
                let record = arbiter.record_for(&candidate, chrono::Utc::now());
                barrier.wait();
                (id, arbiter.publish(&store, &record).unwrap())
            })
        })
        .collect();

    let results: Vec<(u32, Arbitration)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<u32> = results
        .iter()
        .filter(|(_, a)| *a == Arbitration::Won)
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(winners.len(), 1, "results: {:?}", results);

    let store = FsStore::new(&root);
    let canonical = solution::load_canonical(&store).unwrap();
    assert_eq!(canonical.worker_id, winners[0]);
    for id in 0..workers {
        assert!(store.exists(&keys::candidate_json(id)).unwrap());
    }
}
