//! # CLI Execution Functions
//!
//! Kept out of `main.rs` so the entry point stays small. One function per
//! subcommand, plus the shutdown-signal thread shared by `run` and `monitor`.

use anyhow::{Context, Result};
use chrono::Utc;
use pouch::config::{DeviceMode, PuzzleConfig, SolverSettings};
use pouch::store::FsStore;
use pouch::worker::{self, WorkerConfig, WorkerOutcome};
use pouch::{bigint, checkpoint, monitor, range, stats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{Cli, RunArgs};

fn puzzle(cli: &Cli) -> Result<PuzzleConfig> {
    Ok(PuzzleConfig::new(cli.puzzle, &cli.target)?)
}

/// Flag set once on SIGINT or SIGTERM.
fn install_stop_handler() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    std::thread::spawn(move || {
        let sig_rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "Signal handler unavailable");
                return;
            }
        };
        sig_rt.block_on(async {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        tokio::select! {
                            _ = ctrl_c => {},
                            _ = sigterm.recv() => {},
                        }
                    }
                    Err(_) => {
                        let _ = ctrl_c.await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            stop_flag.store(true, Ordering::Relaxed);
        });
    });
    stop
}

// ── Worker ──────────────────────────────────────────────────────

/// Run one worker to completion. Returns the process exit code: 0 when this
/// worker found the key, 1 otherwise.
pub fn run_worker(cli: &Cli, args: &RunArgs) -> Result<i32> {
    let puzzle = puzzle(cli)?;
    let range = range::partition(puzzle.interval(), cli.workers, args.worker_id)?;

    let mode = if args.gpu {
        DeviceMode::Gpu {
            device: args.gpu_device,
        }
    } else {
        let threads = args.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        DeviceMode::Cpu { threads }
    };
    let solver = SolverSettings {
        binary: args.kangaroo_binary.clone(),
        dp_bits: args.dp_bits,
        save_interval: Duration::from_secs(args.save_interval),
        mode,
    };
    solver.validate()?;

    let store = FsStore::new(&cli.data_dir);
    let cfg = WorkerConfig::new(puzzle, range, solver);
    let stop = install_stop_handler();

    let outcome = worker::run(&store, &cfg, &stop)
        .with_context(|| format!("worker {} failed", args.worker_id))?;

    match &outcome {
        WorkerOutcome::Found {
            record,
            arbitration,
        } => info!(
            worker = args.worker_id,
            key = %record.private_key,
            arbitration = ?arbitration,
            "Worker finished with a key"
        ),
        WorkerOutcome::Exited(code) => info!(worker = args.worker_id, code = ?code, "Solver exited"),
        WorkerOutcome::Cancelled => info!(worker = args.worker_id, "Worker stopped"),
    }
    Ok(outcome.exit_code())
}

// ── Monitor ─────────────────────────────────────────────────────

pub fn run_monitor(cli: &Cli, refresh_secs: u64) -> Result<()> {
    let puzzle = puzzle(cli)?;
    let store = FsStore::new(&cli.data_dir);
    let stop = install_stop_handler();
    let refresh = Duration::from_secs(refresh_secs.max(1));
    monitor::run(&store, &puzzle, cli.workers, refresh, &stop)?;
    Ok(())
}

// ── Stats ───────────────────────────────────────────────────────

pub fn run_stats(cli: &Cli, details: bool) -> Result<()> {
    let puzzle = puzzle(cli)?;
    let store = FsStore::new(&cli.data_dir);
    let checkpoints = checkpoint::load_all(&store, cli.workers);
    if checkpoints.is_empty() {
        println!("\nNo checkpoint data found. Start the solver first!\n");
        return Ok(());
    }
    let summary = stats::Statistics::compute(&checkpoints, puzzle.interval(), Utc::now());
    print!("{}", stats::render_report(&summary, puzzle.puzzle_number));
    if details {
        print!("{}", stats::render_details(&checkpoints));
    }
    Ok(())
}

// ── Ranges ──────────────────────────────────────────────────────

pub fn run_ranges(cli: &Cli) -> Result<()> {
    let puzzle = puzzle(cli)?;
    let ranges = range::partition_all(puzzle.interval(), cli.workers)?;
    println!(
        "Puzzle {}: {} ({} keys, {} workers)",
        puzzle.puzzle_number,
        puzzle.interval(),
        bigint::with_commas(&puzzle.interval().span()),
        cli.workers
    );
    for r in &ranges {
        println!(
            "Worker {}: {} ({} keys)",
            r.worker_id,
            r.interval,
            bigint::with_commas(&r.interval.span())
        );
    }
    Ok(())
}
