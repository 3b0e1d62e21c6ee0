//! # Main: CLI Entry Point
//!
//! Routes subcommands to the execution functions in `cli.rs`. Handles the
//! shared concerns: `.env` loading, logging setup, and the puzzle options
//! every subcommand needs.
//!
//! ## Subcommands
//!
//! - `run`: launch the Kangaroo solver for one worker's sub-range and
//!   coordinate it (status, checkpoints, DP merge, solution publication).
//! - `monitor`: live dashboard over all workers.
//! - `stats`: aggregate progress, throughput and ETA from checkpoints.
//! - `ranges`: print the deterministic partition.
//!
//! ## Global Options
//!
//! - `--data-dir` / `POUCH_DATA_DIR`: shared store root (default `.`).
//! - `--puzzle` / `PUZZLE_NUMBER`: searches `[2^(n-1), 2^n - 1]` (default 135).
//! - `--target` / `TARGET_PUBLIC_KEY`: compressed or uncompressed public key.
//! - `--workers` / `NUM_WORKERS`: total worker count (default 1).

mod cli;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pouch::config::DEFAULT_TARGET;
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "pouch",
    about = "Coordinate distributed Kangaroo searches for Bitcoin puzzle keys"
)]
struct Cli {
    /// Shared data directory holding work, checkpoint, DP and result files
    #[arg(long, env = "POUCH_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Puzzle number n; the key lies in [2^(n-1), 2^n - 1]
    #[arg(long, env = "PUZZLE_NUMBER", default_value_t = 135)]
    puzzle: u32,

    /// Target public key (hex, compressed or uncompressed)
    #[arg(long, env = "TARGET_PUBLIC_KEY", default_value = DEFAULT_TARGET)]
    target: String,

    /// Total number of workers sharing the interval
    #[arg(long, env = "NUM_WORKERS", default_value_t = 1)]
    workers: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Kangaroo solver for one worker's sub-range
    Run(RunArgs),
    /// Live dashboard of worker status and distinguished points
    Monitor {
        /// Seconds between refreshes
        #[arg(long, default_value_t = 10)]
        refresh: u64,
    },
    /// Aggregate progress, speed and completion estimates from checkpoints
    Stats {
        /// Also print per-worker details
        #[arg(long)]
        details: bool,
    },
    /// Print each worker's sub-range
    Ranges,
}

#[derive(Args)]
struct RunArgs {
    /// This worker's index in [0, workers)
    #[arg(long, env = "WORKER_ID", default_value_t = 0)]
    worker_id: u32,

    /// Distinguished point bits passed to the solver
    #[arg(long, env = "DP_BITS", default_value_t = 18)]
    dp_bits: u32,

    /// Seconds between solver work-file saves (also the checkpoint cadence)
    #[arg(long, env = "WORK_SAVE_INTERVAL", default_value_t = 60)]
    save_interval: u64,

    /// Use the GPU solver mode
    #[arg(long, env = "GPU_ENABLED", value_parser = clap::builder::FalseyValueParser::new())]
    gpu: bool,

    /// GPU device index in GPU mode
    #[arg(long, env = "GPU_DEVICE", default_value_t = 0)]
    gpu_device: u32,

    /// CPU threads in CPU mode (defaults to all logical cores)
    #[arg(long, env = "SOLVER_THREADS")]
    threads: Option<usize>,

    /// Path to the Kangaroo binary
    #[arg(long, env = "KANGAROO_BINARY", default_value = pouch::config::DEFAULT_SOLVER_BINARY)]
    kangaroo_binary: PathBuf,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shipping, human-readable otherwise
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => {
            let code = cli::run_worker(&cli, args)?;
            std::process::exit(code);
        }
        Commands::Monitor { refresh } => cli::run_monitor(&cli, *refresh),
        Commands::Stats { details } => cli::run_stats(&cli, *details),
        Commands::Ranges => cli::run_ranges(&cli),
    }
}
