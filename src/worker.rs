//! # Worker: Single-Threaded Coordination Loop for One Solver
//!
//! Owns one [`SolverProcess`] and routes every output line through the pure
//! classifier:
//!
//! - found-value lines are parsed and published via the arbiter, then the
//!   solver is stopped whatever the arbitration result;
//! - progress lines update the rate-limited status document and, when they
//!   carry an operation count, the checkpoint;
//! - everything else is only echoed to the log.
//!
//! The distinguished point merge runs on the same thread whenever enough
//! time has passed since the previous one. The loop waits on the line
//! channel with a short timeout, which is also where it notices the stop
//! flag set by the signal handler. Once the solver closes its output the
//! loop polls for exit at the same interval, still honoring the flag.

use crate::checkpoint::CheckpointWriter;
use crate::classify::{self, LineKind};
use crate::config::{PuzzleConfig, SolverSettings};
use crate::dp::{DpMerger, MergeLimits, MERGE_INTERVAL};
use crate::error::Result;
use crate::range::WorkerRange;
use crate::solution::{Arbitration, SolutionArbiter, SolutionRecord};
use crate::solver::{NextLine, SolverProcess, TERMINATION_GRACE};
use crate::status::{StatusWriter, STATUS_INTERVAL};
use crate::store::{keys, FsStore, Store};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub puzzle: PuzzleConfig,
    pub range: WorkerRange,
    pub solver: SolverSettings,
    pub merge_limits: MergeLimits,
    pub merge_interval: Duration,
    pub status_interval: Duration,
    /// How long to wait for a line before re-checking the stop flag.
    pub poll_interval: Duration,
    pub termination_grace: Duration,
}

impl WorkerConfig {
    pub fn new(puzzle: PuzzleConfig, range: WorkerRange, solver: SolverSettings) -> Self {
        WorkerConfig {
            puzzle,
            range,
            solver,
            merge_limits: MergeLimits::default(),
            merge_interval: MERGE_INTERVAL,
            status_interval: STATUS_INTERVAL,
            poll_interval: Duration::from_millis(250),
            termination_grace: TERMINATION_GRACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEffect {
    Found(SolutionRecord),
    Progress,
    /// Found-value marker with unparseable text.
    Rejected,
    Ignored,
}

/// Per-line side effects, independent of the child process.
pub struct LineHandler<'a> {
    store: &'a dyn Store,
    worker_id: u32,
    status: StatusWriter,
    checkpoints: CheckpointWriter,
    arbiter: SolutionArbiter,
    merger: DpMerger,
}

impl<'a> LineHandler<'a> {
    pub fn new(store: &'a dyn Store, cfg: &WorkerConfig, now: Instant, wall: DateTime<Utc>) -> Self {
        let work_file = keys::work_file(cfg.range.worker_id);
        LineHandler {
            store,
            worker_id: cfg.range.worker_id,
            status: StatusWriter::new(&cfg.range, work_file.clone(), cfg.status_interval),
            checkpoints: CheckpointWriter::resume(
                store,
                cfg.range.clone(),
                cfg.solver.save_interval,
                wall,
            ),
            arbiter: SolutionArbiter::new(&cfg.puzzle, cfg.range.clone(), work_file),
            merger: DpMerger::new(cfg.merge_limits, cfg.merge_interval, now),
        }
    }

    pub fn handle(&mut self, line: &str, now: Instant, wall: DateTime<Utc>) -> LineEffect {
        match classify::classify(line) {
            LineKind::Candidate(raw) => match self.arbiter.parse(raw) {
                Ok(candidate) => {
                    info!(
                        worker = self.worker_id,
                        raw = %candidate.raw,
                        "PRIVATE KEY FOUND"
                    );
                    LineEffect::Found(self.arbiter.record_for(&candidate, wall))
                }
                Err(e) => {
                    error!(worker = self.worker_id, error = %e, "Invalid private key format");
                    LineEffect::Rejected
                }
            },
            LineKind::Progress => {
                self.status.record(self.store, line, now, wall);
                if let Some(ops) = classify::parse_progress(line).operations() {
                    self.checkpoints.record(self.store, ops, now, wall);
                }
                LineEffect::Progress
            }
            LineKind::Ignored => LineEffect::Ignored,
        }
    }

    /// Time-driven work between lines.
    pub fn tick(&mut self, now: Instant, wall: DateTime<Utc>) {
        self.merger.maybe_merge(self.store, now, wall);
    }

    pub fn publish(&self, record: &SolutionRecord) -> Result<Arbitration> {
        self.arbiter.publish(self.store, record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// The solver reported a key. `arbitration` is `None` if publishing
    /// failed; the key is still in the log.
    Found {
        record: SolutionRecord,
        arbitration: Option<Arbitration>,
    },
    /// The solver exited without a result.
    Exited(Option<i32>),
    Cancelled,
}

impl WorkerOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerOutcome::Found { .. } => 0,
            _ => 1,
        }
    }
}

/// Launch the solver for `cfg.range` and drive it until it reports a key,
/// exits, or `stop` is set.
pub fn run(store: &FsStore, cfg: &WorkerConfig, stop: &AtomicBool) -> Result<WorkerOutcome> {
    let worker = cfg.range.worker_id;
    info!(
        worker,
        range = %cfg.range.interval,
        target = %cfg.puzzle.target_public_key,
        dp_bits = cfg.solver.dp_bits,
        work_file = %keys::work_file(worker),
        "Starting worker"
    );

    let mut process = SolverProcess::launch(store, &cfg.solver, &cfg.puzzle, &cfg.range)?;
    let mut handler = LineHandler::new(store, cfg, Instant::now(), Utc::now());

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(cancel(&mut process, cfg));
        }

        match process.next_line(cfg.poll_interval) {
            NextLine::Line(line) => {
                info!(worker, "{}", line);
                if let LineEffect::Found(record) = handler.handle(&line, Instant::now(), Utc::now())
                {
                    let arbitration = match handler.publish(&record) {
                        Ok(a) => Some(a),
                        Err(e) => {
                            error!(
                                worker,
                                key = %record.private_key,
                                error = %e,
                                "Failed to publish solution"
                            );
                            None
                        }
                    };
                    if let Err(e) = process.terminate(cfg.termination_grace) {
                        warn!(worker, error = %e, "Failed to stop solver");
                    }
                    return Ok(WorkerOutcome::Found {
                        record,
                        arbitration,
                    });
                }
            }
            NextLine::Idle => {}
            NextLine::Closed => break,
        }
        handler.tick(Instant::now(), Utc::now());
    }

    // Output closed, but the process may still be running.
    let code = loop {
        if let Some(status) = process.try_wait()? {
            break status.code();
        }
        if stop.load(Ordering::Relaxed) {
            return Ok(cancel(&mut process, cfg));
        }
        thread::sleep(cfg.poll_interval);
    };
    match code {
        Some(0) => info!(worker, "Solver completed without a result"),
        Some(c) => warn!(worker, code = c, "Solver exited with nonzero status"),
        None => warn!(worker, "Solver terminated by signal"),
    }
    Ok(WorkerOutcome::Exited(code))
}

fn cancel(process: &mut SolverProcess, cfg: &WorkerConfig) -> WorkerOutcome {
    let worker = cfg.range.worker_id;
    info!(worker, "Shutdown requested, stopping solver");
    if let Err(e) = process.terminate(cfg.termination_grace) {
        warn!(worker, error = %e, "Failed to stop solver");
    }
    WorkerOutcome::Cancelled
}
