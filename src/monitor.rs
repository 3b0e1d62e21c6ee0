//! # Monitor: Live Terminal Dashboard
//!
//! Read-only view over the shared store: worker status documents, the merged
//! distinguished point count, and the canonical solution. Each refresh takes
//! a [`Snapshot`] and renders it; the loop ends once a solution is published
//! or the stop flag is set. Nothing here writes search state.

use crate::bigint;
use crate::config::PuzzleConfig;
use crate::dp;
use crate::solution::{self, SolutionRecord};
use crate::status::{self, StatusRead};
use crate::store::Store;
use chrono::{DateTime, Utc};
use colored::Colorize;
use rug::Integer;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Range strings longer than this are cut and suffixed with `...`.
const RANGE_DISPLAY_WIDTH: usize = 32;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub puzzle_number: u32,
    pub target_public_key: String,
    pub workers: Vec<(u32, StatusRead)>,
    pub merged_points: u64,
    pub solution: Option<SolutionRecord>,
}

impl Snapshot {
    pub fn capture(
        store: &dyn Store,
        puzzle: &PuzzleConfig,
        num_workers: u32,
        now: DateTime<Utc>,
    ) -> Snapshot {
        let workers = (0..num_workers)
            .map(|id| (id, status::load(store, id)))
            .collect();
        let merged_points = dp::merged_total(store).unwrap_or_else(|e| {
            warn!(error = %e, "Could not read merged distinguished points");
            0
        });
        Snapshot {
            taken_at: now,
            puzzle_number: puzzle.puzzle_number,
            target_public_key: puzzle.target_public_key.clone(),
            workers,
            merged_points,
            solution: solution::load_canonical(store),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|(_, s)| matches!(s, StatusRead::Ready(st) if st.is_active(self.taken_at)))
            .count()
    }
}

fn truncate_range(text: &str) -> String {
    if text.len() > RANGE_DISPLAY_WIDTH {
        format!("{}...", &text[..RANGE_DISPLAY_WIDTH])
    } else {
        text.to_string()
    }
}

pub fn render(snap: &Snapshot) -> String {
    let wide = "=".repeat(100);
    let rule = "-".repeat(110);
    let mut out = String::new();

    let _ = writeln!(out, "{}", wide.magenta().bold());
    let _ = writeln!(
        out,
        "{}",
        format!("Bitcoin Puzzle {} - Kangaroo Solver Monitor", snap.puzzle_number)
            .magenta()
            .bold()
    );
    let _ = writeln!(out, "{}\n", wide.magenta().bold());

    let _ = writeln!(out, "Algorithm: {}", "Pollard's Kangaroo (ECDLP)".yellow());
    let _ = writeln!(out, "Target: {}", snap.target_public_key.yellow());
    let _ = writeln!(
        out,
        "Last Updated: {}\n",
        snap.taken_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan()
    );

    let active = snap.active_workers();
    let ratio = format!("{}/{}", active, snap.workers.len());
    let _ = writeln!(out, "{}", "Overall Statistics:".bold());
    let _ = writeln!(
        out,
        "  Active Workers: {}",
        if active > 0 { ratio.green() } else { ratio.red() }
    );
    let _ = writeln!(
        out,
        "  Distinguished Points Found: {}\n",
        bigint::with_commas(&Integer::from(snap.merged_points)).cyan()
    );

    let _ = writeln!(out, "{}\n", "Worker Details:".bold());
    let _ = writeln!(
        out,
        "{:<10} {:<12} {:<35} {:<35} {:<20}",
        "Worker", "Status", "Range Start", "Range End", "Last Update"
    );
    let _ = writeln!(out, "{}", rule);

    for (id, read) in &snap.workers {
        let label = format!("W-{}", id);
        let (status, start, end, updated) = match read {
            StatusRead::Ready(s) => {
                let status = if s.is_active(snap.taken_at) {
                    format!("{:<12}", "Active").green()
                } else {
                    format!("{:<12}", "Inactive").red()
                };
                (
                    status,
                    truncate_range(&bigint::to_hex(&s.range_start)),
                    truncate_range(&bigint::to_hex(&s.range_end)),
                    s.timestamp.format("%H:%M:%S").to_string(),
                )
            }
            StatusRead::NotStarted => (
                format!("{:<12}", "Not started").red(),
                "N/A".to_string(),
                "N/A".to_string(),
                "Never".to_string(),
            ),
            StatusRead::Unavailable => (
                format!("{:<12}", "Unknown").yellow(),
                "N/A".to_string(),
                "N/A".to_string(),
                "Error".to_string(),
            ),
        };
        let _ = writeln!(
            out,
            "{:<10} {} {:<35} {:<35} {:<20}",
            label, status, start, end, updated
        );
    }
    let _ = writeln!(out, "\n{}", rule);

    let _ = writeln!(out, "\n{}", "Kangaroo Algorithm Info:".bold());
    let _ = writeln!(out, "  - Each worker runs its own herd of kangaroos over a disjoint sub-range");
    let _ = writeln!(out, "  - Distinguished points mark where a kangaroo's path can be recognised again");
    let _ = writeln!(out, "  - A tame/wild collision yields the private key");
    out
}

pub fn render_solution(record: &SolutionRecord) -> String {
    let rule = "=".repeat(80);
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule.green().bold());
    let _ = writeln!(out, "{}", "SOLUTION FOUND!".green().bold());
    let _ = writeln!(out, "{}\n", rule.green().bold());
    let _ = writeln!(out, "Method: {}", record.method);
    let _ = writeln!(out, "Public Key: {}", record.public_key);
    let _ = writeln!(out, "Private Key: {}", record.private_key.yellow().bold());
    let _ = writeln!(out, "Found by Worker: {}", record.worker_id);
    let _ = writeln!(out, "Timestamp: {}", record.found_timestamp.to_rfc3339());
    let _ = writeln!(out, "Work file: {}", record.work_file);
    if record.range_anomaly {
        let _ = writeln!(out, "{}", "Key lies outside the puzzle interval".red());
    }
    let _ = writeln!(out, "\n{}\n", rule.green().bold());
    out
}

/// Refresh until a solution appears or `stop` is set.
pub fn run(
    store: &dyn Store,
    puzzle: &PuzzleConfig,
    num_workers: u32,
    refresh: Duration,
    stop: &AtomicBool,
) -> io::Result<Option<SolutionRecord>> {
    let mut stdout = io::stdout();
    loop {
        let snap = Snapshot::capture(store, puzzle, num_workers, Utc::now());
        write!(stdout, "\x1B[2J\x1B[H")?;
        if let Some(record) = &snap.solution {
            write!(stdout, "{}", render_solution(record))?;
            stdout.flush()?;
            return Ok(Some(record.clone()));
        }
        write!(stdout, "{}", render(&snap))?;
        writeln!(
            stdout,
            "\n{}",
            format!(
                "Refreshing in {} seconds... (Press Ctrl+C to exit)",
                refresh.as_secs()
            )
            .cyan()
        )?;
        stdout.flush()?;

        let deadline = Instant::now() + refresh;
        while Instant::now() < deadline {
            if stop.load(Ordering::Relaxed) {
                writeln!(stdout, "\n{}", "Monitoring stopped by user.".yellow())?;
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(200));
        }
    }
}
