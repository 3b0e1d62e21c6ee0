//! # Stats: Aggregate Progress, Throughput, and ETA
//!
//! A pure function over the current checkpoint snapshots. Progress is kept as
//! an exact `rug::Rational` because `keys_checked / 2^134` underflows any
//! float long before it reaches a meaningful value; floats only appear at the
//! presentation edge.
//!
//! Throughput is total keys checked divided by time since the earliest
//! observed start across all snapshots. A completion estimate too large for
//! a structured duration is reported in years instead.

use crate::bigint;
use crate::checkpoint::Checkpoint;
use crate::range::SearchInterval;
use crate::timestamp;
use chrono::{DateTime, Utc};
use rug::{Integer, Rational};
use std::fmt::{self, Write as _};
use std::time::Duration;

pub const SECONDS_PER_HOUR: f64 = 3600.0;
pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const SECONDS_PER_YEAR: f64 = 365.25 * SECONDS_PER_DAY;

/// Estimates beyond this many seconds are reported in years.
pub const MAX_ETA_SECS: f64 = 86_400.0 * 999_999_999.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    Unknown,
    Duration(Duration),
    Years(f64),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Unknown => write!(f, "Unknown"),
            Eta::Years(y) => write!(f, "{:.2e} years", y),
            Eta::Duration(d) => {
                let secs = d.as_secs();
                let days = secs / 86_400;
                let rem = secs % 86_400;
                let hms = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
                match days {
                    0 => write!(f, "{}", hms),
                    1 => write!(f, "1 day, {}", hms),
                    n => write!(f, "{} days, {}", n, hms),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Statistics {
    pub total_keys: Integer,
    pub total_keys_checked: Integer,
    pub total_workers: usize,
    pub active_workers: usize,
    /// `checked / total`, exact.
    pub progress: Rational,
    pub keys_per_second: f64,
    pub eta: Eta,
}

impl Statistics {
    pub fn compute(checkpoints: &[Checkpoint], interval: &SearchInterval, now: DateTime<Utc>) -> Self {
        let total_keys = interval.span();
        let total_workers = checkpoints.len();
        let total_keys_checked = checkpoints
            .iter()
            .fold(Integer::new(), |acc, cp| acc + &cp.keys_checked);
        let active_workers = checkpoints
            .iter()
            .filter(|cp| timestamp::is_live(cp.timestamp, now))
            .count();
        let progress = Rational::from((total_keys_checked.clone(), total_keys.clone()));

        let keys_per_second = checkpoints
            .iter()
            .map(Checkpoint::start_time)
            .min()
            .and_then(|earliest| (now - earliest).to_std().ok())
            .map(|elapsed| elapsed.as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map(|secs| total_keys_checked.to_f64() / secs)
            .unwrap_or(0.0);

        let remaining = Integer::from(&total_keys - &total_keys_checked).max(Integer::new());
        let eta = estimate(&remaining, keys_per_second);

        Statistics {
            total_keys,
            total_keys_checked,
            total_workers,
            active_workers,
            progress,
            keys_per_second,
            eta,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        (self.progress.clone() * 100u32).to_f64()
    }

    pub fn avg_keys_per_worker(&self) -> Integer {
        if self.total_workers == 0 {
            return Integer::new();
        }
        Integer::from(&self.total_keys_checked / self.total_workers as u64)
    }

    /// Percent chance of hitting the key within `window` at current speed,
    /// assuming a uniformly random key.
    pub fn probability_within(&self, window_secs: f64) -> f64 {
        let total = self.total_keys.to_f64();
        if total <= 0.0 {
            return 0.0;
        }
        (self.keys_per_second * window_secs / total * 100.0).min(100.0)
    }

    pub fn years_remaining(&self) -> Option<f64> {
        if self.keys_per_second <= 0.0 {
            return None;
        }
        // Operation counts can exceed the interval size; remaining work never goes negative.
        let remaining = Integer::from(&self.total_keys - &self.total_keys_checked).max(Integer::new());
        Some(remaining.to_f64() / self.keys_per_second / SECONDS_PER_YEAR)
    }
}

fn estimate(remaining: &Integer, keys_per_second: f64) -> Eta {
    if keys_per_second <= 0.0 || !keys_per_second.is_finite() {
        return Eta::Unknown;
    }
    let secs = remaining.to_f64() / keys_per_second;
    if !secs.is_finite() || secs > MAX_ETA_SECS {
        return Eta::Years(secs / SECONDS_PER_YEAR);
    }
    Eta::Duration(Duration::from_secs(secs as u64))
}

fn commas_f64(x: f64) -> String {
    match Integer::from_f64(x.round()) {
        Some(n) => bigint::with_commas(&n),
        None => format!("{:.0}", x),
    }
}

pub fn render_report(stats: &Statistics, puzzle_number: u32) -> String {
    let rule = "=".repeat(80);
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(out, "Bitcoin Puzzle {} - Detailed Statistics", puzzle_number);
    let _ = writeln!(out, "{}\n", rule);

    let _ = writeln!(out, "Overall Progress:");
    let _ = writeln!(out, "  Total Keys Checked:    {:>25}", bigint::with_commas(&stats.total_keys_checked));
    let _ = writeln!(out, "  Total Keys in Range:   {:>25}", bigint::with_commas(&stats.total_keys));
    let _ = writeln!(out, "  Progress:              {:>24.12}%", stats.progress_percent());
    let _ = writeln!(out);

    let _ = writeln!(out, "Workers:");
    let _ = writeln!(out, "  Total Workers:         {:>25}", stats.total_workers);
    let _ = writeln!(out, "  Active Workers:        {:>25}", stats.active_workers);
    let _ = writeln!(out, "  Avg Keys per Worker:   {:>25}", bigint::with_commas(&stats.avg_keys_per_worker()));
    let _ = writeln!(out);

    let speed = stats.keys_per_second;
    let _ = writeln!(out, "Performance:");
    let _ = writeln!(out, "  Estimated Speed:       {:>25} keys/sec", commas_f64(speed));
    if speed > 0.0 {
        let _ = writeln!(out, "                         {:>25} keys/min", commas_f64(speed * 60.0));
        let _ = writeln!(out, "                         {:>25} keys/hour", commas_f64(speed * SECONDS_PER_HOUR));
        let _ = writeln!(out, "                         {:>25} keys/day", commas_f64(speed * SECONDS_PER_DAY));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Time Estimates:");
    let _ = writeln!(out, "  Est. Completion Time:  {}", stats.eta);
    if let Some(years) = stats.years_remaining() {
        let _ = writeln!(out, "  (Approximately:        {:>25.2e} years)", years);
    }
    let _ = writeln!(out);

    let bits = stats.total_keys.significant_bits().saturating_sub(1);
    let _ = writeln!(out, "Reality Check:");
    let _ = writeln!(out, "  Search Space:          ~2^{} keys", bits);
    let _ = writeln!(out, "  Current Speed:         ~{} keys/second", commas_f64(speed));
    let _ = writeln!(out, "  Probability per Key:   ~{:.2e}", 1.0 / stats.total_keys.to_f64());
    let _ = writeln!(out);

    if speed > 0.0 {
        let _ = writeln!(out, "Probability of Finding Solution:");
        let _ = writeln!(out, "  Next Hour:             {:>25.2e}%", stats.probability_within(SECONDS_PER_HOUR));
        let _ = writeln!(out, "  Next Day:              {:>25.2e}%", stats.probability_within(SECONDS_PER_DAY));
        let _ = writeln!(out, "  Next Year:             {:>25.2e}%", stats.probability_within(SECONDS_PER_YEAR));
    }
    let _ = writeln!(out, "\n{}", rule);
    out
}

/// Per-worker breakdown, ordered by worker id.
pub fn render_details(checkpoints: &[Checkpoint]) -> String {
    let mut out = String::new();
    if checkpoints.is_empty() {
        let _ = writeln!(out, "No checkpoint data available.");
        return out;
    }
    let rule = "=".repeat(80);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Worker Details");
    let _ = writeln!(out, "{}\n", rule);

    let mut sorted: Vec<&Checkpoint> = checkpoints.iter().collect();
    sorted.sort_by_key(|cp| cp.worker_id);
    for cp in sorted {
        let _ = writeln!(out, "Worker {}:", cp.worker_id);
        let _ = writeln!(
            out,
            "  Range:          {} to {}",
            bigint::to_hex(&cp.start_key),
            bigint::to_hex(&cp.end_key)
        );
        let _ = writeln!(out, "  Keys in Range:  {}", bigint::with_commas(&cp.range_size()));
        let _ = writeln!(out, "  Keys Checked:   {}", bigint::with_commas(&cp.keys_checked));
        let _ = writeln!(out, "  Progress:       {:.6}%", cp.progress_percent);
        let _ = writeln!(out, "  Current Key:    {}", bigint::to_hex(&cp.current_key));
        let _ = writeln!(out, "  Last Update:    {}", cp.timestamp.to_rfc3339());
        let _ = writeln!(out);
    }
    out
}
