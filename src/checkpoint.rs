//! # Checkpoint: Per-Worker Progress Snapshots for Statistics
//!
//! Independent of the solver's own work file (which is opaque and only ever
//! handed back to the solver for resume), each worker periodically records
//! how far it has come: keys checked, an estimated current position, its
//! range, and when it started. Statistics read these snapshots; nothing else
//! depends on them, and there is no ordering guarantee relative to the
//! status document of the same worker.
//!
//! ## Source of Progress
//!
//! The kangaroo solver reports a total operation count as `Count 2^x`. The
//! snapshot takes `floor(2^x)` as keys checked and places the current key
//! that many keys into the worker's range, capped at the range end.
//!
//! ## Resume
//!
//! [`CheckpointWriter::resume`] keeps the `started_at` of an existing
//! snapshot for the same range, so throughput survives restarts.

use crate::bigint;
use crate::range::WorkerRange;
use crate::store::{keys, Store};
use crate::timestamp::{iso8601, iso8601_opt, RateLimit};
use chrono::{DateTime, Utc};
use rug::{Integer, Rational};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub worker_id: u32,
    #[serde(with = "bigint::decimal_string")]
    pub keys_checked: Integer,
    #[serde(with = "bigint::hex_string")]
    pub current_key: Integer,
    #[serde(with = "bigint::hex_string")]
    pub start_key: Integer,
    #[serde(with = "bigint::hex_string")]
    pub end_key: Integer,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    pub progress_percent: f64,
    #[serde(default, with = "iso8601_opt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Snapshot for `range` after `keys_checked` operations.
    pub fn from_progress(
        range: &WorkerRange,
        keys_checked: Integer,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Checkpoint {
        let span = range.interval.span();
        let last_offset = Integer::from(&span - 1u32);
        let offset = if keys_checked < last_offset {
            keys_checked.clone()
        } else {
            last_offset
        };
        let current_key = Integer::from(range.low() + &offset);
        let fraction = Rational::from((keys_checked.clone(), span));
        let progress_percent = (fraction.to_f64() * 100.0).min(100.0);

        Checkpoint {
            worker_id: range.worker_id,
            keys_checked,
            current_key,
            start_key: range.low().clone(),
            end_key: range.high().clone(),
            timestamp: now,
            progress_percent,
            started_at: Some(started_at),
        }
    }

    /// Keys in this worker's range, `end - start + 1`.
    pub fn range_size(&self) -> Integer {
        Integer::from(&self.end_key - &self.start_key) + 1u32
    }

    /// Earliest known moment this worker was searching.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.timestamp)
    }
}

pub fn save(store: &dyn Store, checkpoint: &Checkpoint) -> crate::Result<()> {
    let json = serde_json::to_vec_pretty(checkpoint)?;
    store.write(&keys::checkpoint(checkpoint.worker_id), &json)?;
    Ok(())
}

/// Last snapshot for `worker_id`; absent or unreadable both give `None`.
pub fn load(store: &dyn Store, worker_id: u32) -> Option<Checkpoint> {
    crate::store::read_json(store, &keys::checkpoint(worker_id))
}

/// Snapshots for workers `0..num_workers`, skipping absent ones and warning
/// about unreadable ones.
pub fn load_all(store: &dyn Store, num_workers: u32) -> Vec<Checkpoint> {
    let mut out = Vec::new();
    for worker_id in 0..num_workers {
        let key = keys::checkpoint(worker_id);
        match store.read(&key) {
            Ok(None) => {}
            Ok(Some(raw)) => match serde_json::from_slice(&raw) {
                Ok(cp) => out.push(cp),
                Err(e) => warn!(worker = worker_id, error = %e, "Could not parse checkpoint"),
            },
            Err(e) => warn!(worker = worker_id, error = %e, "Could not read checkpoint"),
        }
    }
    out
}

/// Rate-limited checkpoint writer for one worker.
pub struct CheckpointWriter {
    range: WorkerRange,
    started_at: DateTime<Utc>,
    limit: RateLimit,
}

impl CheckpointWriter {
    pub fn new(range: WorkerRange, interval: Duration, started_at: DateTime<Utc>) -> Self {
        CheckpointWriter {
            range,
            started_at,
            limit: RateLimit::new(interval),
        }
    }

    /// Like [`new`](Self::new), but inherit `started_at` from an existing
    /// snapshot covering the same range.
    pub fn resume(
        store: &dyn Store,
        range: WorkerRange,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let started_at = load(store, range.worker_id)
            .filter(|cp| cp.start_key == *range.low() && cp.end_key == *range.high())
            .map(|cp| cp.start_time())
            .unwrap_or(now);
        Self::new(range, interval, started_at)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Persist a snapshot unless rate limited. Failures are logged and
    /// swallowed. Returns whether a snapshot was written.
    pub fn record(
        &mut self,
        store: &dyn Store,
        keys_checked: Integer,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> bool {
        if !self.limit.try_acquire(now) {
            return false;
        }
        let cp = Checkpoint::from_progress(&self.range, keys_checked, self.started_at, wall);
        match save(store, &cp) {
            Ok(()) => {
                debug!(
                    worker = cp.worker_id,
                    keys_checked = %cp.keys_checked,
                    progress = format_args!("{:.6}%", cp.progress_percent),
                    "Checkpoint saved"
                );
                true
            }
            Err(e) => {
                warn!(worker = self.range.worker_id, error = %e, "Failed to save checkpoint");
                false
            }
        }
    }
}
