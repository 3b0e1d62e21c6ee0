//! # Status: Per-Worker Status Records in the Shared Store
//!
//! Each worker owns exactly one status document and overwrites it in place
//! (last write wins, no history). Solver chatter can run to many lines per
//! second, so writes go through [`StatusWriter`], which drops updates that
//! arrive sooner than the minimum interval after the previous attempt.
//!
//! Write failures are logged and swallowed: a missed status update never
//! stops a search. Readers get [`StatusRead`], where a document that cannot
//! be parsed (typically a concurrent write on a store without atomic
//! replace) is `Unavailable` rather than an error.

use crate::bigint;
use crate::range::WorkerRange;
use crate::store::{keys, Store};
use crate::timestamp::{self, iso8601, RateLimit};
use chrono::{DateTime, Utc};
use rug::Integer;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

/// Minimum spacing between status writes from one worker.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: u32,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    pub status_line: String,
    #[serde(default)]
    pub work_file: String,
    #[serde(with = "bigint::hex_string")]
    pub range_start: Integer,
    #[serde(with = "bigint::hex_string")]
    pub range_end: Integer,
}

impl WorkerStatus {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        timestamp::is_live(self.timestamp, now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusRead {
    /// No status document has ever been written.
    NotStarted,
    /// A document exists but could not be read or parsed right now.
    Unavailable,
    Ready(WorkerStatus),
}

pub fn load(store: &dyn Store, worker_id: u32) -> StatusRead {
    match store.read(&keys::status(worker_id)) {
        Ok(None) => StatusRead::NotStarted,
        Ok(Some(raw)) => match serde_json::from_slice(&raw) {
            Ok(status) => StatusRead::Ready(status),
            Err(_) => StatusRead::Unavailable,
        },
        Err(_) => StatusRead::Unavailable,
    }
}

/// Rate-limited writer for one worker's status document.
pub struct StatusWriter {
    worker_id: u32,
    range_start: Integer,
    range_end: Integer,
    work_file: String,
    limit: RateLimit,
}

impl StatusWriter {
    pub fn new(range: &WorkerRange, work_file: impl Into<String>, interval: Duration) -> Self {
        StatusWriter {
            worker_id: range.worker_id,
            range_start: range.low().clone(),
            range_end: range.high().clone(),
            work_file: work_file.into(),
            limit: RateLimit::new(interval),
        }
    }

    /// True if an update at `now` would pass the rate limit.
    pub fn is_due(&self, now: Instant) -> bool {
        self.limit.is_due(now)
    }

    /// Write a status update unless rate limited. Returns whether a write
    /// succeeded. The limiter advances even when the write fails, so a
    /// broken store is not retried on every line.
    pub fn record(
        &mut self,
        store: &dyn Store,
        status_line: &str,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> bool {
        if !self.limit.try_acquire(now) {
            return false;
        }

        let status = WorkerStatus {
            worker_id: self.worker_id,
            timestamp: wall,
            status_line: status_line.trim().to_string(),
            work_file: self.work_file.clone(),
            range_start: self.range_start.clone(),
            range_end: self.range_end.clone(),
        };
        let written = serde_json::to_vec_pretty(&status)
            .map_err(std::io::Error::from)
            .and_then(|json| store.write(&keys::status(self.worker_id), &json));
        match written {
            Ok(()) => true,
            Err(e) => {
                warn!(worker = self.worker_id, error = %e, "Failed to update status");
                false
            }
        }
    }
}
