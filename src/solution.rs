//! # Solution: Candidate Validation and Exactly-Once Publication
//!
//! When a worker's solver prints a found-value line, the raw token is
//! validated and published in two steps:
//!
//! 1. A per-worker candidate record (`SOLUTION_FOUND_worker_{i}.json` plus a
//!    text summary) is written. Many of these may exist.
//! 2. The canonical record `SOLUTION.json` is created with the store's
//!    exclusive-create primitive. The first worker to create it wins and also
//!    writes the `SOLUTION.txt` mirror; every later worker sees the existing
//!    record and stops without touching it.
//!
//! A value outside the puzzle interval is still published, flagged with
//! `range_anomaly`, since it points at a solver defect worth looking at.
//! Text that does not parse as hex is a [`PouchError::CandidateFormat`].

use crate::bigint;
use crate::config::PuzzleConfig;
use crate::error::{PouchError, Result};
use crate::range::{SearchInterval, WorkerRange};
use crate::store::{keys, Store};
use crate::timestamp::iso8601;
use chrono::{DateTime, Utc};
use rug::Integer;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::{info, warn};

pub const METHOD: &str = "Kangaroo (JLP)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub puzzle_number: u32,
    pub method: String,
    pub public_key: String,
    /// `0x`-prefixed lowercase hex.
    pub private_key: String,
    pub worker_id: u32,
    #[serde(with = "iso8601")]
    pub found_timestamp: DateTime<Utc>,
    #[serde(with = "bigint::hex_string")]
    pub search_range_start: Integer,
    #[serde(with = "bigint::hex_string")]
    pub search_range_end: Integer,
    pub work_file: String,
    #[serde(default)]
    pub range_anomaly: bool,
    /// Token exactly as the solver printed it. Candidate records only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_private_key: Option<String>,
}

impl SolutionRecord {
    /// Plain-text summary written next to the JSON record.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "PUZZLE {} SOLUTION FOUND!", self.puzzle_number);
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out);
        let _ = writeln!(out, "Public Key:  {}", self.public_key);
        let _ = writeln!(out, "Private Key: {}", self.private_key);
        let _ = writeln!(out);
        let _ = writeln!(out, "Found by: Worker {}", self.worker_id);
        let _ = writeln!(
            out,
            "Timestamp: {}",
            self.found_timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(
            out,
            "Search Range: {} to {}",
            bigint::to_hex(&self.search_range_start),
            bigint::to_hex(&self.search_range_end)
        );
        let _ = writeln!(out, "Method: {}", self.method);
        let _ = writeln!(out, "Work File: {}", self.work_file);
        if self.range_anomaly {
            let _ = writeln!(out);
            let _ = writeln!(out, "WARNING: private key lies outside the puzzle interval");
        }
        out
    }
}

/// A parsed found-value token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub raw: String,
    pub value: Integer,
    pub in_range: bool,
}

/// Parse the text after the found-value marker and check it against the
/// puzzle interval.
pub fn parse_candidate(raw: &str, interval: &SearchInterval) -> Result<Candidate> {
    let raw = raw.trim();
    let value = bigint::parse_hex(raw).map_err(|reason| PouchError::CandidateFormat {
        raw: raw.to_string(),
        reason,
    })?;
    Ok(Candidate {
        raw: raw.to_string(),
        in_range: interval.contains(&value),
        value,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arbitration {
    /// This worker created the canonical record.
    Won,
    /// A canonical record already existed; it was left untouched.
    AlreadyResolved,
}

/// Publishes one worker's discoveries.
#[derive(Debug, Clone)]
pub struct SolutionArbiter {
    puzzle_number: u32,
    public_key: String,
    interval: SearchInterval,
    range: WorkerRange,
    work_file: String,
}

impl SolutionArbiter {
    pub fn new(puzzle: &PuzzleConfig, range: WorkerRange, work_file: impl Into<String>) -> Self {
        SolutionArbiter {
            puzzle_number: puzzle.puzzle_number,
            public_key: puzzle.target_public_key.clone(),
            interval: puzzle.interval().clone(),
            range,
            work_file: work_file.into(),
        }
    }

    pub fn parse(&self, raw: &str) -> Result<Candidate> {
        parse_candidate(raw, &self.interval)
    }

    pub fn record_for(&self, candidate: &Candidate, found_at: DateTime<Utc>) -> SolutionRecord {
        SolutionRecord {
            puzzle_number: self.puzzle_number,
            method: METHOD.to_string(),
            public_key: self.public_key.clone(),
            private_key: bigint::to_hex(&candidate.value),
            worker_id: self.range.worker_id,
            found_timestamp: found_at,
            search_range_start: self.range.low().clone(),
            search_range_end: self.range.high().clone(),
            work_file: self.work_file.clone(),
            range_anomaly: !candidate.in_range,
            raw_private_key: Some(candidate.raw.clone()),
        }
    }

    /// Write the candidate record, then try to become the canonical one.
    ///
    /// A failed candidate write is logged and does not stop the attempt on
    /// the canonical record. Errors from the exclusive create are returned.
    pub fn publish(&self, store: &dyn Store, record: &SolutionRecord) -> Result<Arbitration> {
        let worker = record.worker_id;
        if record.range_anomaly {
            warn!(
                worker,
                key = %record.private_key,
                range = %self.interval,
                "Found key outside search range"
            );
        }
        if let Err(e) = write_candidate(store, record) {
            warn!(worker, error = %e, "Failed to write candidate record");
        }

        if store.exists(keys::SOLUTION_JSON)? {
            info!(worker, "Solution already published by another worker");
            return Ok(Arbitration::AlreadyResolved);
        }

        let canonical = SolutionRecord {
            raw_private_key: None,
            ..record.clone()
        };
        let json = serde_json::to_vec_pretty(&canonical)?;
        if !store.create_exclusive(keys::SOLUTION_JSON, &json)? {
            info!(worker, "Solution already published by another worker");
            return Ok(Arbitration::AlreadyResolved);
        }
        if let Err(e) = store.write(keys::SOLUTION_TXT, canonical.summary().as_bytes()) {
            warn!(worker, error = %e, "Failed to write solution summary");
        }
        info!(worker, key = %canonical.private_key, "Canonical solution published");
        Ok(Arbitration::Won)
    }
}

fn write_candidate(store: &dyn Store, record: &SolutionRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)?;
    store.write(&keys::candidate_json(record.worker_id), &json)?;
    store.write(
        &keys::candidate_txt(record.worker_id),
        record.summary().as_bytes(),
    )?;
    Ok(())
}

/// The canonical record, if one has been published and is readable.
pub fn load_canonical(store: &dyn Store) -> Option<SolutionRecord> {
    crate::store::read_json(store, keys::SOLUTION_JSON)
}
