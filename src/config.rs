//! Validated run configuration: which puzzle, which target, how to drive the solver.
//!
//! The CLI collects raw values (flags or environment); everything is checked
//! here before a single process is launched.

use crate::error::{PouchError, Result};
use crate::range::SearchInterval;
use std::path::PathBuf;
use std::time::Duration;

/// Public key of Bitcoin puzzle #135.
pub const DEFAULT_TARGET: &str =
    "02145d2611c823a396ef6712ce0f712f09b9b4f3135e3e0aa3230fb9b6d08d1e16";

pub const DEFAULT_SOLVER_BINARY: &str = "/app/kangaroo/kangaroo";

/// Largest puzzle exponent accepted (secp256k1 keys are 256 bits).
pub const MAX_PUZZLE_NUMBER: u32 = 256;

#[derive(Debug, Clone)]
pub struct PuzzleConfig {
    pub puzzle_number: u32,
    pub target_public_key: String,
    interval: SearchInterval,
}

impl PuzzleConfig {
    pub fn new(puzzle_number: u32, target_public_key: &str) -> Result<Self> {
        if !(1..=MAX_PUZZLE_NUMBER).contains(&puzzle_number) {
            return Err(PouchError::config(format!(
                "puzzle number {} outside 1..={}",
                puzzle_number, MAX_PUZZLE_NUMBER
            )));
        }
        let target = target_public_key.trim();
        validate_public_key(target)?;
        Ok(PuzzleConfig {
            puzzle_number,
            target_public_key: target.to_string(),
            interval: SearchInterval::for_puzzle(puzzle_number)?,
        })
    }

    /// `[2^(n-1), 2^n - 1]`.
    pub fn interval(&self) -> &SearchInterval {
        &self.interval
    }
}

/// Accept SEC1 points: compressed (`02`/`03` + 32 bytes) or uncompressed
/// (`04` + 64 bytes), hex encoded.
pub fn validate_public_key(key: &str) -> Result<()> {
    if !key.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(PouchError::config(format!(
            "target public key {:?} is not hex",
            key
        )));
    }
    let ok = match key.get(..2) {
        Some("02") | Some("03") => key.len() == 66,
        Some("04") => key.len() == 130,
        _ => false,
    };
    if !ok {
        return Err(PouchError::config(format!(
            "target public key must be 02/03 + 64 hex or 04 + 128 hex, got {} chars",
            key.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Cpu { threads: usize },
    Gpu { device: u32 },
}

/// How the external solver is invoked.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub binary: PathBuf,
    pub dp_bits: u32,
    /// Cadence at which the solver saves its work file; checkpoints follow it.
    pub save_interval: Duration,
    pub mode: DeviceMode,
}

impl SolverSettings {
    pub fn validate(&self) -> Result<()> {
        if self.dp_bits > 64 {
            return Err(PouchError::config(format!(
                "distinguished-point bits {} above 64",
                self.dp_bits
            )));
        }
        if self.save_interval.is_zero() {
            return Err(PouchError::config("work save interval must be positive"));
        }
        if let DeviceMode::Cpu { threads: 0 } = self.mode {
            return Err(PouchError::config("solver thread count must be positive"));
        }
        Ok(())
    }
}
