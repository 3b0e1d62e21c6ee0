//! # Range: Deterministic Search Interval Partitioning
//!
//! Every worker computes its own sub-range from `(interval, num_workers,
//! worker_id)` with no coordination. Floor division gives each worker
//! `span / N` keys; the last worker also absorbs the `span mod N` remainder,
//! so its range is slightly larger than the others. That asymmetry is
//! expected and keeps the union exact.

use crate::bigint;
use crate::error::{PouchError, Result};
use rug::ops::Pow;
use rug::Integer;
use std::fmt;

/// Closed interval `[low, high]` of candidate keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchInterval {
    low: Integer,
    high: Integer,
}

impl SearchInterval {
    pub fn new(low: Integer, high: Integer) -> Result<Self> {
        if low < 0 {
            return Err(PouchError::config("interval lower bound is negative"));
        }
        if low > high {
            return Err(PouchError::config(format!(
                "interval lower bound {} exceeds upper bound {}",
                bigint::to_hex(&low),
                bigint::to_hex(&high)
            )));
        }
        Ok(SearchInterval { low, high })
    }

    /// Puzzle `n` searches `[2^(n-1), 2^n - 1]`.
    pub fn for_puzzle(puzzle_number: u32) -> Result<Self> {
        if puzzle_number == 0 {
            return Err(PouchError::config("puzzle number must be at least 1"));
        }
        let low = Integer::from(2u32).pow(puzzle_number - 1);
        let high = Integer::from(2u32).pow(puzzle_number) - 1u32;
        Self::new(low, high)
    }

    pub fn low(&self) -> &Integer {
        &self.low
    }

    pub fn high(&self) -> &Integer {
        &self.high
    }

    /// Number of keys, `high - low + 1`.
    pub fn span(&self) -> Integer {
        Integer::from(&self.high - &self.low) + 1u32
    }

    pub fn contains(&self, key: &Integer) -> bool {
        *key >= self.low && *key <= self.high
    }
}

impl fmt::Display for SearchInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            bigint::to_hex(&self.low),
            bigint::to_hex(&self.high)
        )
    }
}

/// One worker's share of the interval. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRange {
    pub worker_id: u32,
    pub interval: SearchInterval,
}

impl WorkerRange {
    pub fn low(&self) -> &Integer {
        self.interval.low()
    }

    pub fn high(&self) -> &Integer {
        self.interval.high()
    }
}

/// Compute the sub-range for `worker_id` out of `num_workers`.
///
/// Fails with a configuration error when `num_workers` is zero, the worker
/// index is out of bounds, or the interval has fewer keys than workers.
pub fn partition(total: &SearchInterval, num_workers: u32, worker_id: u32) -> Result<WorkerRange> {
    if num_workers == 0 {
        return Err(PouchError::config("worker count must be at least 1"));
    }
    if worker_id >= num_workers {
        return Err(PouchError::config(format!(
            "worker id {} out of range for {} workers",
            worker_id, num_workers
        )));
    }
    let chunk = total.span() / num_workers;
    if chunk < 1 {
        return Err(PouchError::config(format!(
            "interval of {} keys is smaller than worker count {}",
            total.span(),
            num_workers
        )));
    }

    let low = Integer::from(&chunk * worker_id) + total.low();
    let high = if worker_id == num_workers - 1 {
        total.high().clone()
    } else {
        Integer::from(&low + &chunk) - 1u32
    };
    Ok(WorkerRange {
        worker_id,
        interval: SearchInterval::new(low, high)?,
    })
}

/// All `num_workers` ranges in worker order.
pub fn partition_all(total: &SearchInterval, num_workers: u32) -> Result<Vec<WorkerRange>> {
    (0..num_workers)
        .map(|id| partition(total, num_workers, id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(low: u64, high: u64) -> SearchInterval {
        SearchInterval::new(Integer::from(low), Integer::from(high)).unwrap()
    }

    #[test]
    fn puzzle_135_boundaries() {
        let total = SearchInterval::for_puzzle(135).unwrap();
        let first = partition(&total, 10, 0).unwrap();
        let last = partition(&total, 10, 9).unwrap();
        assert_eq!(*first.low(), Integer::from(2u32).pow(134));
        assert_eq!(*last.high(), Integer::from(2u32).pow(135) - 1u32);
    }

    #[test]
    fn puzzle_interval_span_is_power_of_two() {
        let total = SearchInterval::for_puzzle(135).unwrap();
        assert_eq!(total.span(), Integer::from(2u32).pow(134));
        let p1 = SearchInterval::for_puzzle(1).unwrap();
        assert_eq!(*p1.low(), 1);
        assert_eq!(*p1.high(), 1);
    }

    #[test]
    fn last_worker_absorbs_remainder() {
        let total = interval(0, 9);
        let bounds: Vec<(u64, u64)> = partition_all(&total, 3)
            .unwrap()
            .iter()
            .map(|r| (r.low().to_u64().unwrap(), r.high().to_u64().unwrap()))
            .collect();
        assert_eq!(bounds, vec![(0, 2), (3, 5), (6, 9)]);
    }

    #[test]
    fn single_worker_gets_everything() {
        let total = interval(100, 200);
        let r = partition(&total, 1, 0).unwrap();
        assert_eq!(r.interval, total);
    }

    #[test]
    fn one_key_per_worker_is_allowed() {
        let total = interval(5, 8);
        let ranges = partition_all(&total, 4).unwrap();
        for (i, r) in ranges.iter().enumerate() {
            assert_eq!(*r.low(), 5 + i as u64);
            assert_eq!(r.low(), r.high());
        }
    }

    #[test]
    fn configuration_errors() {
        let total = interval(0, 2);
        assert!(matches!(partition(&total, 0, 0), Err(PouchError::Config(_))));
        assert!(matches!(partition(&total, 4, 0), Err(PouchError::Config(_))));
        assert!(matches!(partition(&total, 2, 2), Err(PouchError::Config(_))));
        assert!(SearchInterval::for_puzzle(0).is_err());
        assert!(SearchInterval::new(Integer::from(3), Integer::from(2)).is_err());
    }

    #[test]
    fn deterministic() {
        let total = SearchInterval::for_puzzle(80).unwrap();
        assert_eq!(partition(&total, 7, 3).unwrap(), partition(&total, 7, 3).unwrap());
    }

    #[test]
    fn display_uses_prefixed_hex() {
        let total = interval(16, 255);
        assert_eq!(total.to_string(), "0x10 to 0xff");
    }
}
