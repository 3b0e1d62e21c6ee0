//! Record timestamps and worker liveness.
//!
//! Records are written as RFC 3339 UTC. Older records written by other
//! tooling may carry naive ISO-8601 (`2025-01-02T03:04:05.123456`), which is
//! read as UTC rather than rejected.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use std::time::{Duration, Instant};

/// A worker whose last update is older than this is considered inactive.
pub const LIVENESS_THRESHOLD: Duration = Duration::from_secs(300);

pub fn parse_lenient(text: &str) -> Option<DateTime<Utc>> {
    let t = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Liveness is derived from age, never stored. Timestamps in the future
/// (clock skew between hosts) count as live.
pub fn is_live(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match (now - timestamp).to_std() {
        Ok(age) => age < LIVENESS_THRESHOLD,
        Err(_) => true,
    }
}

/// Minimum-interval gate for side effects on a hot loop: an explicit
/// last-attempt timestamp checked before each attempt, not a timer.
#[derive(Debug, Clone)]
pub struct RateLimit {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimit {
    pub fn new(interval: Duration) -> Self {
        RateLimit {
            interval,
            last: None,
        }
    }

    /// True if an attempt at `now` would pass. The first attempt always does.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Claim the slot at `now` if due.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last = Some(now);
        true
    }
}

/// Serde adapter for RFC 3339 output with lenient input.
pub mod iso8601 {
    use super::*;

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_lenient(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {:?}", raw)))
    }
}

/// Same as [`iso8601`] for optional fields.
pub mod iso8601_opt {
    use super::*;

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_some(&dt.to_rfc3339()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => parse_lenient(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {:?}", raw))),
            None => Ok(None),
        }
    }
}
