//! Pure classification of solver output lines.
//!
//! Solver output is unstructured text. Each line is one of:
//!
//! | Kind | Trigger |
//! |------|---------|
//! | `Candidate` | contains the found-value marker `Priv:` (any case) |
//! | `Progress` | contains a progress marker (`MK/s`, `Count 2^`, `Dead`, `Ops`) |
//! | `Ignored` | anything else, echoed for display only |
//!
//! The solver also prints the target it is searching for (`Key# 0 Pub: 0x02…`).
//! That line looks similar to a result but carries no found-value marker and
//! must never be treated as one.

use rug::Integer;

const FOUND_MARKER: &str = "priv:";

pub const PROGRESS_MARKERS: [&str; 4] = ["MK/s", "Count 2^", "Dead", "Ops"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// Raw text following the found-value marker (may be empty or malformed).
    Candidate(&'a str),
    Progress,
    Ignored,
}

pub fn classify(line: &str) -> LineKind<'_> {
    if let Some(text) = found_value_text(line) {
        return LineKind::Candidate(text);
    }
    if PROGRESS_MARKERS.iter().any(|m| line.contains(m)) {
        LineKind::Progress
    } else {
        LineKind::Ignored
    }
}

/// First whitespace-delimited token after the found-value marker.
fn found_value_text(line: &str) -> Option<&str> {
    // ASCII lowercasing keeps byte offsets, so the index maps back onto `line`.
    let idx = line.to_ascii_lowercase().find(FOUND_MARKER)?;
    let rest = &line[idx + FOUND_MARKER.len()..];
    Some(rest.split_whitespace().next().unwrap_or(""))
}

/// Figures extracted from a progress line such as
/// `[5.52 MK/s][GPU 0.00 MK/s][Count 2^26.40][Dead 0][04s (Avg 2.5y)][2.0/4.0MB]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSample {
    /// Combined rate in millions of operations per second.
    pub rate_mkeys: Option<f64>,
    /// log2 of the total operation count.
    pub count_log2: Option<f64>,
    /// Dead (colliding same-herd) kangaroos.
    pub dead: Option<u64>,
}

impl ProgressSample {
    /// Operations performed so far, `floor(2^count)`.
    pub fn operations(&self) -> Option<Integer> {
        let x = self.count_log2?;
        if !x.is_finite() || x < 0.0 || x > 1000.0 {
            return None;
        }
        Integer::from_f64(x.exp2().floor())
    }
}

pub fn parse_progress(line: &str) -> ProgressSample {
    ProgressSample {
        rate_mkeys: number_before(line, "MK/s").and_then(|s| s.parse().ok()),
        count_log2: number_after(line, "Count 2^").and_then(|s| s.parse().ok()),
        dead: number_after(line, "Dead ").and_then(|s| s.parse().ok()),
    }
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

fn number_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let start = line.find(marker)? + marker.len();
    let rest = line[start..].trim_start();
    let end = rest.find(|c: char| !is_number_char(c)).unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

fn number_before<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let end = line.find(marker)?;
    let head = line[..end].trim_end();
    let start = head
        .rfind(|c: char| !is_number_char(c))
        .map(|i| i + 1)
        .unwrap_or(0);
    (start < head.len()).then(|| &head[start..])
}
