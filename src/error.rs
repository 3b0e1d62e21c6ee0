//! # Error: Coordination Failure Taxonomy
//!
//! | Variant | Severity | Handling |
//! |---------|----------|----------|
//! | `Config` | fatal | reported before any solver is launched |
//! | `MissingDependency` | fatal for the worker | adapter returns without launching |
//! | `CandidateFormat` | per-line | logged, line discarded, scanning continues |
//! | `Io` / `Json` | transient | logged and swallowed by status/checkpoint/merge paths |
//!
//! Losing the canonical-solution race and skipping an oversized merge are
//! outcomes, not errors, and have their own enums in `solution` and `dp`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PouchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(
        "solver binary not found at {}; build Kangaroo first \
         (git clone https://github.com/JeanLucPons/Kangaroo.git && make) \
         or point KANGAROO_BINARY at it",
        path.display()
    )]
    MissingDependency { path: PathBuf },

    #[error("malformed solution candidate {raw:?}: {reason}")]
    CandidateFormat { raw: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PouchError {
    pub fn config(msg: impl Into<String>) -> Self {
        PouchError::Config(msg.into())
    }

    /// True for errors that must stop the process before or at launch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PouchError::Config(_) | PouchError::MissingDependency { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PouchError>;
