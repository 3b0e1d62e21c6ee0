pub mod bigint;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod dp;
pub mod error;
pub mod monitor;
pub mod range;
pub mod solution;
pub mod solver;
pub mod stats;
pub mod status;
pub mod store;
pub mod timestamp;
pub mod worker;

pub use error::{PouchError, Result};
