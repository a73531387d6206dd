//! Per-source units of work: fetch, classify, patch, reconcile, record.
pub mod context;
pub mod pipeline;
pub mod reconcile;

pub use context::Context;
pub use pipeline::{Mode, RunOpts, run_source};
