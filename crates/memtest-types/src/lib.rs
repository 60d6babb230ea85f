//! Plain data model for the memtest pattern-test engine.
//!
//! Everything here is immutable once built and cheap to share across worker
//! threads: regions of the test buffer, the fixed pattern battery, per-region
//! outcomes, progress updates, and the validated run configuration.

pub mod config;
pub mod outcome;
pub mod pattern;
pub mod progress;
pub mod region;

pub use config::{
    RunConfig, RunPlan, SEED_ENV_VAR, derive_iteration_seed, derive_worker_seed,
    resolve_worker_count,
};
pub use outcome::{IterationOutcome, PatternMismatch, TestOutcome};
pub use pattern::{BATTERY, PatternKind, PatternSpec};
pub use progress::{PassPhase, ProgressUpdate};
pub use region::MemoryRegion;

/// Bytes per megabyte as used by block-size intake (binary megabytes).
pub const BYTES_PER_MB: usize = 1024 * 1024;
