//! Validated run configuration and seed derivation.

use std::num::{NonZeroU64, NonZeroUsize};

use memtest_error::{MemtestError, Result};
use serde::Serialize;

use crate::BYTES_PER_MB;
use crate::region::MemoryRegion;

/// Environment variable consulted for a run seed when none is given on the
/// command line.
pub const SEED_ENV_VAR: &str = "MEMTEST_SEED";

/// Validated configuration for one memtest run.
///
/// Block size and iteration count are guaranteed positive. Worker count and
/// seed are optional; the orchestrator resolves them at run start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    block_size_bytes: NonZeroUsize,
    iterations: NonZeroU64,
    worker_count: Option<NonZeroUsize>,
    seed: Option<u64>,
}

impl RunConfig {
    /// Build a configuration from an exact byte count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if either value is zero.
    pub fn new(block_size_bytes: usize, iterations: u64) -> Result<Self> {
        let block_size_bytes = NonZeroUsize::new(block_size_bytes)
            .ok_or_else(|| MemtestError::invalid_config("block_size_bytes", block_size_bytes))?;
        let iterations = NonZeroU64::new(iterations)
            .ok_or_else(|| MemtestError::invalid_config("iterations", iterations))?;
        Ok(Self {
            block_size_bytes,
            iterations,
            worker_count: None,
            seed: None,
        })
    }

    /// Build a configuration from intake values: megabytes and iterations.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for non-positive values or when the
    /// megabyte count does not fit in the address space once scaled.
    pub fn from_megabytes(block_size_mb: i64, iterations: i64) -> Result<Self> {
        if block_size_mb <= 0 {
            return Err(MemtestError::invalid_config("block_size_mb", block_size_mb));
        }
        if iterations <= 0 {
            return Err(MemtestError::invalid_config("iterations", iterations));
        }
        let bytes = usize::try_from(block_size_mb)
            .ok()
            .and_then(|mb| mb.checked_mul(BYTES_PER_MB))
            .ok_or_else(|| MemtestError::invalid_config("block_size_mb", block_size_mb))?;
        let iterations = u64::try_from(iterations)
            .map_err(|_| MemtestError::invalid_config("iterations", iterations))?;
        Self::new(bytes, iterations)
    }

    /// Pin the worker count. A requested `0` is treated as `1`.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = Some(resolve_worker_count(workers));
        self
    }

    /// Fix the run seed so the random pass writes reproducible data.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub const fn block_size_bytes(&self) -> usize {
        self.block_size_bytes.get()
    }

    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations.get()
    }

    #[must_use]
    pub const fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Requested worker count, or the platform's available parallelism.
    #[must_use]
    pub fn resolved_workers(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| resolve_worker_count(available_parallelism_or_zero()))
            .get()
    }
}

/// Everything fixed at run start: resolved workers, seed and partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    pub block_size_bytes: usize,
    pub iterations: u64,
    pub worker_count: usize,
    pub seed: u64,
    pub regions: Vec<MemoryRegion>,
}

/// Substitute `1` for a reported worker count of `0`.
#[must_use]
pub fn resolve_worker_count(reported: usize) -> NonZeroUsize {
    NonZeroUsize::new(reported).unwrap_or(NonZeroUsize::MIN)
}

fn available_parallelism_or_zero() -> usize {
    std::thread::available_parallelism().map_or(0, NonZeroUsize::get)
}

/// Derive the per-iteration seed from the run seed.
#[inline]
#[must_use]
pub const fn derive_iteration_seed(run_seed: u64, iteration: u64) -> u64 {
    run_seed ^ iteration.wrapping_mul(0xD1B5_4A32_D192_ED03)
}

/// Derive a worker-specific seed so every worker draws a distinct stream.
///
/// `worker_seed = base_seed ^ (worker_id * 0x9E3779B97F4A7C15)`
#[inline]
#[must_use]
pub const fn derive_worker_seed(base_seed: u64, worker_id: usize) -> u64 {
    base_seed ^ (worker_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
