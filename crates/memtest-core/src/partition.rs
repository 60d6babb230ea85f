//! Splitting the test buffer into one contiguous region per worker.

use memtest_error::{MemtestError, Result};
use memtest_types::MemoryRegion;
use tracing::debug;

/// Partition `[0, total_bytes)` into contiguous, disjoint, ordered regions.
///
/// Every region but the last spans `total_bytes / workers` bytes; the last
/// absorbs the remainder. When `worker_count > total_bytes` the worker count
/// is clamped so that each of the `total_bytes` regions holds one byte.
///
/// # Errors
///
/// Returns `InvalidPartition` if either argument is zero.
pub fn partition(total_bytes: usize, worker_count: usize) -> Result<Vec<MemoryRegion>> {
    if total_bytes == 0 || worker_count == 0 {
        return Err(MemtestError::InvalidPartition {
            total_bytes,
            worker_count,
        });
    }

    let workers = worker_count.min(total_bytes);
    if workers < worker_count {
        debug!(
            total_bytes,
            requested = worker_count,
            workers,
            "clamped worker count to buffer size"
        );
    }

    let chunk = total_bytes / workers;
    let mut regions = Vec::with_capacity(workers);
    let mut start = 0usize;
    for k in 0..workers {
        let end = if k + 1 == workers { total_bytes } else { start + chunk };
        let region = MemoryRegion::new(start, end).ok_or_else(|| {
            MemtestError::internal(format!("empty region {k}: [{start}, {end})"))
        })?;
        regions.push(region);
        start = end;
    }

    debug_assert_eq!(start, total_bytes, "partition coverage mismatch");
    debug_assert!(
        regions.windows(2).all(|w| w[0].end() == w[1].start()),
        "partition regions not contiguous"
    );

    debug!(
        total_bytes,
        workers,
        chunk,
        last_len = regions.last().map_or(0, |r| r.len()),
        "partitioned buffer"
    );
    Ok(regions)
}
