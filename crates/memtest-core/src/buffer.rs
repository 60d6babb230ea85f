//! The shared test buffer and its split into per-worker slices.

use memtest_error::{MemtestError, Result};
use memtest_types::MemoryRegion;
use tracing::debug;

/// Byte storage exercised by every iteration of a run.
///
/// Allocated once at its full requested size; never shrunk or regrown.
#[derive(Debug)]
pub struct TestBuffer {
    bytes: Vec<u8>,
}

impl TestBuffer {
    /// Reserve and zero `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailed` if the allocator cannot provide `len` bytes,
    /// and `InvalidConfiguration` for a zero length.
    pub fn allocate(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(MemtestError::invalid_config("block_size_bytes", 0));
        }
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| MemtestError::AllocationFailed { bytes: len })?;
        bytes.resize(len, 0);
        debug!(bytes = len, "allocated test buffer");
        Ok(Self { bytes })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Split the buffer into one mutable slice per region.
    ///
    /// `regions` must be ordered, contiguous, start at 0 and end at
    /// `self.len()`. The returned slices are disjoint, so each can be handed
    /// to its own worker without locking.
    ///
    /// # Errors
    ///
    /// Returns `BufferLayout` if the regions do not tile the buffer exactly.
    pub fn split_regions(&mut self, regions: &[MemoryRegion]) -> Result<Vec<&mut [u8]>> {
        let total = self.bytes.len();
        let mut slices = Vec::with_capacity(regions.len());
        let mut rest: &mut [u8] = &mut self.bytes;
        let mut cursor = 0usize;
        for region in regions {
            if region.start() != cursor {
                return Err(MemtestError::layout(format!(
                    "region {region} does not start at offset {cursor}"
                )));
            }
            if region.end() > total {
                return Err(MemtestError::layout(format!(
                    "region {region} exceeds buffer of {total} bytes"
                )));
            }
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(region.len());
            slices.push(head);
            rest = tail;
            cursor = region.end();
        }
        if cursor != total {
            return Err(MemtestError::layout(format!(
                "regions cover [0, {cursor}) of a {total} byte buffer"
            )));
        }
        Ok(slices)
    }
}
