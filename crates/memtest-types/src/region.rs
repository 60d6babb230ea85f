use std::fmt;

use serde::Serialize;

/// A contiguous `[start, end)` byte range of the shared test buffer.
///
/// Regions are produced by the partitioner and handed to exactly one worker
/// per pass. A region is never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MemoryRegion {
    start: usize,
    end: usize,
}

impl MemoryRegion {
    /// Create a region, returning `None` unless `start < end`.
    #[inline]
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// First global offset covered by this region.
    #[inline]
    #[must_use]
    pub const fn start(self) -> usize {
        self.start
    }

    /// One past the last global offset covered by this region.
    #[inline]
    #[must_use]
    pub const fn end(self) -> usize {
        self.end
    }

    /// Number of bytes in the region. Always at least 1.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.end - self.start
    }

    /// Regions are never empty; provided for API symmetry with slices.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.start >= self.end
    }

    /// Whether the global `offset` falls inside the region.
    #[inline]
    #[must_use]
    pub const fn contains(self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Translate a region-local index into a global buffer offset.
    #[inline]
    #[must_use]
    pub const fn global(self, local: usize) -> usize {
        self.start + local
    }

    /// Translate a global offset into a region-local index.
    #[inline]
    #[must_use]
    pub const fn local(self, global: usize) -> Option<usize> {
        if self.contains(global) {
            Some(global - self.start)
        } else {
            None
        }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
