//! Expected-value generation for each pattern kind.
//!
//! `Constant` and `Incrementing` are pure functions of the offset. `Random`
//! draws from the worker's generator at write time and records what it drew
//! into an [`ExpectedValueTrace`], which is the sole reference for
//! verification.

use memtest_types::{MemoryRegion, PatternKind, PatternSpec};
use rand::RngCore;

/// Expected byte at region-local offset `local`, or `None` for `Random`.
///
/// `Incrementing` is keyed on the global offset so the value at any absolute
/// offset is independent of how the buffer was partitioned.
#[inline]
#[must_use]
pub fn expected_value(spec: &PatternSpec, region: MemoryRegion, local: usize) -> Option<u8> {
    match spec.kind {
        PatternKind::Constant(value) => Some(value),
        PatternKind::Incrementing => Some(incrementing_at(region.global(local))),
        PatternKind::Random => None,
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn incrementing_at(global_offset: usize) -> u8 {
    (global_offset % 256) as u8
}

/// Values written by one `Random` pass over one region, in offset order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpectedValueTrace {
    values: Vec<u8>,
}

impl ExpectedValueTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(len: usize) -> Self {
        Self {
            values: Vec::with_capacity(len),
        }
    }

    /// Append the next run of written values.
    pub fn record(&mut self, written: &[u8]) {
        self.values.extend_from_slice(written);
    }

    /// Value recorded at region-local offset `local`.
    #[must_use]
    pub fn get(&self, local: usize) -> Option<u8> {
        self.values.get(local).copied()
    }

    /// Recorded values for `len` offsets starting at `local`.
    #[must_use]
    pub fn window(&self, local: usize, len: usize) -> Option<&[u8]> {
        self.values.get(local..local.checked_add(len)?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Fill `dst`, which starts at region-local offset `local_start`, with the
/// pattern's values. `Random` draws from `rng` and appends to `trace`.
pub fn write_chunk<R: RngCore + ?Sized>(
    spec: &PatternSpec,
    region: MemoryRegion,
    local_start: usize,
    dst: &mut [u8],
    rng: &mut R,
    trace: &mut ExpectedValueTrace,
) {
    match spec.kind {
        PatternKind::Constant(value) => dst.fill(value),
        PatternKind::Incrementing => {
            let base = region.global(local_start);
            for (i, byte) in dst.iter_mut().enumerate() {
                *byte = incrementing_at(base + i);
            }
        }
        PatternKind::Random => {
            rng.fill_bytes(dst);
            trace.record(dst);
        }
    }
}

/// Index within `src` of the first byte that differs from the pattern,
/// with the expected and actual values.
///
/// `src` starts at region-local offset `local_start`. A `Random` window that
/// falls outside the trace reports the first untraced byte as a mismatch
/// against `0`.
#[must_use]
pub fn first_mismatch(
    spec: &PatternSpec,
    region: MemoryRegion,
    local_start: usize,
    src: &[u8],
    trace: &ExpectedValueTrace,
) -> Option<(usize, u8, u8)> {
    match spec.kind {
        PatternKind::Constant(value) => src
            .iter()
            .position(|&b| b != value)
            .map(|i| (i, value, src[i])),
        PatternKind::Incrementing => {
            let base = region.global(local_start);
            src.iter()
                .enumerate()
                .find(|&(i, &b)| b != incrementing_at(base + i))
                .map(|(i, &b)| (i, incrementing_at(base + i), b))
        }
        PatternKind::Random => match trace.window(local_start, src.len()) {
            Some(expected) => src
                .iter()
                .zip(expected)
                .position(|(a, e)| a != e)
                .map(|i| (i, expected[i], src[i])),
            None => src
                .iter()
                .enumerate()
                .find_map(|(i, &b)| match trace.get(local_start + i) {
                    Some(e) if e == b => None,
                    e => Some((i, e.unwrap_or(0), b)),
                }),
        },
    }
}
