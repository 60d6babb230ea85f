//! The per-region battery: write/verify passes over one worker's slice.

use std::sync::Arc;
use std::time::Duration;

use memtest_error::{MemtestError, Result};
use memtest_observability::{ProgressSink, RunMetrics};
use memtest_types::{
    BATTERY, MemoryRegion, PassPhase, PatternMismatch, PatternSpec, ProgressUpdate, TestOutcome,
};
use rand::RngCore;
use tracing::{debug, trace, warn};

use crate::pattern::{ExpectedValueTrace, first_mismatch, write_chunk};

// ---------------------------------------------------------------------------
// PassInterceptor: hook between the write and verify phases
// ---------------------------------------------------------------------------

/// Identifies one pass of one worker within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassContext {
    /// 1-based iteration number.
    pub iteration: u64,
    pub worker_id: usize,
    pub region: MemoryRegion,
    pub pass_index: usize,
    pub pass: PatternSpec,
}

/// Hook invoked on every pass after the write phase and before verification.
///
/// Receives the worker's own slice, indexed region-locally. Used for settle
/// delays and, in tests, fault injection.
pub trait PassInterceptor: Send + Sync {
    fn after_write(&self, _ctx: &PassContext, _region_bytes: &mut [u8]) {}
}

impl<T: PassInterceptor + ?Sized> PassInterceptor for Arc<T> {
    fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
        (**self).after_write(ctx, region_bytes);
    }
}

impl<T: PassInterceptor + ?Sized> PassInterceptor for &T {
    fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
        (**self).after_write(ctx, region_bytes);
    }
}

/// Interceptor that leaves the written bytes alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterceptor;

impl PassInterceptor for NoInterceptor {}

/// Sleeps between write and verify so weak cells have time to lose charge.
#[derive(Debug, Clone, Copy)]
pub struct SettleDelay {
    delay: Duration,
}

impl SettleDelay {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl PassInterceptor for SettleDelay {
    fn after_write(&self, ctx: &PassContext, _region_bytes: &mut [u8]) {
        if !self.delay.is_zero() {
            trace!(
                worker_id = ctx.worker_id,
                pass = ctx.pass.name,
                delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
                "settling before verify"
            );
            std::thread::sleep(self.delay);
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkTestRunner
// ---------------------------------------------------------------------------

/// Runs the battery for one worker over one region.
///
/// Holds only shared references; one runner is built per worker per
/// iteration and moved into that worker's thread.
pub struct ChunkTestRunner<'a> {
    worker_id: usize,
    iteration: u64,
    progress: &'a dyn ProgressSink,
    interceptor: &'a dyn PassInterceptor,
    metrics: &'a RunMetrics,
}

impl<'a> ChunkTestRunner<'a> {
    #[must_use]
    pub fn new(
        worker_id: usize,
        iteration: u64,
        progress: &'a dyn ProgressSink,
        interceptor: &'a dyn PassInterceptor,
        metrics: &'a RunMetrics,
    ) -> Self {
        Self {
            worker_id,
            iteration,
            progress,
            interceptor,
            metrics,
        }
    }

    /// Run every pass of [`BATTERY`] over `bytes`, which backs `region`.
    ///
    /// Stops at the first mismatching byte and returns a failing outcome
    /// carrying its global offset; later passes are not run.
    ///
    /// # Errors
    ///
    /// Returns `BufferLayout` if `bytes` is not exactly `region.len()` long.
    pub fn run_battery<R: RngCore + ?Sized>(
        &self,
        bytes: &mut [u8],
        region: MemoryRegion,
        rng: &mut R,
    ) -> Result<TestOutcome> {
        if bytes.len() != region.len() {
            return Err(MemtestError::layout(format!(
                "worker {} got {} bytes for region {region}",
                self.worker_id,
                bytes.len()
            )));
        }

        debug!(
            worker_id = self.worker_id,
            iteration = self.iteration,
            region_start = region.start(),
            region_end = region.end(),
            "battery start"
        );

        let mut passes_completed = 0;
        for (pass_index, spec) in BATTERY.iter().enumerate() {
            if let Some(mismatch) = self.run_pass(bytes, region, pass_index, spec, rng) {
                self.metrics.record_mismatch();
                warn!(
                    worker_id = self.worker_id,
                    iteration = self.iteration,
                    pass = spec.name,
                    offset = mismatch.offset,
                    expected = mismatch.expected,
                    actual = mismatch.actual,
                    "pattern mismatch"
                );
                return Ok(TestOutcome {
                    worker_id: self.worker_id,
                    region,
                    passes_completed,
                    mismatch: Some(mismatch),
                });
            }
            passes_completed += 1;
            self.metrics.record_pass();
            trace!(
                worker_id = self.worker_id,
                iteration = self.iteration,
                pass = spec.name,
                "pass verified"
            );
        }

        debug!(
            worker_id = self.worker_id,
            iteration = self.iteration,
            passes_completed,
            "battery passed"
        );
        Ok(TestOutcome {
            worker_id: self.worker_id,
            region,
            passes_completed,
            mismatch: None,
        })
    }

    fn run_pass<R: RngCore + ?Sized>(
        &self,
        bytes: &mut [u8],
        region: MemoryRegion,
        pass_index: usize,
        spec: &PatternSpec,
        rng: &mut R,
    ) -> Option<PatternMismatch> {
        let len = bytes.len();
        let step = progress_step(len);
        let mut trace = if spec.is_formulaic() {
            ExpectedValueTrace::new()
        } else {
            ExpectedValueTrace::with_capacity(len)
        };

        for (chunk_index, chunk) in bytes.chunks_mut(step).enumerate() {
            let local_start = chunk_index * step;
            write_chunk(spec, region, local_start, chunk, rng, &mut trace);
            self.metrics.record_written(chunk.len());
            self.emit(pass_index, spec, PassPhase::Write, local_start + chunk.len(), len);
        }

        let written = std::hint::black_box(&mut *bytes);
        let ctx = PassContext {
            iteration: self.iteration,
            worker_id: self.worker_id,
            region,
            pass_index,
            pass: *spec,
        };
        self.interceptor.after_write(&ctx, written);

        for (chunk_index, chunk) in written.chunks(step).enumerate() {
            let local_start = chunk_index * step;
            if let Some((i, expected, actual)) =
                first_mismatch(spec, region, local_start, chunk, &trace)
            {
                self.metrics.record_verified(i);
                return Some(PatternMismatch {
                    offset: region.global(local_start + i),
                    expected,
                    actual,
                    pass_index,
                    pass_name: spec.name,
                });
            }
            self.metrics.record_verified(chunk.len());
            self.emit(pass_index, spec, PassPhase::Verify, local_start + chunk.len(), len);
        }
        None
    }

    fn emit(
        &self,
        pass_index: usize,
        spec: &PatternSpec,
        phase: PassPhase,
        units_done: usize,
        units_total: usize,
    ) {
        self.metrics.record_progress();
        self.progress.report(&ProgressUpdate {
            worker_id: self.worker_id,
            units_done,
            units_total,
            pass_index,
            pass_name: spec.name,
            phase,
        });
    }
}

/// Offsets processed between progress updates: about 1% of the region,
/// at least one.
#[inline]
#[must_use]
pub const fn progress_step(region_len: usize) -> usize {
    let step = region_len / 100;
    if step == 0 { 1 } else { step }
}

#[cfg(test)]
mod tests {
    use memtest_observability::{NoOpProgress, ProgressLog};
    use memtest_types::PatternKind;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    struct Corrupt {
        pass: &'static str,
        local: usize,
        value: u8,
    }

    impl PassInterceptor for Corrupt {
        fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
            if ctx.pass.name == self.pass {
                region_bytes[self.local] = self.value;
            }
        }
    }

    fn region(start: usize, end: usize) -> MemoryRegion {
        MemoryRegion::new(start, end).unwrap()
    }

    #[test]
    fn progress_step_is_one_percent_at_least_one() {
        assert_eq!(progress_step(1), 1);
        assert_eq!(progress_step(99), 1);
        assert_eq!(progress_step(256), 2);
        assert_eq!(progress_step(1_000_000), 10_000);
    }

    #[test]
    fn clean_battery_passes_every_pass() {
        let metrics = RunMetrics::new();
        let runner = ChunkTestRunner::new(0, 1, &NoOpProgress, &NoInterceptor, &metrics);
        let r = region(0, 1000);
        let mut bytes = vec![0u8; 1000];
        let outcome = runner
            .run_battery(&mut bytes, r, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert!(outcome.passed());
        assert_eq!(outcome.passes_completed, BATTERY.len());
        let snap = metrics.snapshot();
        assert_eq!(snap.bytes_written, 6000);
        assert_eq!(snap.bytes_verified, 6000);
        assert_eq!(snap.passes_completed, 6);
    }

    #[test]
    fn mismatch_reports_global_offset_and_stops_battery() {
        let metrics = RunMetrics::new();
        let corrupt = Corrupt {
            pass: "0x55",
            local: 40,
            value: 0x54,
        };
        let runner = ChunkTestRunner::new(2, 1, &NoOpProgress, &corrupt, &metrics);
        let r = region(512, 768);
        let mut bytes = vec![0u8; 256];
        let outcome = runner
            .run_battery(&mut bytes, r, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert!(!outcome.passed());
        assert_eq!(outcome.failing_offset(), Some(552));
        assert_eq!(outcome.expected(), Some(0x55));
        assert_eq!(outcome.actual(), Some(0x54));
        assert_eq!(outcome.pass_name(), Some("0x55"));
        assert_eq!(outcome.passes_completed, 1);
        assert_eq!(metrics.snapshot().passes_completed, 1);
        assert_eq!(metrics.snapshot().mismatches, 1);
        assert_eq!(metrics.snapshot().bytes_verified, 256 + 40);
    }

    #[test]
    fn random_pass_corruption_detected_via_trace() {
        struct FlipRandom;
        impl PassInterceptor for FlipRandom {
            fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
                if matches!(ctx.pass.kind, PatternKind::Random) {
                    region_bytes[7] ^= 0x10;
                }
            }
        }
        let metrics = RunMetrics::new();
        let runner = ChunkTestRunner::new(0, 1, &NoOpProgress, &FlipRandom, &metrics);
        let mut bytes = vec![0u8; 64];
        let outcome = runner
            .run_battery(&mut bytes, region(0, 64), &mut StdRng::seed_from_u64(5))
            .unwrap();
        let mismatch = outcome.mismatch.unwrap();
        assert_eq!(mismatch.offset, 7);
        assert_eq!(mismatch.pass_name, "Random");
        assert_eq!(mismatch.expected ^ mismatch.actual, 0x10);
        assert_eq!(outcome.passes_completed, 5);
    }

    #[test]
    fn progress_reaches_completion_for_tiny_regions() {
        let log = ProgressLog::new(1024);
        let metrics = RunMetrics::new();
        let runner = ChunkTestRunner::new(0, 1, &log, &NoInterceptor, &metrics);
        let mut bytes = vec![0u8; 3];
        runner
            .run_battery(&mut bytes, region(10, 13), &mut StdRng::seed_from_u64(0))
            .unwrap();
        let updates = log.snapshot();
        assert_eq!(updates.len(), 6 * 2 * 3);
        let completed = updates.iter().filter(|u| u.is_phase_complete()).count();
        assert_eq!(completed, 12);
        let last = updates.last().unwrap();
        assert_eq!(last.pass_name, "Random");
        assert_eq!(last.phase, PassPhase::Verify);
        assert!((last.battery_fraction(BATTERY.len()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn progress_rate_is_bounded() {
        let log = ProgressLog::new(4096);
        let metrics = RunMetrics::new();
        let runner = ChunkTestRunner::new(0, 1, &log, &NoInterceptor, &metrics);
        let mut bytes = vec![0u8; 10_050];
        runner
            .run_battery(&mut bytes, region(0, 10_050), &mut StdRng::seed_from_u64(0))
            .unwrap();
        let per_phase = log.len() / 12;
        assert!(per_phase <= 101, "per_phase={per_phase}");
        assert_eq!(metrics.snapshot().progress_updates, log.len() as u64);
    }

    #[test]
    fn length_mismatch_is_layout_error() {
        let metrics = RunMetrics::new();
        let runner = ChunkTestRunner::new(0, 1, &NoOpProgress, &NoInterceptor, &metrics);
        let mut bytes = vec![0u8; 10];
        let err = runner
            .run_battery(&mut bytes, region(0, 11), &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, MemtestError::BufferLayout { .. }));
    }

    #[test]
    fn settle_delay_sleeps_between_phases() {
        let delay = SettleDelay::new(Duration::from_millis(2));
        let metrics = RunMetrics::new();
        let runner = ChunkTestRunner::new(0, 1, &NoOpProgress, &delay, &metrics);
        let mut bytes = vec![0u8; 8];
        let start = std::time::Instant::now();
        let outcome = runner
            .run_battery(&mut bytes, region(0, 8), &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert!(outcome.passed());
        assert!(start.elapsed() >= Duration::from_millis(12));
        assert_eq!(delay.delay(), Duration::from_millis(2));
    }
}
