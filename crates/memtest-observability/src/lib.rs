//! Progress, reporting and metrics infrastructure for memtest runs.
//!
//! The engine never renders or prints anything itself. It pushes progress
//! into a [`ProgressSink`], lifecycle events into a [`RunObserver`], and byte
//! counts into [`RunMetrics`]. All three are injected by the caller.
//!
//! # Design Principles
//!
//! - **Opt-in:** the default sinks ([`NoOpProgress`], [`NoOpRunObserver`])
//!   do nothing and inline away.
//! - **Serialized rendering:** [`SerializedProgress`] wraps any
//!   [`ProgressRender`] in a mutex so concurrent workers never interleave a
//!   render. No queueing: a worker holds the lock only for the render itself.
//! - **Lock-free counters:** [`RunMetrics`] uses relaxed atomics so workers
//!   can record bytes from the hot loop without contending.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use memtest_types::{IterationOutcome, ProgressUpdate, RunPlan};
use parking_lot::Mutex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// ProgressSink: thread-safe consumer of worker progress
// ---------------------------------------------------------------------------

/// Consumer of progress updates from many concurrent workers.
///
/// Implementations MUST be safe to call from every worker at once and MUST
/// NOT block longer than one render.
pub trait ProgressSink: Send + Sync {
    /// Called by a worker roughly every 1% of its region and at phase end.
    fn report(&self, update: &ProgressUpdate);
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    #[inline]
    fn report(&self, update: &ProgressUpdate) {
        (**self).report(update);
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for &T {
    #[inline]
    fn report(&self, update: &ProgressUpdate) {
        (**self).report(update);
    }
}

/// Sink that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgress;

impl ProgressSink for NoOpProgress {
    #[inline(always)]
    fn report(&self, _update: &ProgressUpdate) {}
}

/// Single-threaded renderer of progress, e.g. a terminal progress bar.
pub trait ProgressRender: Send {
    fn render(&mut self, update: &ProgressUpdate);

    /// Called once the caller is done with progress, e.g. to end the line.
    fn finish(&mut self) {}
}

/// Makes any [`ProgressRender`] shareable across workers by serializing
/// calls through a mutex around the render resource.
pub struct SerializedProgress<R> {
    renderer: Mutex<R>,
}

impl<R: ProgressRender> SerializedProgress<R> {
    #[must_use]
    pub fn new(renderer: R) -> Self {
        Self {
            renderer: Mutex::new(renderer),
        }
    }

    /// Flush the renderer's final state.
    pub fn finish(&self) {
        self.renderer.lock().finish();
    }

    /// Run `f` with exclusive access to the renderer.
    pub fn with_renderer<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        f(&mut self.renderer.lock())
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.renderer.into_inner()
    }
}

impl<R: ProgressRender> ProgressSink for SerializedProgress<R> {
    fn report(&self, update: &ProgressUpdate) {
        self.renderer.lock().render(update);
    }
}

// ---------------------------------------------------------------------------
// ProgressLog: bounded recording sink
// ---------------------------------------------------------------------------

/// Fixed-capacity record of recent progress updates.
///
/// When full, the oldest update is overwritten. Useful for tests and for
/// post-mortem inspection of what each worker was doing when a run failed.
pub struct ProgressLog {
    updates: Mutex<RingBuf>,
}

struct RingBuf {
    buf: Vec<ProgressUpdate>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl RingBuf {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, update: ProgressUpdate) {
        if self.capacity == 0 {
            return;
        }
        let idx = (self.head + self.len) % self.capacity;
        if self.buf.len() < self.capacity {
            self.buf.push(update);
        } else {
            self.buf[idx] = update;
        }
        if self.len == self.capacity {
            self.head = (self.head + 1) % self.capacity;
        } else {
            self.len += 1;
        }
    }

    fn ordered(&self) -> Vec<ProgressUpdate> {
        (0..self.len)
            .map(|i| self.buf[(self.head + i) % self.capacity])
            .collect()
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
        self.len = 0;
    }
}

impl ProgressLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            updates: Mutex::new(RingBuf::new(capacity)),
        }
    }

    /// All retained updates in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().ordered()
    }

    /// Retained updates from one worker, in arrival order.
    #[must_use]
    pub fn for_worker(&self, worker_id: usize) -> Vec<ProgressUpdate> {
        self.snapshot()
            .into_iter()
            .filter(|u| u.worker_id == worker_id)
            .collect()
    }

    pub fn clear(&self) {
        self.updates.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.lock().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

impl ProgressSink for ProgressLog {
    fn report(&self, update: &ProgressUpdate) {
        self.updates.lock().push(*update);
    }
}

// ---------------------------------------------------------------------------
// RunObserver: iteration and run lifecycle events
// ---------------------------------------------------------------------------

/// Receiver of run lifecycle events, for timing and reporting.
///
/// Called only from the orchestrating thread, between join barriers, so
/// implementations never race with workers. Iterations are 1-based.
pub trait RunObserver: Send + Sync {
    fn on_run_start(&self, _plan: &RunPlan) {}

    fn on_iteration_start(&self, _iteration: u64) {}

    fn on_iteration_complete(
        &self,
        _iteration: u64,
        _duration_micros: u64,
        _outcome: &IterationOutcome,
    ) {
    }

    fn on_run_complete(&self, _passed: bool, _total_duration_micros: u64) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRunObserver;

impl RunObserver for NoOpRunObserver {}

// ---------------------------------------------------------------------------
// RunMetrics: aggregated byte and pass counters
// ---------------------------------------------------------------------------

/// Counters aggregated across all workers of a run.
///
/// All counters are atomic; workers update them without locking.
pub struct RunMetrics {
    pub bytes_written: AtomicU64,
    pub bytes_verified: AtomicU64,
    pub passes_completed: AtomicU64,
    pub mismatches: AtomicU64,
    pub progress_updates: AtomicU64,
    started_at: Mutex<Instant>,
}

impl RunMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes_written: AtomicU64::new(0),
            bytes_verified: AtomicU64::new(0),
            passes_completed: AtomicU64::new(0),
            mismatches: AtomicU64::new(0),
            progress_updates: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
        }
    }

    pub fn record_written(&self, bytes: usize) {
        self.bytes_written
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_verified(&self, bytes: usize) {
        self.bytes_verified
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_pass(&self) {
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mismatch(&self) {
        self.mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_progress(&self) {
        self.progress_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter and restart the clock.
    pub fn reset(&self) {
        *self.started_at.lock() = Instant::now();
        self.bytes_written.store(0, Ordering::Relaxed);
        self.bytes_verified.store(0, Ordering::Relaxed);
        self.passes_completed.store(0, Ordering::Relaxed);
        self.mismatches.store(0, Ordering::Relaxed);
        self.progress_updates.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.lock().elapsed()
    }

    /// Bytes written plus verified per second since the last reset.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput_bytes_per_second(&self) -> f64 {
        let elapsed_secs = self.elapsed().as_secs_f64();
        if elapsed_secs < f64::EPSILON {
            return 0.0;
        }
        let moved = self.bytes_written.load(Ordering::Relaxed)
            + self.bytes_verified.load(Ordering::Relaxed);
        moved as f64 / elapsed_secs
    }

    #[must_use]
    pub fn snapshot(&self) -> RunMetricsSnapshot {
        RunMetricsSnapshot {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_verified: self.bytes_verified.load(Ordering::Relaxed),
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
            progress_updates: self.progress_updates.load(Ordering::Relaxed),
            throughput_bytes_per_second: self.throughput_bytes_per_second(),
            elapsed_secs: self.elapsed().as_secs_f64(),
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of run metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetricsSnapshot {
    pub bytes_written: u64,
    pub bytes_verified: u64,
    pub passes_completed: u64,
    pub mismatches: u64,
    pub progress_updates: u64,
    pub throughput_bytes_per_second: f64,
    pub elapsed_secs: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
