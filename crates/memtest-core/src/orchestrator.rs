//! Run lifecycle: allocate once, then fan out one runner per region per
//! iteration, join, reduce, and stop at the first failing iteration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use memtest_error::{MemtestError, Result};
use memtest_observability::{
    NoOpProgress, NoOpRunObserver, ProgressSink, RunMetrics, RunMetricsSnapshot, RunObserver,
};
use memtest_types::{
    IterationOutcome, RunConfig, RunPlan, TestOutcome, derive_iteration_seed, derive_worker_seed,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::buffer::TestBuffer;
use crate::partition::partition;
use crate::runner::{ChunkTestRunner, NoInterceptor, PassInterceptor};

/// One iteration's outcome with its wall-clock duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimedIteration {
    pub outcome: IterationOutcome,
    pub duration_micros: u64,
}

/// Final result of a run that was able to execute.
///
/// A detected mismatch is a completed run with `passed == false`, not an
/// `Err`; use [`RunReport::ensure_passed`] to turn it into one.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub plan: RunPlan,
    pub passed: bool,
    pub iterations: Vec<TimedIteration>,
    /// 1-based iteration in which the run failed.
    pub failed_iteration: Option<u64>,
    /// Failing outcome with the lowest worker id in the failed iteration.
    pub first_failure: Option<TestOutcome>,
    pub metrics: RunMetricsSnapshot,
    pub total_duration_micros: u64,
}

impl RunReport {
    /// `Ok(())` for a passing run, otherwise the first mismatch as an error.
    ///
    /// # Errors
    ///
    /// Returns `PatternMismatch` carrying the first failure's diagnostics.
    pub fn ensure_passed(&self) -> Result<()> {
        if self.passed {
            return Ok(());
        }
        // A run halts on its first failing iteration, so it is the last one.
        match self.iterations.last().and_then(|last| last.outcome.to_error()) {
            Some(err) => Err(err),
            None => Err(MemtestError::internal("failed run without a recorded failure")),
        }
    }

    /// Number of iterations that ran, including a failing one.
    #[must_use]
    pub fn iterations_run(&self) -> usize {
        self.iterations.len()
    }
}

/// Drives a whole run over one shared buffer.
///
/// Collaborators default to no-ops and are replaced with the `with_*`
/// builders. They may borrow from the caller for `'a`.
///
/// The run seed is fixed at construction, so [`TestOrchestrator::plan`] shows
/// the seed every later [`TestOrchestrator::run`] uses.
pub struct TestOrchestrator<'a> {
    config: RunConfig,
    seed: u64,
    progress: Arc<dyn ProgressSink + 'a>,
    observer: Arc<dyn RunObserver + 'a>,
    interceptor: Arc<dyn PassInterceptor + 'a>,
    metrics: Arc<RunMetrics>,
}

impl<'a> TestOrchestrator<'a> {
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self {
            seed: config.seed().unwrap_or_else(rand::random),
            config,
            progress: Arc::new(NoOpProgress),
            observer: Arc::new(NoOpRunObserver),
            interceptor: Arc::new(NoInterceptor),
            metrics: Arc::new(RunMetrics::new()),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink + 'a>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver + 'a>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn PassInterceptor + 'a>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Resolve workers and seed and partition the buffer, without allocating.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPartition` if the partitioner rejects the inputs.
    pub fn plan(&self) -> Result<RunPlan> {
        let block_size_bytes = self.config.block_size_bytes();
        let regions = partition(block_size_bytes, self.config.resolved_workers())?;
        Ok(RunPlan {
            block_size_bytes,
            iterations: self.config.iterations(),
            worker_count: regions.len(),
            seed: self.seed,
            regions,
        })
    }

    /// Execute the run.
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailed` before any testing if the buffer cannot be
    /// reserved, `WorkerPanicked` if a runner thread panics, and
    /// `BufferLayout`/`InvalidPartition` for caller bugs. A memory mismatch
    /// is reported through the returned [`RunReport`].
    ///
    /// Metrics in the report cover this call only.
    pub fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let plan = self.plan()?;
        let mut buffer = TestBuffer::allocate(plan.block_size_bytes)?;
        self.metrics.reset();

        info!(
            block_size_bytes = plan.block_size_bytes,
            iterations = plan.iterations,
            workers = plan.worker_count,
            seed = plan.seed,
            "memtest run start"
        );
        self.observer.on_run_start(&plan);

        let mut iterations = Vec::new();
        let mut failed_iteration = None;
        let mut first_failure = None;

        for iteration in 1..=plan.iterations {
            self.observer.on_iteration_start(iteration);
            let iteration_started = Instant::now();
            let outcome = match self.run_iteration(&mut buffer, &plan, iteration) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.observer
                        .on_run_complete(false, micros(started.elapsed()));
                    return Err(err);
                }
            };
            let duration_micros = micros(iteration_started.elapsed());
            self.observer
                .on_iteration_complete(iteration, duration_micros, &outcome);

            let failure = outcome.first_failure().cloned();
            iterations.push(TimedIteration {
                outcome,
                duration_micros,
            });

            if let Some(failure) = failure {
                warn!(
                    iteration,
                    worker_id = failure.worker_id,
                    offset = failure.failing_offset(),
                    pass = failure.pass_name(),
                    "iteration failed, halting run"
                );
                failed_iteration = Some(iteration);
                first_failure = Some(failure);
                break;
            }
            info!(iteration, duration_micros, "iteration passed");
        }

        let passed = first_failure.is_none();
        let total_duration_micros = micros(started.elapsed());
        self.observer.on_run_complete(passed, total_duration_micros);
        info!(passed, total_duration_micros, "memtest run complete");

        Ok(RunReport {
            plan,
            passed,
            iterations,
            failed_iteration,
            first_failure,
            metrics: self.metrics.snapshot(),
            total_duration_micros,
        })
    }

    fn run_iteration(
        &self,
        buffer: &mut TestBuffer,
        plan: &RunPlan,
        iteration: u64,
    ) -> Result<IterationOutcome> {
        let slices = buffer.split_regions(&plan.regions)?;
        let iteration_seed = derive_iteration_seed(plan.seed, iteration);
        let progress: &dyn ProgressSink = &*self.progress;
        let interceptor: &dyn PassInterceptor = &*self.interceptor;
        let metrics: &RunMetrics = &self.metrics;

        let joined: Vec<Option<Result<TestOutcome>>> = std::thread::scope(|s| {
            let mut joins = Vec::with_capacity(slices.len());
            for (worker_id, (bytes, &region)) in slices.into_iter().zip(&plan.regions).enumerate()
            {
                let runner =
                    ChunkTestRunner::new(worker_id, iteration, progress, interceptor, metrics);
                joins.push(s.spawn(move || {
                    let mut rng =
                        StdRng::seed_from_u64(derive_worker_seed(iteration_seed, worker_id));
                    runner.run_battery(bytes, region, &mut rng)
                }));
            }
            joins.into_iter().map(|join| join.join().ok()).collect()
        });

        // Every runner has finished; reduce in worker-id order.
        let mut regions = Vec::with_capacity(joined.len());
        for (worker_id, result) in joined.into_iter().enumerate() {
            match result {
                Some(outcome) => regions.push(outcome?),
                None => {
                    error!(worker_id, iteration, "worker thread panicked");
                    return Err(MemtestError::WorkerPanicked { worker_id });
                }
            }
        }
        Ok(IterationOutcome { iteration, regions })
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use memtest_types::BATTERY;

    use super::*;
    use crate::runner::PassContext;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl Events {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl RunObserver for Events {
        fn on_run_start(&self, plan: &RunPlan) {
            self.push(format!("start workers={}", plan.worker_count));
        }

        fn on_iteration_start(&self, iteration: u64) {
            self.push(format!("iter {iteration}"));
        }

        fn on_iteration_complete(&self, iteration: u64, _: u64, outcome: &IterationOutcome) {
            self.push(format!("done {iteration} passed={}", outcome.passed()));
        }

        fn on_run_complete(&self, passed: bool, _: u64) {
            self.push(format!("end passed={passed}"));
        }
    }

    fn config(bytes: usize, iterations: u64, workers: usize) -> RunConfig {
        RunConfig::new(bytes, iterations)
            .unwrap()
            .with_workers(workers)
            .with_seed(0x5EED)
    }

    #[test]
    fn clean_run_passes_all_iterations() {
        let events = Arc::new(Events::default());
        let report = TestOrchestrator::new(config(4096, 3, 4))
            .with_observer(events.clone())
            .run()
            .unwrap();
        assert!(report.passed);
        assert_eq!(report.iterations_run(), 3);
        assert!(report.ensure_passed().is_ok());
        assert_eq!(report.plan.seed, 0x5EED);
        assert_eq!(report.metrics.passes_completed, 3 * 4 * BATTERY.len() as u64);
        assert_eq!(
            events.take(),
            [
                "start workers=4",
                "iter 1",
                "done 1 passed=true",
                "iter 2",
                "done 2 passed=true",
                "iter 3",
                "done 3 passed=true",
                "end passed=true",
            ]
        );
    }

    struct FailOnIteration {
        iteration: u64,
        worker_id: usize,
    }

    impl PassInterceptor for FailOnIteration {
        fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
            if ctx.iteration == self.iteration && ctx.worker_id == self.worker_id {
                region_bytes[0] = !region_bytes[0];
            }
        }
    }

    #[test]
    fn failure_halts_remaining_iterations() {
        let events = Arc::new(Events::default());
        let report = TestOrchestrator::new(config(1024, 5, 2))
            .with_observer(events.clone())
            .with_interceptor(Arc::new(FailOnIteration {
                iteration: 2,
                worker_id: 1,
            }))
            .run()
            .unwrap();
        assert!(!report.passed);
        assert_eq!(report.iterations_run(), 2);
        assert_eq!(report.failed_iteration, Some(2));
        let failure = report.first_failure.as_ref().unwrap();
        assert_eq!(failure.worker_id, 1);
        assert_eq!(failure.failing_offset(), Some(512));
        assert_eq!(failure.pass_name(), Some("0xAA"));

        let err = report.ensure_passed().unwrap_err();
        assert!(err.is_memory_fault());
        assert!(matches!(
            err,
            MemtestError::PatternMismatch {
                iteration: 2,
                worker_id: 1,
                offset: 512,
                expected: 0xAA,
                actual: 0x55,
                ..
            }
        ));
        assert_eq!(events.take().last().map(String::as_str), Some("end passed=false"));
    }

    struct Panics;

    impl PassInterceptor for Panics {
        fn after_write(&self, ctx: &PassContext, _: &mut [u8]) {
            assert!(ctx.worker_id != 1, "injected worker panic");
        }
    }

    #[test]
    fn worker_panic_is_reported_after_join() {
        let events = Arc::new(Events::default());
        let err = TestOrchestrator::new(config(1024, 1, 3))
            .with_observer(events.clone())
            .with_interceptor(Arc::new(Panics))
            .run()
            .unwrap_err();
        assert!(matches!(err, MemtestError::WorkerPanicked { worker_id: 1 }));
        assert_eq!(
            events.take(),
            ["start workers=3", "iter 1", "end passed=false"]
        );
    }

    #[test]
    fn repeated_runs_report_their_own_metrics() {
        let orchestrator = TestOrchestrator::new(config(1024, 1, 4));
        let first = orchestrator.run().unwrap();
        let second = orchestrator.run().unwrap();
        let per_run = 4 * BATTERY.len() as u64;
        assert_eq!(first.metrics.passes_completed, per_run);
        assert_eq!(second.metrics.passes_completed, per_run);
        assert_eq!(first.metrics.bytes_written, second.metrics.bytes_written);
        assert_eq!(second.metrics.bytes_written, 1024 * BATTERY.len() as u64);
    }

    #[test]
    fn unseeded_plan_matches_the_run() {
        let orchestrator =
            TestOrchestrator::new(RunConfig::new(256, 1).unwrap().with_workers(2));
        let planned = orchestrator.plan().unwrap().seed;
        assert_eq!(orchestrator.plan().unwrap().seed, planned);
        assert_eq!(orchestrator.run().unwrap().plan.seed, planned);
    }

    #[test]
    fn allocation_failure_precedes_testing() {
        struct CountStarts(AtomicU64);
        impl RunObserver for CountStarts {
            fn on_run_start(&self, _: &RunPlan) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let observer = Arc::new(CountStarts(AtomicU64::new(0)));
        let huge = RunConfig::new(usize::MAX, 1).unwrap().with_workers(1);
        let err = TestOrchestrator::new(huge)
            .with_observer(observer.clone())
            .run()
            .unwrap_err();
        assert!(matches!(err, MemtestError::AllocationFailed { .. }));
        assert_eq!(observer.0.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn plan_clamps_workers_to_buffer_size() {
        let plan = TestOrchestrator::new(config(3, 1, 16)).plan().unwrap();
        assert_eq!(plan.worker_count, 3);
        assert_eq!(plan.regions.len(), 3);
    }

    #[test]
    fn report_serializes() {
        let report = TestOrchestrator::new(config(256, 1, 2)).run().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["passed"], true);
        assert_eq!(json["plan"]["worker_count"], 2);
        assert_eq!(json["iterations"][0]["outcome"]["iteration"], 1);
        assert!(json["first_failure"].is_null());
    }
}
