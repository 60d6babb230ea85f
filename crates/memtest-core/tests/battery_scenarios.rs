//! End-to-end scenarios over the orchestrator with injected faults.

use std::sync::{Arc, Mutex};

use memtest_core::{PassContext, PassInterceptor, TestOrchestrator, partition};
use memtest_error::MemtestError;
use memtest_observability::{ProgressLog, RunObserver};
use memtest_types::{BATTERY, IterationOutcome, PassPhase, PatternKind, RunConfig};

/// Forces one global offset to a value right after a given pass is written.
struct ForceByte {
    pass: &'static str,
    offset: usize,
    value: u8,
}

impl PassInterceptor for ForceByte {
    fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
        if ctx.pass.name == self.pass {
            if let Some(local) = ctx.region.local(self.offset) {
                region_bytes[local] = self.value;
            }
        }
    }
}

fn four_worker_config(iterations: u64) -> RunConfig {
    RunConfig::new(1024, iterations)
        .unwrap()
        .with_workers(4)
        .with_seed(1)
}

#[test]
fn clean_kib_over_four_workers_passes() {
    let orchestrator = TestOrchestrator::new(four_worker_config(1));
    let plan = orchestrator.plan().unwrap();
    let spans: Vec<(usize, usize)> = plan.regions.iter().map(|r| (r.start(), r.end())).collect();
    assert_eq!(spans, [(0, 256), (256, 512), (512, 768), (768, 1024)]);

    let report = orchestrator.run().unwrap();
    assert!(report.passed);
    assert_eq!(report.iterations_run(), 1);
    assert!(
        report.iterations[0]
            .outcome
            .regions
            .iter()
            .all(|o| o.passes_completed == BATTERY.len())
    );
}

#[test]
fn forced_zero_after_ff_write_halts_at_offset_900() {
    let log = Arc::new(ProgressLog::new(1 << 16));
    let report = TestOrchestrator::new(four_worker_config(3))
        .with_progress(log.clone())
        .with_interceptor(Arc::new(ForceByte {
            pass: "0xFF",
            offset: 900,
            value: 0x00,
        }))
        .run()
        .unwrap();

    assert!(!report.passed);
    assert_eq!(report.iterations_run(), 1);
    assert_eq!(report.failed_iteration, Some(1));

    let failure = report.first_failure.as_ref().unwrap();
    assert_eq!(failure.worker_id, 3);
    assert_eq!((failure.region.start(), failure.region.end()), (768, 1024));
    assert_eq!(failure.failing_offset(), Some(900));
    assert_eq!(failure.expected(), Some(0xFF));
    assert_eq!(failure.actual(), Some(0x00));
    assert_eq!(failure.pass_name(), Some("0xFF"));

    // The failing worker never started Incrementing or Random.
    let late_passes = log
        .for_worker(3)
        .into_iter()
        .filter(|u| u.pass_index >= 4)
        .count();
    assert_eq!(late_passes, 0);

    // Its 0xFF verify stopped before the end of the region.
    assert!(
        log.for_worker(3)
            .iter()
            .filter(|u| u.pass_name == "0xFF" && u.phase == PassPhase::Verify)
            .all(|u| u.units_done <= 900 - 768)
    );

    assert!(matches!(
        report.ensure_passed(),
        Err(MemtestError::PatternMismatch {
            iteration: 1,
            worker_id: 3,
            offset: 900,
            expected: 0xFF,
            actual: 0x00,
            ..
        })
    ));
}

#[test]
fn zero_workers_rejected_by_partitioner() {
    assert!(matches!(
        partition(1024, 0),
        Err(MemtestError::InvalidPartition { worker_count: 0, .. })
    ));
}

#[test]
fn lowest_worker_wins_when_several_fail() {
    struct CorruptAll;
    impl PassInterceptor for CorruptAll {
        fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
            if ctx.worker_id >= 1 {
                region_bytes[1] ^= 0xFF;
            }
        }
    }
    let report = TestOrchestrator::new(four_worker_config(1))
        .with_interceptor(Arc::new(CorruptAll))
        .run()
        .unwrap();
    let iteration = &report.iterations[0].outcome;
    assert_eq!(iteration.failed_workers(), 3);
    let failure = report.first_failure.unwrap();
    assert_eq!(failure.worker_id, 1);
    assert_eq!(failure.failing_offset(), Some(257));
}

#[test]
fn random_pass_fault_is_caught() {
    struct FlipRandom;
    impl PassInterceptor for FlipRandom {
        fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
            if matches!(ctx.pass.kind, PatternKind::Random) && ctx.worker_id == 0 {
                region_bytes[10] = region_bytes[10].wrapping_add(1);
            }
        }
    }
    let report = TestOrchestrator::new(four_worker_config(2))
        .with_interceptor(Arc::new(FlipRandom))
        .run()
        .unwrap();
    let failure = report.first_failure.unwrap();
    assert_eq!(failure.pass_name(), Some("Random"));
    assert_eq!(failure.failing_offset(), Some(10));
    assert_eq!(failure.passes_completed, 5);
}

#[test]
fn same_seed_writes_same_random_bytes() {
    struct Capture(Mutex<Vec<u8>>);
    impl PassInterceptor for Capture {
        fn after_write(&self, ctx: &PassContext, region_bytes: &mut [u8]) {
            if matches!(ctx.pass.kind, PatternKind::Random) {
                self.0.lock().unwrap().extend_from_slice(region_bytes);
            }
        }
    }

    let capture = |seed| {
        let capture = Arc::new(Capture(Mutex::default()));
        TestOrchestrator::new(RunConfig::new(512, 1).unwrap().with_workers(1).with_seed(seed))
            .with_interceptor(capture.clone())
            .run()
            .unwrap();
        std::mem::take(&mut *capture.0.lock().unwrap())
    };
    assert_eq!(capture(9), capture(9));
    assert_ne!(capture(9), capture(10));
}

#[test]
fn iteration_events_are_one_based() {
    #[derive(Default)]
    struct Iterations(Mutex<Vec<u64>>);
    impl RunObserver for Iterations {
        fn on_iteration_complete(&self, iteration: u64, _: u64, outcome: &IterationOutcome) {
            assert_eq!(outcome.iteration, iteration);
            self.0.lock().unwrap().push(iteration);
        }
    }
    let observer = Arc::new(Iterations::default());
    TestOrchestrator::new(four_worker_config(3))
        .with_observer(observer.clone())
        .run()
        .unwrap();
    assert_eq!(*observer.0.lock().unwrap(), [1, 2, 3]);
}
