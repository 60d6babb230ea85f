//! Per-region and per-iteration test outcomes.

use memtest_error::MemtestError;
use serde::Serialize;

use crate::region::MemoryRegion;

/// The first byte that failed verification in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatternMismatch {
    /// Global buffer offset of the mismatching byte.
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
    pub pass_index: usize,
    pub pass_name: &'static str,
}

impl PatternMismatch {
    /// Lift the mismatch into the error taxonomy with its run context.
    #[must_use]
    pub fn into_error(self, iteration: u64, worker_id: usize) -> MemtestError {
        MemtestError::PatternMismatch {
            iteration,
            worker_id,
            pass: self.pass_name,
            offset: self.offset,
            expected: self.expected,
            actual: self.actual,
        }
    }
}

/// Result of one worker's battery over its region for one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    pub worker_id: usize,
    pub region: MemoryRegion,
    /// Passes that completed verification without a mismatch.
    pub passes_completed: usize,
    pub mismatch: Option<PatternMismatch>,
}

impl TestOutcome {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.mismatch.is_none()
    }

    #[must_use]
    pub fn failing_offset(&self) -> Option<usize> {
        self.mismatch.map(|m| m.offset)
    }

    #[must_use]
    pub fn expected(&self) -> Option<u8> {
        self.mismatch.map(|m| m.expected)
    }

    #[must_use]
    pub fn actual(&self) -> Option<u8> {
        self.mismatch.map(|m| m.actual)
    }

    /// Name of the failing pass, if any.
    #[must_use]
    pub fn pass_name(&self) -> Option<&'static str> {
        self.mismatch.map(|m| m.pass_name)
    }
}

/// Aggregate of every worker's outcome for one iteration.
///
/// `regions` is ordered by worker id, so the first failing entry is the one
/// reported when several workers fail in the same iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationOutcome {
    /// 1-based iteration number.
    pub iteration: u64,
    pub regions: Vec<TestOutcome>,
}

impl IterationOutcome {
    /// Logical AND of every worker's outcome.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.regions.iter().all(TestOutcome::passed)
    }

    /// Failing outcome with the lowest worker id.
    #[must_use]
    pub fn first_failure(&self) -> Option<&TestOutcome> {
        self.regions
            .iter()
            .filter(|outcome| !outcome.passed())
            .min_by_key(|outcome| outcome.worker_id)
    }

    #[must_use]
    pub fn failed_workers(&self) -> usize {
        self.regions.iter().filter(|o| !o.passed()).count()
    }

    /// Convert the first failure (if any) into a `PatternMismatch` error.
    #[must_use]
    pub fn to_error(&self) -> Option<MemtestError> {
        self.first_failure().and_then(|outcome| {
            outcome
                .mismatch
                .map(|m| m.into_error(self.iteration, outcome.worker_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(worker_id: usize, mismatch_at: Option<usize>) -> TestOutcome {
        let start = worker_id * 256;
        TestOutcome {
            worker_id,
            region: MemoryRegion::new(start, start + 256).unwrap(),
            passes_completed: if mismatch_at.is_some() { 2 } else { 6 },
            mismatch: mismatch_at.map(|offset| PatternMismatch {
                offset,
                expected: 0xFF,
                actual: 0x00,
                pass_index: 2,
                pass_name: "0xFF",
            }),
        }
    }

    #[test]
    fn passing_outcome_has_no_diagnostics() {
        let ok = outcome(0, None);
        assert!(ok.passed());
        assert_eq!(ok.failing_offset(), None);
        assert_eq!(ok.expected(), None);
        assert_eq!(ok.actual(), None);
        assert_eq!(ok.pass_name(), None);
    }

    #[test]
    fn failing_outcome_exposes_diagnostics() {
        let bad = outcome(3, Some(900));
        assert!(!bad.passed());
        assert_eq!(bad.failing_offset(), Some(900));
        assert_eq!(bad.expected(), Some(0xFF));
        assert_eq!(bad.actual(), Some(0x00));
        assert_eq!(bad.pass_name(), Some("0xFF"));
    }

    #[test]
    fn iteration_is_and_of_regions() {
        let all_ok = IterationOutcome {
            iteration: 1,
            regions: (0..4).map(|w| outcome(w, None)).collect(),
        };
        assert!(all_ok.passed());
        assert!(all_ok.first_failure().is_none());
        assert!(all_ok.to_error().is_none());

        let one_bad = IterationOutcome {
            iteration: 1,
            regions: vec![outcome(0, None), outcome(1, Some(300))],
        };
        assert!(!one_bad.passed());
        assert_eq!(one_bad.failed_workers(), 1);
    }

    #[test]
    fn first_failure_breaks_ties_by_worker_id() {
        let iteration = IterationOutcome {
            iteration: 2,
            regions: vec![
                outcome(0, None),
                outcome(1, Some(300)),
                outcome(2, None),
                outcome(3, Some(900)),
            ],
        };
        let first = iteration.first_failure().unwrap();
        assert_eq!(first.worker_id, 1);
        assert_eq!(first.failing_offset(), Some(300));

        let err = iteration.to_error().unwrap();
        assert!(matches!(
            err,
            MemtestError::PatternMismatch {
                iteration: 2,
                worker_id: 1,
                offset: 300,
                ..
            }
        ));
    }

    #[test]
    fn outcome_serializes_for_reports() {
        let json = serde_json::to_value(outcome(3, Some(900))).unwrap();
        assert_eq!(json["worker_id"], 3);
        assert_eq!(json["mismatch"]["offset"], 900);
        assert_eq!(json["mismatch"]["pass_name"], "0xFF");
    }
}
