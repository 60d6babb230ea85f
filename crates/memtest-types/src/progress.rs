use serde::Serialize;

/// Which half of a pattern pass a progress update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PassPhase {
    Write,
    Verify,
}

impl PassPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Verify => "verify",
        }
    }

    const fn ordinal(self) -> usize {
        match self {
            Self::Write => 0,
            Self::Verify => 1,
        }
    }
}

/// Transient progress signal from one worker.
///
/// `units_done` counts offsets processed in the current phase of the current
/// pass; `units_total` is the worker's region length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub worker_id: usize,
    pub units_done: usize,
    pub units_total: usize,
    /// Position of the pass within the battery.
    pub pass_index: usize,
    pub pass_name: &'static str,
    pub phase: PassPhase,
}

impl ProgressUpdate {
    /// Human-readable label, e.g. `"0xAA verify"`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.pass_name, self.phase.as_str())
    }

    /// Whether this update closes its phase.
    #[must_use]
    pub const fn is_phase_complete(&self) -> bool {
        self.units_done >= self.units_total
    }

    /// Fraction of the worker's whole battery completed, in `[0, 1]`.
    ///
    /// Each pass contributes two equally weighted phases.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn battery_fraction(&self, battery_len: usize) -> f64 {
        if battery_len == 0 || self.units_total == 0 {
            return 0.0;
        }
        let phases_total = (battery_len * 2) as f64;
        let phases_done = (self.pass_index * 2 + self.phase.ordinal()) as f64;
        let within = self.units_done.min(self.units_total) as f64 / self.units_total as f64;
        ((phases_done + within) / phases_total).clamp(0.0, 1.0)
    }
}
