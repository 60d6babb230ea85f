//! Terminal progress bar and console reporting of iteration timings.

use std::io::Write;

use memtest_observability::{ProgressRender, ProgressSink, RunObserver, SerializedProgress};
use memtest_types::{BATTERY, BYTES_PER_MB, IterationOutcome, ProgressUpdate, RunPlan};

const BAR_WIDTH: usize = 40;
const RULE: &str = "--------------------------";

/// Single-line progress bar over the mean battery completion of all workers.
///
/// Redraws only when the whole-number percentage changes.
pub struct TerminalProgress<W> {
    out: W,
    enabled: bool,
    fractions: Vec<f64>,
    last_percent: Option<u32>,
    line_open: bool,
}

impl<W: Write + Send> TerminalProgress<W> {
    pub fn new(out: W, enabled: bool) -> Self {
        Self {
            out,
            enabled,
            fractions: Vec::new(),
            last_percent: None,
            line_open: false,
        }
    }

    /// Forget per-worker progress ahead of a new iteration.
    pub fn reset(&mut self, workers: usize) {
        self.fractions.clear();
        self.fractions.resize(workers, 0.0);
        self.last_percent = None;
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn overall_fraction(&self) -> f64 {
        if self.fractions.is_empty() {
            return 0.0;
        }
        self.fractions.iter().sum::<f64>() / self.fractions.len() as f64
    }

    /// Terminate the bar's line so other output starts on a fresh one.
    pub fn end_line(&mut self) {
        if self.line_open {
            let _ = writeln!(self.out);
            self.line_open = false;
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn draw_bar(fraction: f64) -> (String, u32) {
    let fraction = fraction.clamp(0.0, 1.0);
    let filled = (fraction * BAR_WIDTH as f64).round() as usize;
    let percent = (fraction * 100.0).floor() as u32;
    let bar = format!("{}{}", "=".repeat(filled), " ".repeat(BAR_WIDTH - filled));
    (bar, percent)
}

impl<W: Write + Send> ProgressRender for TerminalProgress<W> {
    fn render(&mut self, update: &ProgressUpdate) {
        if !self.enabled {
            return;
        }
        if self.fractions.len() <= update.worker_id {
            self.fractions.resize(update.worker_id + 1, 0.0);
        }
        self.fractions[update.worker_id] = update.battery_fraction(BATTERY.len());

        let (bar, percent) = draw_bar(self.overall_fraction());
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        let _ = write!(
            self.out,
            "\r[{bar}] {percent:>3}% worker {} {:<18}",
            update.worker_id,
            update.label()
        );
        let _ = self.out.flush();
        self.line_open = true;
    }

    fn finish(&mut self) {
        self.end_line();
    }
}

/// Milliseconds with two decimals, from microseconds.
#[allow(clippy::cast_precision_loss)]
fn millis(micros: u64) -> String {
    format!("{:.2}", micros as f64 / 1000.0)
}

/// Console front end: draws progress and prints the run's narrative.
///
/// Progress and reports share one writer behind one lock, so an iteration
/// report never lands in the middle of a progress line.
pub struct Console<W> {
    progress: SerializedProgress<TerminalProgress<W>>,
}

impl<W: Write + Send> Console<W> {
    pub fn new(out: W, show_progress: bool) -> Self {
        Self {
            progress: SerializedProgress::new(TerminalProgress::new(out, show_progress)),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.progress.into_inner().into_inner()
    }
}

impl<W: Write + Send> ProgressSink for Console<W> {
    fn report(&self, update: &ProgressUpdate) {
        self.progress.report(update);
    }
}

impl<W: Write + Send> RunObserver for Console<W> {
    fn on_run_start(&self, plan: &RunPlan) {
        self.progress.with_renderer(|term| {
            term.reset(plan.worker_count);
            let out = term.writer();
            let _ = writeln!(out, "\nStarting memory test with:");
            let _ = writeln!(
                out,
                "  Block Size: {} MB ({} bytes)",
                plan.block_size_bytes / BYTES_PER_MB,
                plan.block_size_bytes
            );
            let _ = writeln!(out, "  Iterations: {}", plan.iterations);
            let _ = writeln!(out, "  Workers: {}", plan.worker_count);
            let _ = writeln!(out, "  Seed: {}", plan.seed);
        });
    }

    fn on_iteration_start(&self, iteration: u64) {
        self.progress.with_renderer(|term| {
            let workers = term.fractions.len();
            term.reset(workers);
            let _ = writeln!(term.writer(), "\n--- Iteration {iteration} ---");
        });
    }

    fn on_iteration_complete(
        &self,
        iteration: u64,
        duration_micros: u64,
        outcome: &IterationOutcome,
    ) {
        self.progress.with_renderer(|term| {
            term.end_line();
            let out = term.writer();
            if let Some(failure) = outcome.first_failure() {
                if let Some(m) = failure.mismatch {
                    let _ = writeln!(
                        out,
                        "Error: {} pattern mismatch at offset {}. Expected 0x{:02X}, got 0x{:02X} \
                         (worker {})",
                        m.pass_name, m.offset, m.expected, m.actual, failure.worker_id
                    );
                }
            }
            let _ = writeln!(
                out,
                "Iteration {iteration} completed in {} ms.",
                millis(duration_micros)
            );
            if !outcome.passed() {
                let _ = writeln!(out, "Memory test failed during iteration {iteration}");
            }
        });
    }

    fn on_run_complete(&self, passed: bool, total_duration_micros: u64) {
        self.progress.with_renderer(|term| {
            term.end_line();
            let out = term.writer();
            let _ = writeln!(out, "\n{RULE}");
            if passed {
                let _ = writeln!(out, "All memory tests passed successfully!");
            } else {
                let _ = writeln!(out, "Memory test failed!");
            }
            let _ = writeln!(
                out,
                "Total test duration: {} ms.",
                millis(total_duration_micros)
            );
            let _ = out.flush();
        });
    }
}

/// Banner printed before intake.
pub fn write_banner<W: Write>(out: &mut W) -> std::io::Result<()> {
    writeln!(out, "User-Mode Memory Test")?;
    writeln!(out, "{RULE}")
}
