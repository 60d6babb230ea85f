//! Structured logging for the `memtest` binary.
//!
//! Human-readable compact output goes to stderr. With `--log-file` every
//! event is also written as one JSON object per line, carrying the engine's
//! structured fields (`worker_id`, `iteration`, `pass`, `offset`, ...).

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Returned by [`init_logging`]; reports where the JSON log is written.
#[derive(Debug, Default)]
pub struct LogGuard {
    pub log_path: Option<PathBuf>,
    /// Whether this call installed the global subscriber.
    pub installed: bool,
}

/// A `MakeWriter` that serializes whole events onto one shared file.
#[derive(Clone)]
struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

impl SharedFileWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileGuard {
            guard: self.file.lock(),
        }
    }
}

/// Holds the file lock for the duration of one event.
struct SharedFileGuard<'a> {
    guard: MutexGuard<'a, File>,
}

impl io::Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.guard, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut *self.guard)
    }
}

/// Default filter directive: `debug` when verbose, otherwise `warn`.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}

fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default level. If a subscriber is already
/// installed the call is a no-op and `installed` is false.
///
/// # Errors
///
/// Returns an I/O error if `log_file` cannot be created.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> io::Result<LogGuard> {
    let json_layer = match log_file {
        Some(path) => {
            let writer = SharedFileWriter::new(File::create(path)?);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true),
            )
        }
        None => None,
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact();

    let installed = tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(terminal_layer)
        .with(json_layer)
        .try_init()
        .is_ok();

    Ok(LogGuard {
        log_path: log_file.map(Path::to_path_buf),
        installed,
    })
}

/// Run `f`, logging its duration and whether it succeeded.
pub fn log_timed_operation<T, E: std::fmt::Display>(
    operation: &str,
    subject: &str,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let start = Instant::now();
    let result = f();
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match &result {
        Ok(_) => {
            tracing::info!(operation, subject, elapsed_ms, success = true, "operation complete");
        }
        Err(e) => {
            tracing::warn!(
                operation,
                subject,
                elapsed_ms,
                success = false,
                error = %e,
                "operation failed"
            );
        }
    }

    result
}
