use thiserror::Error;

/// Primary error type for memtest operations.
///
/// Configuration and caller bugs are kept apart from `PatternMismatch`,
/// which is the one failure the tool exists to find.
#[derive(Error, Debug)]
pub enum MemtestError {
    // === Configuration Errors ===
    /// A configuration value was zero, negative, or overflowed when scaled.
    #[error("invalid configuration: {what} = {value}")]
    InvalidConfiguration { what: String, value: String },

    /// The partitioner was asked to split an empty buffer or across zero workers.
    #[error("invalid partition: {total_bytes} bytes across {worker_count} workers")]
    InvalidPartition {
        total_bytes: usize,
        worker_count: usize,
    },

    // === Memory Faults ===
    /// A verified byte differs from the value written to it.
    #[error(
        "{pass} pattern mismatch at offset {offset} (iteration {iteration}, worker {worker_id}): \
         expected 0x{expected:02X}, got 0x{actual:02X}"
    )]
    PatternMismatch {
        iteration: u64,
        worker_id: usize,
        pass: &'static str,
        offset: usize,
        expected: u8,
        actual: u8,
    },

    // === Resource Errors ===
    /// The test buffer could not be reserved at the requested size.
    #[error("failed to allocate {bytes} byte test buffer")]
    AllocationFailed { bytes: usize },

    /// Regions handed to the buffer do not tile it exactly.
    #[error("buffer layout error: {detail}")]
    BufferLayout { detail: String },

    /// A worker thread panicked before returning its outcome.
    #[error("worker {worker_id} panicked")]
    WorkerPanicked { worker_id: usize },

    /// I/O error while writing reports or logs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Internal Errors ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemtestError {
    /// Process exit code for this error (for CLI use).
    ///
    /// `0` is reserved for a passing run and is never returned here.
    #[allow(clippy::match_same_arms)]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfiguration { .. } => 2,
            Self::PatternMismatch { .. } => 1,
            Self::InvalidPartition { .. }
            | Self::AllocationFailed { .. }
            | Self::BufferLayout { .. }
            | Self::WorkerPanicked { .. }
            | Self::Io(_)
            | Self::Internal(_) => 1,
        }
    }

    /// Whether this error reports faulty memory rather than a tool problem.
    pub const fn is_memory_fault(&self) -> bool {
        matches!(self, Self::PatternMismatch { .. })
    }

    /// Whether the user can likely fix this without code changes.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. } | Self::AllocationFailed { .. } | Self::Io(_)
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidConfiguration { .. } => {
                Some("Block size and iterations must be positive integers")
            }
            Self::AllocationFailed { .. } => {
                Some("Request a smaller block size or free memory held by other processes")
            }
            Self::PatternMismatch { .. } => {
                Some("Re-run with the same seed; a repeatable mismatch indicates faulty memory")
            }
            _ => None,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(what: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidConfiguration {
            what: what.into(),
            value: value.to_string(),
        }
    }

    /// Create a buffer layout error.
    pub fn layout(detail: impl Into<String>) -> Self {
        Self::BufferLayout {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `MemtestError`.
pub type Result<T> = std::result::Result<T, MemtestError>;
