//! Parallel chunked pattern-test engine.
//!
//! One shared buffer is allocated per run, split into disjoint regions, and
//! every region is exercised by its own worker thread with a fixed battery of
//! write/verify passes. Iterations are separated by a full join barrier.

pub mod buffer;
pub mod orchestrator;
pub mod partition;
pub mod pattern;
pub mod runner;

pub use buffer::TestBuffer;
pub use orchestrator::{RunReport, TestOrchestrator, TimedIteration};
pub use partition::partition;
pub use pattern::{ExpectedValueTrace, expected_value};
pub use runner::{
    ChunkTestRunner, NoInterceptor, PassContext, PassInterceptor, SettleDelay, progress_step,
};
