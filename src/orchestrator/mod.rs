//! Batch orchestration of task lists.
//!
//! Tasks are loaded from a JSON array, run through an
//! [`crate::execution::Executor`] in sequential fixed-size batches, and
//! recorded one line per task in an append-only sink.

pub mod batch;
pub mod record;
pub mod sink;
pub mod task;

pub use batch::{BatchOrchestrator, RunPhase, RunSummary};
pub use record::{ExecutionRecord, TaskOutcome, Timing};
pub use sink::{JsonlSink, RecordSink};
pub use task::{load_tasks, parse_tasks, validate_tasks, Task};
