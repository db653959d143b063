//! Execution layer for eval-forge tasks.
//!
//! Every backend implements [`Executor`], so the orchestrator's per-task
//! failure isolation is identical whether a task is a remote chat completion
//! or a command inside a throwaway container.
//!
//! # Architecture
//!
//! ```text
//! payload → Executor::execute → Ok(output) | Err(ExecutionError)
//!             ├── LlmExecutor        (chat completion, single attempt)
//!             └── ContainerExecutor  (sanitize → resolve limits → runtime → readiness)
//! ```

pub mod container;
pub mod llm;
pub mod readiness;
pub mod resources;

use async_trait::async_trait;

use crate::error::{ExecutionError, InitError};

pub use container::ContainerExecutor;
pub use llm::LlmExecutor;
pub use readiness::{wait_for_ready, wait_for_ready_with_cancel, ReadinessCheck};
pub use resources::{ImageDefault, ResourceLimitSpec, ResourceResolver};

/// An external capability that runs one task payload.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short backend name used in logs and metric labels.
    fn kind(&self) -> &'static str;

    /// Prepares the backend. Failure aborts the run before any task starts.
    async fn initialize(&self) -> Result<(), InitError>;

    /// Runs a single payload and returns its output.
    async fn execute(&self, payload: &str) -> Result<String, ExecutionError>;
}

/// Truncates `s` to at most `max` bytes on a char boundary, marking the cut.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
