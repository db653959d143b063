//! eval-forge: sandboxed batch execution of evaluation tasks.
//!
//! Runs a list of tasks in sequential, fixed-size concurrent batches through
//! an execution backend (a chat-completion endpoint or a container runtime)
//! and appends one timed record per task to a JSON Lines file.

pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod execution;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod sanitize;

pub use config::ForgeConfig;
pub use error::{
    ConfigError, ExecutionError, InitError, LlmError, ReadinessError, RunError, TaskLoadError,
};
