//! Command-line interface for eval-forge.
//!
//! Provides commands for running task lists, inspecting resolved container
//! limits, reporting container detection, and polling service readiness.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands, ExecutorKind};
