//! Error types for eval-forge operations.
//!
//! Defines error types for every stage of a run:
//! - Configuration loading and validation
//! - Task list loading
//! - Execution capability initialization and per-task execution
//! - LLM API interactions
//! - Readiness polling of launched services
//!
//! Startup errors (`ConfigError`, `TaskLoadError`, `InitError`) abort a run.
//! `ExecutionError` is always converted into a failure record for the task
//! that produced it.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: neither LITELLM_API_BASE nor OPENROUTER_API_KEY is set")]
    MissingApiBase,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors raised while building or validating a [`crate::config::ForgeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised while loading the task list. Always fatal.
#[derive(Debug, Error)]
pub enum TaskLoadError {
    #[error("Failed to read task list '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task list is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task list must be a JSON array, got {0}")]
    NotAList(String),

    #[error("Task at index {index} is malformed: {message}")]
    Malformed { index: usize, message: String },

    #[error("Task at index {index} has an empty id")]
    EmptyId { index: usize },

    #[error("Duplicate task id '{0}'")]
    DuplicateId(String),
}

/// Errors raised when an execution capability fails to initialize. Always fatal.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Container runtime '{runtime}' is not available: {reason}")]
    RuntimeUnavailable { runtime: String, reason: String },

    #[error("Refusing nested container launches: process is already running inside a container ({0})")]
    NestedContainer(String),

    #[error("Invalid executor configuration: {0}")]
    InvalidConfig(String),

    #[error("LLM client error: {0}")]
    Llm(#[from] LlmError),
}

/// Errors raised while polling a service for readiness.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("Service on port {port} not ready after {timeout_ms}ms")]
    Timeout { port: u16, timeout_ms: u64 },

    #[error("Readiness polling of port {port} was cancelled")]
    Cancelled { port: u16 },

    #[error("Failed to build readiness HTTP client: {0}")]
    Client(String),
}

/// Errors raised by a single task execution. Converted into failure records.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("LLM response contained no content")]
    EmptyResponse,

    #[error("Refusing unsafe {kind}: {value:?}")]
    Rejected { kind: &'static str, value: String },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Container exited with non-zero code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Readiness check failed: {0}")]
    Readiness(#[from] ReadinessError),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Top-level error for a complete orchestrated run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load tasks: {0}")]
    Load(#[from] TaskLoadError),

    #[error("Failed to initialize executor: {0}")]
    Init(#[from] InitError),

    #[error("Failed to write results to '{target}': {source}")]
    Sink {
        target: String,
        #[source]
        source: std::io::Error,
    },
}
