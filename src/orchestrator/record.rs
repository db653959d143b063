//! Per-task execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single task, serialized with a `status` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { output: String },
    Failure { error: String },
}

/// Wall-clock bounds of the external call, in Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub start_epoch_ms: i64,
    pub end_epoch_ms: i64,
    pub duration_ms: u64,
}

impl Timing {
    /// Builds timing from two instants. An end before the start yields a
    /// zero duration.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let start_epoch_ms = start.timestamp_millis();
        let end_epoch_ms = end.timestamp_millis();
        Self {
            start_epoch_ms,
            end_epoch_ms,
            duration_ms: u64::try_from(end_epoch_ms - start_epoch_ms).unwrap_or(0),
        }
    }
}

/// Durable record of one task. Exactly one is written per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    /// Zero-based index of the batch the task ran in.
    pub batch: usize,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    pub timing: Timing,
}

impl ExecutionRecord {
    /// Creates a successful record.
    pub fn success(id: impl Into<String>, batch: usize, output: impl Into<String>, timing: Timing) -> Self {
        Self {
            id: id.into(),
            batch,
            outcome: TaskOutcome::Success {
                output: output.into(),
            },
            timing,
        }
    }

    /// Creates a failed record.
    pub fn failure(id: impl Into<String>, batch: usize, error: impl Into<String>, timing: Timing) -> Self {
        Self {
            id: id.into(),
            batch,
            outcome: TaskOutcome::Failure { error: error.into() },
            timing,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success { .. })
    }

    pub fn status(&self) -> &'static str {
        match self.outcome {
            TaskOutcome::Success { .. } => "success",
            TaskOutcome::Failure { .. } => "failure",
        }
    }
}
