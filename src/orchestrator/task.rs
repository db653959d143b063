//! Task list loading.
//!
//! The input is a JSON array of `{"id": ..., "prompt": ...}` objects.
//! `payload` and `command` are accepted in place of `prompt`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TaskLoadError;

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique within a run.
    pub id: String,
    /// Prompt or shell command handed to the executor.
    #[serde(rename = "prompt", alias = "payload", alias = "command")]
    pub payload: String,
}

impl Task {
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

/// Reads and validates a task list file.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>, TaskLoadError> {
    let content = fs::read_to_string(path).map_err(|source| TaskLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_tasks(&content)
}

/// Parses and validates a task list document.
pub fn parse_tasks(json: &str) -> Result<Vec<Task>, TaskLoadError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let serde_json::Value::Array(items) = value else {
        return Err(TaskLoadError::NotAList(json_kind(&value).to_string()));
    };

    let tasks = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<Task>(item).map_err(|e| TaskLoadError::Malformed {
                index,
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    validate_tasks(&tasks)?;
    Ok(tasks)
}

/// Rejects empty and duplicate ids.
pub fn validate_tasks(tasks: &[Task]) -> Result<(), TaskLoadError> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        if task.id.trim().is_empty() {
            return Err(TaskLoadError::EmptyId { index });
        }
        if !seen.insert(task.id.as_str()) {
            return Err(TaskLoadError::DuplicateId(task.id.clone()));
        }
    }
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
