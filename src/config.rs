//! Run configuration.
//!
//! A [`ForgeConfig`] is built explicitly and passed to the resource resolver,
//! the executors and the orchestrator. Nothing reads configuration from
//! global state: environment variables are applied through an injectable
//! lookup so tests can supply their own.
//!
//! Precedence: built-in defaults < YAML file < environment < CLI flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::execution::resources::{
    builtin_image_defaults, deserialize_quantity, is_valid_cpus, is_valid_memory, ImageDefault,
};
use crate::sanitize::sanitize_image_name;

/// Default number of tasks executed concurrently.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Default location of the JSONL results file.
pub const DEFAULT_OUTPUT_PATH: &str = "./results/results.jsonl";

/// Configuration for a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Maximum number of tasks executed concurrently.
    pub batch_size: usize,
    /// Memory limit applied to every container launch, e.g. `4g`.
    #[serde(deserialize_with = "deserialize_quantity")]
    pub memory_override: Option<String>,
    /// CPU limit applied to every container launch, e.g. `2`.
    #[serde(deserialize_with = "deserialize_quantity")]
    pub cpu_override: Option<String>,
    /// JSONL file that receives one record per task.
    pub output_path: PathBuf,
    /// Per-image defaults, matched in declaration order.
    pub image_defaults: Vec<ImageDefault>,
    /// Container backend settings.
    pub container: ContainerSettings,
    /// LLM backend settings.
    pub llm: LlmSettings,
}

/// Settings for the container execution backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Container runtime binary.
    pub runtime: String,
    /// Image every task command runs in.
    pub image: Option<String>,
    /// Port the task's service listens on inside the container.
    pub port: Option<u16>,
    /// Deadline for the service to become reachable.
    pub readiness_timeout_ms: u64,
    /// Spacing between readiness attempts.
    pub readiness_interval_ms: u64,
    /// Launch containers even when already running inside one.
    pub allow_nested: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: None,
            port: None,
            readiness_timeout_ms: 30_000,
            readiness_interval_ms: 500,
            allow_nested: false,
        }
    }
}

/// Settings for the LLM execution backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Model identifier; the client default is used when absent.
    pub model: Option<String>,
    /// Optional system prompt sent before each task prompt.
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            memory_override: None,
            cpu_override: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            image_defaults: builtin_image_defaults(),
            container: ContainerSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

impl ForgeConfig {
    /// Parses a YAML configuration document. Missing fields take defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads a YAML configuration file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Loads the optional YAML file, then applies process environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an environment lookup.
    ///
    /// # Environment Variables
    ///
    /// - `EVAL_FORGE_BATCH_SIZE`: concurrency cap
    /// - `EVAL_FORGE_MEMORY`: memory override (e.g. `4g`)
    /// - `EVAL_FORGE_CPUS`: CPU override (e.g. `2`)
    /// - `EVAL_FORGE_OUTPUT`: results file
    /// - `EVAL_FORGE_RUNTIME`: container runtime binary
    /// - `EVAL_FORGE_IMAGE`: container image
    /// - `EVAL_FORGE_PORT`: service port inside the container
    /// - `EVAL_FORGE_MODEL`: LLM model
    ///
    /// Blank values are ignored.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(value) = get("EVAL_FORGE_BATCH_SIZE") {
            self.batch_size = parse_value("EVAL_FORGE_BATCH_SIZE", &value)?;
        }
        if let Some(value) = get("EVAL_FORGE_MEMORY") {
            self.memory_override = Some(value);
        }
        if let Some(value) = get("EVAL_FORGE_CPUS") {
            self.cpu_override = Some(value);
        }
        if let Some(value) = get("EVAL_FORGE_OUTPUT") {
            self.output_path = PathBuf::from(value);
        }
        if let Some(value) = get("EVAL_FORGE_RUNTIME") {
            self.container.runtime = value;
        }
        if let Some(value) = get("EVAL_FORGE_IMAGE") {
            self.container.image = Some(value);
        }
        if let Some(value) = get("EVAL_FORGE_PORT") {
            self.container.port = Some(parse_value("EVAL_FORGE_PORT", &value)?);
        }
        if let Some(value) = get("EVAL_FORGE_MODEL") {
            self.llm.model = Some(value);
        }

        Ok(self)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if let Some(memory) = &self.memory_override {
            if !is_valid_memory(memory) {
                return Err(invalid("memory_override", format!("'{}' is not a memory quantity", memory)));
            }
        }
        if let Some(cpus) = &self.cpu_override {
            if !is_valid_cpus(cpus) {
                return Err(invalid("cpu_override", format!("'{}' is not a CPU count", cpus)));
            }
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_path must not be empty".to_string(),
            ));
        }

        for (index, default) in self.image_defaults.iter().enumerate() {
            let key = format!("image_defaults[{}]", index);
            if default.key.trim().is_empty() {
                return Err(invalid(&key, "key must not be empty".to_string()));
            }
            if let Some(memory) = &default.memory {
                if !is_valid_memory(memory) {
                    return Err(invalid(&key, format!("'{}' is not a memory quantity", memory)));
                }
            }
            if let Some(cpus) = &default.cpus {
                if !is_valid_cpus(cpus) {
                    return Err(invalid(&key, format!("'{}' is not a CPU count", cpus)));
                }
            }
        }

        if self.container.runtime.trim().is_empty() {
            return Err(invalid("container.runtime", "must not be empty".to_string()));
        }
        if let Some(image) = &self.container.image {
            if sanitize_image_name(image).is_none() {
                return Err(invalid("container.image", format!("'{}' is not a valid image name", image)));
            }
        }
        if self.container.port == Some(0) {
            return Err(invalid("container.port", "must not be 0".to_string()));
        }
        if self.container.readiness_interval_ms == 0 {
            return Err(invalid(
                "container.readiness_interval_ms",
                "must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{}': {}", value, e),
    })
}
