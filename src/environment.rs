//! Best-effort detection of whether this process already runs inside a
//! container.
//!
//! Checks run in order and the first match wins:
//! 1. a sentinel file exists (`/.dockerenv`, `/run/.containerenv`)
//! 2. on Linux, the init process cgroup file names a known runtime
//! 3. a known environment variable is set
//!
//! Any read failure is inconclusive and falls through to the next check.

use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Which check identified the container environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionSource {
    /// A sentinel file exists.
    Sentinel(PathBuf),
    /// The cgroup file contains this runtime marker.
    ControlGroup(String),
    /// This environment variable is set.
    EnvVar(String),
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionSource::Sentinel(path) => write!(f, "sentinel file {}", path.display()),
            DetectionSource::ControlGroup(marker) => write!(f, "cgroup marker '{}'", marker),
            DetectionSource::EnvVar(name) => write!(f, "environment variable {}", name),
        }
    }
}

/// Paths, markers and variable names consulted by detection.
#[derive(Debug, Clone)]
pub struct ContainerDetector {
    pub sentinel_paths: Vec<PathBuf>,
    pub cgroup_path: PathBuf,
    pub cgroup_markers: Vec<String>,
    pub env_vars: Vec<String>,
}

impl Default for ContainerDetector {
    fn default() -> Self {
        Self {
            sentinel_paths: vec![
                PathBuf::from("/.dockerenv"),
                PathBuf::from("/run/.containerenv"),
            ],
            cgroup_path: PathBuf::from("/proc/1/cgroup"),
            cgroup_markers: ["docker", "kubepods", "containerd", "lxc", "libpod"]
                .into_iter()
                .map(String::from)
                .collect(),
            env_vars: vec!["KUBERNETES_SERVICE_HOST".to_string(), "container".to_string()],
        }
    }
}

impl ContainerDetector {
    /// Run detection against the real process environment.
    pub fn detect(&self) -> Option<DetectionSource> {
        self.detect_with(|name| std::env::var_os(name).is_some())
    }

    /// Run detection with a custom environment lookup.
    pub fn detect_with(&self, env_is_set: impl Fn(&str) -> bool) -> Option<DetectionSource> {
        if let Some(path) = self.sentinel_paths.iter().find(|p| p.exists()) {
            return Some(DetectionSource::Sentinel(path.clone()));
        }

        if let Some(marker) = self.cgroup_marker() {
            return Some(DetectionSource::ControlGroup(marker));
        }

        self.env_vars
            .iter()
            .find(|name| env_is_set(name))
            .map(|name| DetectionSource::EnvVar(name.clone()))
    }

    #[cfg(target_os = "linux")]
    fn cgroup_marker(&self) -> Option<String> {
        let content = match fs::read_to_string(&self.cgroup_path) {
            Ok(content) => content,
            Err(e) => {
                tracing::trace!(path = %self.cgroup_path.display(), error = %e, "cgroup file unreadable");
                return None;
            }
        };
        self.cgroup_markers
            .iter()
            .find(|marker| content.contains(marker.as_str()))
            .cloned()
    }

    #[cfg(not(target_os = "linux"))]
    fn cgroup_marker(&self) -> Option<String> {
        None
    }
}

/// Returns true when the current process appears to run inside a container.
pub fn is_running_in_container() -> bool {
    ContainerDetector::default().detect().is_some()
}
