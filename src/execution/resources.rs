//! Resource limits for container launches.
//!
//! Limits come from two places: per-image defaults declared in configuration
//! and explicit memory/CPU overrides. An override always wins. Each quantity is
//! resolved independently, so an image default can supply the CPU count while
//! an override replaces only the memory limit.

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::ForgeConfig;

/// Default limits for images whose reference contains `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDefault {
    /// Substring matched against the image reference.
    pub key: String,
    /// Memory quantity such as `512m` or `2g`.
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub memory: Option<String>,
    /// CPU count such as `1`, `0.5` or `2`.
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub cpus: Option<String>,
}

impl ImageDefault {
    pub fn new(key: impl Into<String>, memory: Option<&str>, cpus: Option<&str>) -> Self {
        Self {
            key: key.into(),
            memory: memory.map(String::from),
            cpus: cpus.map(String::from),
        }
    }
}

/// Built-in image defaults, in match order.
///
/// Order matters: `node-chartjs` must be declared before any shorter key
/// (such as `node`) that would also match it.
pub fn builtin_image_defaults() -> Vec<ImageDefault> {
    vec![
        ImageDefault::new("alfonsograziano/node-chartjs", Some("2g"), Some("2")),
        ImageDefault::new("python", Some("1g"), Some("1")),
    ]
}

/// Returns true for memory quantities like `512`, `512m`, `1.5g` or `2G`.
pub fn is_valid_memory(value: &str) -> bool {
    let digits = value
        .strip_suffix(|c: char| matches!(c.to_ascii_lowercase(), 'b' | 'k' | 'm' | 'g'))
        .unwrap_or(value);
    is_positive_decimal(digits)
}

/// Returns true for CPU counts like `1`, `0.5` or `2.25`.
pub fn is_valid_cpus(value: &str) -> bool {
    is_positive_decimal(value)
}

fn is_positive_decimal(value: &str) -> bool {
    let mut parts = value.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();

    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    let well_formed = match fraction {
        Some(frac) => all_digits(whole) && all_digits(frac),
        None => all_digits(whole),
    };
    well_formed && value.chars().any(|c| c.is_ascii_digit() && c != '0')
}

/// Resolved memory and CPU limits for one launch.
///
/// Both fields are either a well-formed quantity or `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceLimitSpec {
    memory: Option<String>,
    cpus: Option<String>,
}

impl ResourceLimitSpec {
    /// Memory quantity, if limited.
    pub fn memory(&self) -> Option<&str> {
        self.memory.as_deref()
    }

    /// CPU count, if limited.
    pub fn cpus(&self) -> Option<&str> {
        self.cpus.as_deref()
    }

    /// Returns true when neither memory nor CPUs are limited.
    pub fn is_unrestricted(&self) -> bool {
        self.memory.is_none() && self.cpus.is_none()
    }

    /// `--memory <q>`, or an empty string when unlimited.
    pub fn memory_flag(&self) -> String {
        self.memory
            .as_ref()
            .map(|m| format!("--memory {}", m))
            .unwrap_or_default()
    }

    /// `--cpus <n>`, or an empty string when unlimited.
    pub fn cpu_flag(&self) -> String {
        self.cpus
            .as_ref()
            .map(|c| format!("--cpus {}", c))
            .unwrap_or_default()
    }

    /// The limit flags as separate argv entries.
    pub fn docker_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(memory) = &self.memory {
            args.push("--memory".to_string());
            args.push(memory.clone());
        }
        if let Some(cpus) = &self.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.clone());
        }
        args
    }
}

/// Computes [`ResourceLimitSpec`]s from image defaults and overrides.
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    defaults: Vec<ImageDefault>,
    memory_override: Option<String>,
    cpu_override: Option<String>,
}

impl ResourceResolver {
    /// Creates a resolver from explicit parts.
    pub fn new(
        defaults: Vec<ImageDefault>,
        memory_override: Option<String>,
        cpu_override: Option<String>,
    ) -> Self {
        Self {
            defaults,
            memory_override,
            cpu_override,
        }
    }

    /// Creates a resolver from a run configuration.
    pub fn from_config(config: &ForgeConfig) -> Self {
        Self::new(
            config.image_defaults.clone(),
            config.memory_override.clone(),
            config.cpu_override.clone(),
        )
    }

    /// Finds the first declared default whose key occurs in `image`.
    ///
    /// Overlapping keys resolve to whichever was declared first, not to the
    /// most specific match.
    pub fn matching_default(&self, image: &str) -> Option<&ImageDefault> {
        self.defaults
            .iter()
            .find(|d| !d.key.is_empty() && image.contains(d.key.as_str()))
    }

    /// Resolves the limits for `image`. An empty image yields no limits, even
    /// when overrides are configured.
    pub fn resolve(&self, image: &str) -> ResourceLimitSpec {
        if image.is_empty() {
            return ResourceLimitSpec::default();
        }

        let matched = self.matching_default(image);
        let memory = pick(
            self.memory_override.as_deref(),
            matched.and_then(|d| d.memory.as_deref()),
            is_valid_memory,
        );
        let cpus = pick(
            self.cpu_override.as_deref(),
            matched.and_then(|d| d.cpus.as_deref()),
            is_valid_cpus,
        );

        tracing::debug!(
            image = image,
            matched = matched.map(|d| d.key.as_str()).unwrap_or("none"),
            memory = memory.as_deref().unwrap_or("unlimited"),
            cpus = cpus.as_deref().unwrap_or("unlimited"),
            "Resolved resource limits"
        );

        ResourceLimitSpec { memory, cpus }
    }
}

/// Override first, then default. Blank or malformed values count as absent.
fn pick(
    override_value: Option<&str>,
    default_value: Option<&str>,
    is_valid: fn(&str) -> bool,
) -> Option<String> {
    [override_value, default_value]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .filter(|v| {
            let ok = is_valid(v);
            if !ok {
                tracing::warn!(value = *v, "Ignoring malformed resource quantity");
            }
            ok
        })
        .map(String::from)
}

/// Accepts `2`, `0.5` or `"2g"` in YAML/JSON and stores it as a string.
pub(crate) fn deserialize_quantity<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawQuantity {
        Text(String),
        Integer(u64),
        Float(f64),
    }

    let raw = Option::<RawQuantity>::deserialize(deserializer)?;
    Ok(raw
        .map(|q| match q {
            RawQuantity::Text(s) => s.trim().to_string(),
            RawQuantity::Integer(n) => n.to_string(),
            RawQuantity::Float(f) => f.to_string(),
        })
        .filter(|s| !s.is_empty()))
}
