//! Prometheus metrics for eval-forge runs.
//!
//! ```ignore
//! use eval_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_task("success", "llm", 1.2);
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{
    export_metrics, init_metrics, BATCHES_TOTAL, REGISTRY, TASKS_IN_FLIGHT, TASKS_TOTAL,
    TASK_DURATION,
};
