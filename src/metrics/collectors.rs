//! High-level recording interface over the Prometheus metrics.
//!
//! Every method is a no-op until [`super::init_metrics`] has run, so library
//! users and tests never need to set up a registry.

use super::prometheus::{BATCHES_TOTAL, TASKS_IN_FLIGHT, TASKS_TOTAL, TASK_DURATION};

/// Records orchestrator metrics.
///
/// # Example
///
/// ```ignore
/// use eval_forge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_task("success", "container", 1.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished task.
    ///
    /// # Arguments
    ///
    /// * `status` - `"success"` or `"failure"`
    /// * `executor` - backend kind, e.g. `"llm"` or `"container"`
    /// * `duration_secs` - time spent in the external call
    pub fn record_task(&self, status: &str, executor: &str, duration_secs: f64) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[status, executor]).inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration
                .with_label_values(&[executor])
                .observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            executor = executor,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    /// Record a completed batch.
    pub fn record_batch(&self) {
        if let Some(batches) = BATCHES_TOTAL.get() {
            batches.inc();
        }
    }

    /// Mark a task execution as started.
    pub fn task_started(&self) {
        if let Some(gauge) = TASKS_IN_FLIGHT.get() {
            gauge.inc();
        }
    }

    /// Mark a task execution as finished.
    pub fn task_finished(&self) {
        if let Some(gauge) = TASKS_IN_FLIGHT.get() {
            gauge.dec();
        }
    }
}
