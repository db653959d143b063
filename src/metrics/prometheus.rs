//! Prometheus metrics registration and export.
//!
//! Defines the metrics recorded by eval-forge runs and provides functions for
//! initializing, registering, and exporting them.

use prometheus::{Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all eval-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of tasks executed, labeled by status and executor.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Duration of the external call per task in seconds, labeled by executor.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Total number of batches completed.
pub static BATCHES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Number of task executions currently in flight.
pub static TASKS_IN_FLIGHT: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls register into a fresh registry that is
/// discarded, leaving the first set of metrics in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let tasks_total = CounterVec::new(
        Opts::new("eval_forge_tasks_total", "Total number of tasks executed"),
        &["status", "executor"],
    )?;

    let task_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "eval_forge_task_duration_seconds",
            "Task execution duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["executor"],
    )?;

    let batches_total = Counter::new("eval_forge_batches_total", "Total number of batches completed")?;

    let tasks_in_flight = Gauge::new(
        "eval_forge_tasks_in_flight",
        "Number of task executions currently in flight",
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(batches_total.clone()))?;
    registry.register(Box::new(tasks_in_flight.clone()))?;

    // Already-set statics mean metrics were initialized before.
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = BATCHES_TOTAL.set(batches_total);
    let _ = TASKS_IN_FLIGHT.set(tasks_in_flight);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry is uninitialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
