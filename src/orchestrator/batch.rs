//! Sequential batches of concurrent task executions.
//!
//! A run moves through `Loading → Initializing → Batch(0..n) → Done`. Loading
//! and initialization failures abort before any record is written. Inside a
//! batch every task runs on its own tokio task so a panicking executor only
//! fails that task. Records are appended as tasks complete, and each batch is
//! flushed before the next one starts.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::record::{ExecutionRecord, Timing};
use super::sink::{JsonlSink, RecordSink};
use super::task::{load_tasks, validate_tasks, Task};
use crate::config::ForgeConfig;
use crate::error::{ExecutionError, RunError};
use crate::execution::{truncate, Executor};
use crate::metrics::MetricsCollector;

const MAX_ERROR_BYTES: usize = 4_000;

/// Stage of an orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Loading,
    Initializing,
    Batch(usize),
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Loading => write!(f, "loading"),
            RunPhase::Initializing => write!(f, "initializing"),
            RunPhase::Batch(index) => write!(f, "batch {}", index),
            RunPhase::Done => write!(f, "done"),
        }
    }
}

/// Totals for a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches: usize,
    pub elapsed_ms: u64,
}

impl RunSummary {
    fn count(&mut self, record: &ExecutionRecord) {
        self.total += 1;
        if record.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Runs task lists through an [`Executor`] in fixed-size batches.
pub struct BatchOrchestrator {
    executor: Arc<dyn Executor>,
    batch_size: usize,
    metrics: MetricsCollector,
}

impl BatchOrchestrator {
    /// Creates an orchestrator. A batch size of zero is treated as one.
    pub fn new(executor: Arc<dyn Executor>, batch_size: usize) -> Self {
        Self {
            executor,
            batch_size: batch_size.max(1),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn from_config(executor: Arc<dyn Executor>, config: &ForgeConfig) -> Self {
        Self::new(executor, config.batch_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Loads `tasks_path`, initializes the executor, then appends one record
    /// per task to the JSONL file at `output_path`.
    ///
    /// The output file is only opened after initialization succeeds.
    pub async fn run(&self, tasks_path: &Path, output_path: &Path) -> Result<RunSummary, RunError> {
        info!(phase = %RunPhase::Loading, path = %tasks_path.display(), "Loading tasks");
        let tasks = load_tasks(tasks_path)?;
        info!(count = tasks.len(), "Tasks loaded");

        self.initialize().await?;

        let mut sink = JsonlSink::open(output_path).map_err(|source| RunError::Sink {
            target: output_path.display().to_string(),
            source,
        })?;
        self.run_batches(tasks, &mut sink).await
    }

    /// Validates and runs an in-memory task list against `sink`.
    pub async fn run_tasks(
        &self,
        tasks: Vec<Task>,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary, RunError> {
        validate_tasks(&tasks)?;
        self.initialize().await?;
        self.run_batches(tasks, sink).await
    }

    async fn initialize(&self) -> Result<(), RunError> {
        info!(phase = %RunPhase::Initializing, executor = self.executor.kind(), "Initializing executor");
        self.executor.initialize().await?;
        Ok(())
    }

    async fn run_batches(
        &self,
        tasks: Vec<Task>,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let total_batches = tasks.len().div_ceil(self.batch_size);

        let mut remaining = tasks.into_iter().peekable();
        let mut index = 0;
        while remaining.peek().is_some() {
            let batch: Vec<Task> = remaining.by_ref().take(self.batch_size).collect();
            info!(
                phase = %RunPhase::Batch(index),
                batch = index,
                of = total_batches,
                size = batch.len(),
                "Starting batch"
            );
            self.run_batch(index, batch, sink, &mut summary).await?;
            summary.batches += 1;
            index += 1;
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            phase = %RunPhase::Done,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            batches = summary.batches,
            elapsed_ms = summary.elapsed_ms,
            "Run complete"
        );
        Ok(summary)
    }

    async fn run_batch(
        &self,
        index: usize,
        batch: Vec<Task>,
        sink: &mut dyn RecordSink,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        let mut pending: FuturesUnordered<_> = batch
            .into_iter()
            .map(|task| execute_task(Arc::clone(&self.executor), task, index, self.metrics.clone()))
            .collect();

        while let Some(record) = pending.next().await {
            if record.is_success() {
                info!(task_id = %record.id, batch = index, duration_ms = record.timing.duration_ms, "Task succeeded");
            } else {
                warn!(task_id = %record.id, batch = index, duration_ms = record.timing.duration_ms, "Task failed");
            }
            if let Err(source) = sink.write_record(&record) {
                // Executions already started must not outlive the run.
                let abandoned = pending.by_ref().count().await;
                warn!(batch = index, abandoned, "Sink failed; waited for in-flight tasks");
                return Err(RunError::Sink {
                    target: sink.target(),
                    source,
                });
            }
            summary.count(&record);
        }

        if let Err(source) = sink.flush() {
            return Err(RunError::Sink {
                target: sink.target(),
                source,
            });
        }
        self.metrics.record_batch();
        debug!(batch = index, "Batch flushed");
        Ok(())
    }
}

/// Runs one task on its own tokio task and turns the outcome into a record.
///
/// Timing brackets only the executor call inside the spawned task.
async fn execute_task(
    executor: Arc<dyn Executor>,
    task: Task,
    batch: usize,
    metrics: MetricsCollector,
) -> ExecutionRecord {
    let kind = executor.kind();
    let payload = task.payload;

    metrics.task_started();
    let handle = tokio::spawn(async move {
        let start = Utc::now();
        let result = AssertUnwindSafe(executor.execute(&payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ExecutionError::Panicked(panic_message(panic))));
        (Timing::between(start, Utc::now()), result)
    });
    let (timing, result) = match handle.await {
        Ok(finished) => finished,
        Err(e) => {
            let now = Utc::now();
            (Timing::between(now, now), Err(ExecutionError::Panicked(e.to_string())))
        }
    };
    metrics.task_finished();

    let record = match result {
        Ok(output) => ExecutionRecord::success(task.id, batch, output, timing),
        Err(e) => ExecutionRecord::failure(task.id, batch, truncate(&e.to_string(), MAX_ERROR_BYTES), timing),
    };
    metrics.record_task(record.status(), kind, timing.duration_ms as f64 / 1000.0);
    record
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InitError;
    use crate::orchestrator::record::TaskOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails payloads containing "fail", panics on "panic", sleeps an extra
    /// 200ms on "slow", echoes the rest.
    #[derive(Default)]
    struct ScriptedExecutor {
        fail_init: bool,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        async fn initialize(&self) -> Result<(), InitError> {
            if self.fail_init {
                return Err(InitError::InvalidConfig("scripted failure".to_string()));
            }
            Ok(())
        }

        async fn execute(&self, payload: &str) -> Result<String, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if payload.contains("slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);

            if payload.contains("panic") {
                panic!("executor blew up");
            }
            if payload.contains("fail") {
                return Err(ExecutionError::EmptyResponse);
            }
            Ok(format!("done: {}", payload))
        }
    }

    fn tasks(n: usize) -> Vec<Task> {
        (1..=n)
            .map(|i| Task::new(format!("t{}", i), format!("payload {}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let mut list = tasks(5);
        list[2].payload = "please fail".to_string();

        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedExecutor::default()), 2);
        let mut sink: Vec<ExecutionRecord> = Vec::new();
        let summary = orchestrator.run_tasks(list, &mut sink).await.unwrap();

        assert_eq!(sink.len(), 5);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);

        let failures: Vec<_> = sink.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "t3");
        assert_eq!(failures[0].batch, 1);
    }

    #[tokio::test]
    async fn test_batches_are_sequential_and_counted() {
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedExecutor::default()), 3);
        let mut sink: Vec<ExecutionRecord> = Vec::new();
        let summary = orchestrator.run_tasks(tasks(7), &mut sink).await.unwrap();

        assert_eq!(summary.total, 7);
        assert_eq!(summary.batches, 3);
        let batches: Vec<usize> = sink.iter().map(|r| r.batch).collect();
        assert!(batches.windows(2).all(|w| w[0] <= w[1]), "out of order: {:?}", batches);
        assert_eq!(batches.iter().filter(|b| **b == 2).count(), 1);

        let mut ids: Vec<&str> = sink.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t4", "t5", "t6", "t7"]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_batch_size() {
        let executor = Arc::new(ScriptedExecutor {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let orchestrator = BatchOrchestrator::new(executor.clone(), 3);
        let mut sink: Vec<ExecutionRecord> = Vec::new();
        orchestrator.run_tasks(tasks(8), &mut sink).await.unwrap();

        assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_tasks_in_a_batch_overlap() {
        let orchestrator = BatchOrchestrator::new(
            Arc::new(ScriptedExecutor {
                delay: Duration::from_millis(100),
                ..Default::default()
            }),
            4,
        );
        let mut sink: Vec<ExecutionRecord> = Vec::new();
        let summary = orchestrator.run_tasks(tasks(4), &mut sink).await.unwrap();
        assert!(summary.elapsed_ms < 350, "batch ran serially: {}ms", summary.elapsed_ms);
        assert!(sink.iter().all(|r| r.timing.duration_ms >= 90));
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_record() {
        let mut list = tasks(3);
        list[1].payload = "panic now".to_string();

        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedExecutor::default()), 3);
        let mut sink: Vec<ExecutionRecord> = Vec::new();
        let summary = orchestrator.run_tasks(list, &mut sink).await.unwrap();

        assert_eq!(summary.failed, 1);
        let failed = sink.iter().find(|r| r.id == "t2").unwrap();
        match &failed.outcome {
            TaskOutcome::Failure { error } => assert!(error.contains("executor blew up")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_init_failure_writes_nothing() {
        let executor = Arc::new(ScriptedExecutor {
            fail_init: true,
            ..Default::default()
        });
        let orchestrator = BatchOrchestrator::new(executor.clone(), 2);
        let mut sink: Vec<ExecutionRecord> = Vec::new();

        let err = orchestrator.run_tasks(tasks(3), &mut sink).await.unwrap_err();
        assert!(matches!(err, RunError::Init(_)));
        assert!(sink.is_empty());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_fatal() {
        let list = vec![Task::new("a", "x"), Task::new("a", "y")];
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedExecutor::default()), 2);
        let mut sink: Vec<ExecutionRecord> = Vec::new();

        let err = orchestrator.run_tasks(list, &mut sink).await.unwrap_err();
        assert!(matches!(err, RunError::Load(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedExecutor::default()), 5);
        let mut sink: Vec<ExecutionRecord> = Vec::new();
        let summary = orchestrator.run_tasks(Vec::new(), &mut sink).await.unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.batches, 0);
    }

    struct BrokenSink;

    impl RecordSink for BrokenSink {
        fn write_record(&mut self, _record: &ExecutionRecord) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        fn target(&self) -> String {
            "broken".to_string()
        }
    }

    #[tokio::test]
    async fn test_sink_failure_is_fatal() {
        let executor = Arc::new(ScriptedExecutor::default());
        let orchestrator = BatchOrchestrator::new(executor.clone(), 2);

        let err = orchestrator.run_tasks(tasks(4), &mut BrokenSink).await.unwrap_err();
        assert!(matches!(err, RunError::Sink { ref target, .. } if target == "broken"));
        assert!(executor.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_sink_failure_waits_for_in_flight_tasks() {
        let executor = Arc::new(ScriptedExecutor::default());
        let orchestrator = BatchOrchestrator::new(executor.clone(), 3);
        let list = vec![
            Task::new("fast", "quick"),
            Task::new("slow-1", "slow one"),
            Task::new("slow-2", "slow two"),
        ];

        let err = orchestrator.run_tasks(list, &mut BrokenSink).await.unwrap_err();
        assert!(matches!(err, RunError::Sink { .. }));

        // Nothing from the failed batch may still be running once the run returns.
        let finished_at_return = executor.finished.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(finished_at_return, 3);
        assert_eq!(executor.finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timing_covers_only_the_executor_call() {
        let executor = Arc::new(ScriptedExecutor::default());
        let orchestrator = BatchOrchestrator::new(executor, 2);
        let mut sink: Vec<ExecutionRecord> = Vec::new();
        orchestrator
            .run_tasks(vec![Task::new("fast", "quick"), Task::new("slow", "slow")], &mut sink)
            .await
            .unwrap();

        let fast = sink.iter().find(|r| r.id == "fast").unwrap();
        let slow = sink.iter().find(|r| r.id == "slow").unwrap();
        assert!(fast.timing.duration_ms < 150, "fast took {}ms", fast.timing.duration_ms);
        assert!(slow.timing.duration_ms >= 190, "slow took {}ms", slow.timing.duration_ms);
        assert_eq!(
            slow.timing.end_epoch_ms - slow.timing.start_epoch_ms,
            slow.timing.duration_ms as i64
        );
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedExecutor::default()), 0);
        assert_eq!(orchestrator.batch_size(), 1);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(RunPhase::Loading.to_string(), "loading");
        assert_eq!(RunPhase::Batch(2).to_string(), "batch 2");
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }
}
