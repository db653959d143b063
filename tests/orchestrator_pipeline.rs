//! End-to-end runs of the batch orchestrator against file inputs and outputs.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use eval_forge::error::{ExecutionError, InitError, RunError};
use eval_forge::execution::{ContainerExecutor, Executor, LlmExecutor, ResourceResolver};
use eval_forge::llm::LiteLlmClient;
use eval_forge::orchestrator::{BatchOrchestrator, ExecutionRecord, TaskOutcome};
use eval_forge::sanitize::sanitize_image_name;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Uppercases payloads and fails any payload equal to "boom".
struct UppercaseExecutor {
    fail_init: bool,
}

#[async_trait]
impl Executor for UppercaseExecutor {
    fn kind(&self) -> &'static str {
        "uppercase"
    }

    async fn initialize(&self) -> Result<(), InitError> {
        if self.fail_init {
            return Err(InitError::InvalidConfig("not today".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, payload: &str) -> Result<String, ExecutionError> {
        if payload == "boom" {
            return Err(ExecutionError::EmptyResponse);
        }
        Ok(payload.to_uppercase())
    }
}

fn write_tasks(path: &Path, count: usize) {
    let tasks: Vec<serde_json::Value> = (1..=count)
        .map(|i| {
            let prompt = if i == 3 { "boom".to_string() } else { format!("task {}", i) };
            serde_json::json!({"id": format!("t{}", i), "prompt": prompt})
        })
        .collect();
    fs::write(path, serde_json::to_string(&tasks).unwrap()).unwrap();
}

fn read_records(path: &Path) -> Vec<ExecutionRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_run_writes_one_record_per_task() {
    let dir = tempfile::tempdir().unwrap();
    let tasks_path = dir.path().join("tasks.json");
    let output_path = dir.path().join("results/out.jsonl");
    write_tasks(&tasks_path, 5);

    let orchestrator = BatchOrchestrator::new(Arc::new(UppercaseExecutor { fail_init: false }), 2);
    let summary = orchestrator.run(&tasks_path, &output_path).await.unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.failed, 1);

    let records = read_records(&output_path);
    assert_eq!(records.len(), 5);
    for record in &records {
        assert!(record.timing.end_epoch_ms >= record.timing.start_epoch_ms);
        match (&record.id[..], &record.outcome) {
            ("t3", TaskOutcome::Failure { .. }) => {}
            ("t3", other) => panic!("t3 should fail, got {:?}", other),
            (_, TaskOutcome::Success { output }) => assert!(output.starts_with("TASK ")),
            (id, other) => panic!("{} should succeed, got {:?}", id, other),
        }
    }
}

#[tokio::test]
async fn test_second_run_appends() {
    let dir = tempfile::tempdir().unwrap();
    let tasks_path = dir.path().join("tasks.json");
    let output_path = dir.path().join("out.jsonl");
    write_tasks(&tasks_path, 2);

    let orchestrator = BatchOrchestrator::new(Arc::new(UppercaseExecutor { fail_init: false }), 5);
    orchestrator.run(&tasks_path, &output_path).await.unwrap();
    orchestrator.run(&tasks_path, &output_path).await.unwrap();

    assert_eq!(read_records(&output_path).len(), 4);
}

#[tokio::test]
async fn test_init_failure_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let tasks_path = dir.path().join("tasks.json");
    let output_path = dir.path().join("out.jsonl");
    write_tasks(&tasks_path, 3);

    let orchestrator = BatchOrchestrator::new(Arc::new(UppercaseExecutor { fail_init: true }), 2);
    let err = orchestrator.run(&tasks_path, &output_path).await.unwrap_err();

    assert!(matches!(err, RunError::Init(_)));
    assert!(!output_path.exists());
}

#[tokio::test]
async fn test_malformed_task_list_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let tasks_path = dir.path().join("tasks.json");
    let output_path = dir.path().join("out.jsonl");
    fs::write(&tasks_path, r#"{"tasks": []}"#).unwrap();

    let orchestrator = BatchOrchestrator::new(Arc::new(UppercaseExecutor { fail_init: false }), 2);
    let err = orchestrator.run(&tasks_path, &output_path).await.unwrap_err();

    assert!(matches!(err, RunError::Load(_)));
    assert!(!output_path.exists());
}

/// Minimal chat-completion server: prompts containing "explode" get a 500.
async fn serve_completions(listener: TcpListener) {
    loop {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let Ok(n) = socket.read(&mut chunk).await else { return };
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&chunk[..n]);
                if request_complete(&buf) {
                    break;
                }
            }
            let request = String::from_utf8_lossy(&buf);
            let (status, body) = if request.contains("explode") {
                ("500 Internal Server Error", r#"{"error":{"message":"model crashed"}}"#.to_string())
            } else {
                let reply = serde_json::json!({
                    "id": "gen-1",
                    "model": "stub-model",
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": "stub answer"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
                });
                ("200 OK", reply.to_string())
            };
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
    }
}

fn request_complete(buf: &[u8]) -> bool {
    let text = String::from_utf8_lossy(buf);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    buf.len() >= header_end + 4 + content_length
}

#[tokio::test]
async fn test_llm_executor_against_stub_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(serve_completions(listener));

    let dir = tempfile::tempdir().unwrap();
    let tasks_path = dir.path().join("tasks.json");
    let output_path = dir.path().join("out.jsonl");
    fs::write(
        &tasks_path,
        r#"[{"id": "a", "prompt": "hello"}, {"id": "b", "prompt": "please explode"}, {"id": "c", "payload": "again"}]"#,
    )
    .unwrap();

    let client = LiteLlmClient::new(base, None, "stub-model").unwrap();
    let executor = Arc::new(LlmExecutor::new(Arc::new(client)));
    let summary = BatchOrchestrator::new(executor, 3)
        .run(&tasks_path, &output_path)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);

    let records = read_records(&output_path);
    let failed = records.iter().find(|r| r.id == "b").unwrap();
    match &failed.outcome {
        TaskOutcome::Failure { error } => assert!(error.contains("model crashed"), "{}", error),
        other => panic!("expected failure, got {:?}", other),
    }
    let ok = records.iter().find(|r| r.id == "a").unwrap();
    assert_eq!(ok.outcome, TaskOutcome::Success { output: "stub answer".to_string() });
}

#[cfg(unix)]
#[tokio::test]
async fn test_container_executor_with_stand_in_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let tasks_path = dir.path().join("tasks.json");
    let output_path = dir.path().join("out.jsonl");
    fs::write(
        &tasks_path,
        r#"[{"id": "ok", "command": "node render.js > chart.png"}, {"id": "bad", "command": "rm `whoami`"}]"#,
    )
    .unwrap();

    let image = sanitize_image_name("alfonsograziano/node-chartjs:latest").unwrap();
    let resolver = ResourceResolver::new(
        eval_forge::execution::resources::builtin_image_defaults(),
        Some("4g".to_string()),
        None,
    );
    let executor = ContainerExecutor::new(image, resolver).with_runtime("echo");
    let summary = BatchOrchestrator::new(Arc::new(executor), 2)
        .run(&tasks_path, &output_path)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let records = read_records(&output_path);
    let ok = records.iter().find(|r| r.id == "ok").unwrap();
    match &ok.outcome {
        TaskOutcome::Success { output } => {
            assert!(output.contains("--memory 4g --cpus 2 alfonsograziano/node-chartjs:latest"));
            assert!(output.contains("sh -c node render.js > chart.png"));
        }
        other => panic!("expected success, got {:?}", other),
    }
    let bad = records.iter().find(|r| r.id == "bad").unwrap();
    assert!(!bad.is_success());
}
