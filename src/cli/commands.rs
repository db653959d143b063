//! CLI command definitions for eval-forge.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ForgeConfig;
use crate::environment::ContainerDetector;
use crate::execution::{ContainerExecutor, Executor, LlmExecutor, ReadinessCheck, ResourceResolver};
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::metrics::{export_metrics, init_metrics};
use crate::orchestrator::BatchOrchestrator;

/// Sandboxed batch execution orchestrator for evaluation tasks.
#[derive(Parser, Debug)]
#[command(name = "eval-forge")]
#[command(about = "Run evaluation tasks in concurrent batches against an LLM or in containers")]
#[command(version)]
#[command(
    long_about = "eval-forge runs a JSON task list in fixed-size concurrent batches and appends one JSON record per task to a results file.\n\nExample usage:\n  eval-forge run tasks.json --executor container --image python:3.12 --batch-size 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Execute a task list and append results to a JSONL file.
    Run(RunArgs),

    /// Print the resource limit flags resolved for an image.
    Limits(LimitsArgs),

    /// Report whether this process runs inside a container.
    Detect(DetectArgs),

    /// Poll a local port until the service behind it answers.
    Wait(WaitArgs),
}

/// Execution backend selectable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutorKind {
    /// Send each task prompt to a chat-completion endpoint.
    Llm,
    /// Run each task command in a fresh container.
    Container,
}

/// Arguments for `eval-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// JSON array of {"id", "prompt"} tasks.
    pub tasks: PathBuf,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Execution backend.
    #[arg(short, long, value_enum, default_value = "llm")]
    pub executor: ExecutorKind,

    /// Maximum number of tasks executed concurrently.
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// JSONL results file (appended, never truncated).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Memory limit for every container, overriding image defaults (e.g. 4g).
    #[arg(long)]
    pub memory: Option<String>,

    /// CPU limit for every container, overriding image defaults (e.g. 2).
    #[arg(long)]
    pub cpus: Option<String>,

    /// Container image for the container backend.
    #[arg(long)]
    pub image: Option<String>,

    /// Service port inside the container to publish and wait for.
    #[arg(long)]
    pub port: Option<u16>,

    /// Container runtime binary.
    #[arg(long)]
    pub runtime: Option<String>,

    /// Launch containers even when already running inside one.
    #[arg(long)]
    pub allow_nested: bool,

    /// LLM model for the llm backend.
    #[arg(short, long)]
    pub model: Option<String>,

    /// OpenRouter API key (overrides LITELLM_* environment configuration).
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Write Prometheus metrics to this file when the run completes.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `eval-forge limits`.
#[derive(Parser, Debug)]
pub struct LimitsArgs {
    /// Image reference to resolve.
    pub image: String,

    /// YAML configuration file with image defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Memory override.
    #[arg(long)]
    pub memory: Option<String>,

    /// CPU override.
    #[arg(long)]
    pub cpus: Option<String>,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `eval-forge detect`.
#[derive(Parser, Debug)]
pub struct DetectArgs {
    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `eval-forge wait`.
#[derive(Parser, Debug)]
pub struct WaitArgs {
    /// Local port to poll.
    pub port: u16,

    /// Give up after this many milliseconds.
    #[arg(long, default_value = "30000")]
    pub timeout_ms: u64,

    /// Delay between attempts in milliseconds.
    #[arg(long, default_value = "500")]
    pub interval_ms: u64,

    /// Host to poll.
    #[arg(long, default_value = "localhost")]
    pub host: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_tasks_command(args).await,
        Commands::Limits(args) => run_limits_command(args),
        Commands::Detect(args) => run_detect_command(args),
        Commands::Wait(args) => run_wait_command(args).await,
    }
}

// ============================================================================
// run
// ============================================================================

async fn run_tasks_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = ForgeConfig::load(args.config.as_deref())?;
    apply_run_overrides(&mut config, &args);
    config.validate()?;

    if args.metrics_out.is_some() {
        init_metrics()?;
    }

    let executor: Arc<dyn Executor> = match args.executor {
        ExecutorKind::Llm => {
            let provider = build_llm_provider(args.api_key.clone())?;
            Arc::new(LlmExecutor::from_settings(provider, &config.llm))
        }
        ExecutorKind::Container => Arc::new(ContainerExecutor::from_config(&config)?),
    };

    info!(
        executor = executor.kind(),
        batch_size = config.batch_size,
        output = %config.output_path.display(),
        "Starting run"
    );

    let orchestrator = BatchOrchestrator::from_config(executor, &config);
    let summary = orchestrator.run(&args.tasks, &config.output_path).await?;

    if let Some(path) = &args.metrics_out {
        fs::write(path, export_metrics())?;
        info!(path = %path.display(), "Metrics written");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} tasks in {} batches: {} succeeded, {} failed ({} ms)",
            summary.total, summary.batches, summary.succeeded, summary.failed, summary.elapsed_ms
        );
        println!("Results appended to {}", config.output_path.display());
    }
    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some tasks failed");
    }
    Ok(())
}

/// CLI flags take precedence over file and environment configuration.
fn apply_run_overrides(config: &mut ForgeConfig, args: &RunArgs) {
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(output) = &args.output {
        config.output_path = output.clone();
    }
    if let Some(memory) = &args.memory {
        config.memory_override = Some(memory.clone());
    }
    if let Some(cpus) = &args.cpus {
        config.cpu_override = Some(cpus.clone());
    }
    if let Some(image) = &args.image {
        config.container.image = Some(image.clone());
    }
    if let Some(port) = args.port {
        config.container.port = Some(port);
    }
    if let Some(runtime) = &args.runtime {
        config.container.runtime = runtime.clone();
    }
    if args.allow_nested {
        config.container.allow_nested = true;
    }
    if let Some(model) = &args.model {
        config.llm.model = Some(model.clone());
    }
}

fn build_llm_provider(api_key: Option<String>) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(key) = api_key {
        info!("Using OpenRouter with specified API key");
        return Ok(Arc::new(LiteLlmClient::new_with_defaults(key)?));
    }

    info!("Using LiteLLM client from environment");
    Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
        anyhow::anyhow!(
            "Failed to initialize LLM client: {}. Please provide --api-key or set LITELLM_API_BASE/OPENROUTER_API_KEY.",
            e
        )
    })?))
}

// ============================================================================
// limits / detect / wait
// ============================================================================

fn run_limits_command(args: LimitsArgs) -> anyhow::Result<()> {
    let mut config = ForgeConfig::load(args.config.as_deref())?;
    if let Some(memory) = &args.memory {
        config.memory_override = Some(memory.clone());
    }
    if let Some(cpus) = &args.cpus {
        config.cpu_override = Some(cpus.clone());
    }
    config.validate()?;

    let limits = ResourceResolver::from_config(&config).resolve(&args.image);
    if args.json {
        let value = serde_json::json!({
            "image": args.image,
            "memory": limits.memory(),
            "cpus": limits.cpus(),
            "args": limits.docker_args(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("memory: {}", display_flag(&limits.memory_flag()));
        println!("cpus:   {}", display_flag(&limits.cpu_flag()));
    }
    Ok(())
}

fn display_flag(flag: &str) -> &str {
    if flag.is_empty() {
        "(none)"
    } else {
        flag
    }
}

fn run_detect_command(args: DetectArgs) -> anyhow::Result<()> {
    let detected = ContainerDetector::default().detect();
    if args.json {
        let value = serde_json::json!({
            "in_container": detected.is_some(),
            "source": detected.as_ref().map(|s| s.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        match detected {
            Some(source) => println!("in container: yes ({})", source),
            None => println!("in container: no"),
        }
    }
    Ok(())
}

async fn run_wait_command(args: WaitArgs) -> anyhow::Result<()> {
    let check = ReadinessCheck::new(
        args.port,
        Duration::from_millis(args.timeout_ms),
        Duration::from_millis(args.interval_ms),
    )
    .with_host(args.host);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    info!(url = %check.url(), timeout_ms = args.timeout_ms, "Waiting for service");
    check.wait_with_cancel(&cancel).await?;
    println!("{} is ready", check.url());
    Ok(())
}
