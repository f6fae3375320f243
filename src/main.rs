use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use switchyard_config::WorkflowDef;
use switchyard_engine::{EngineConfig, ExecutorRegistry, RunStatus, StartOptions, WorkflowEngine};
use switchyard_workflow::Workflow;

/// Switchyard - a message-driven workflow engine
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow, reading the trigger payload from stdin
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Whole-run timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Path to an engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
  },

  /// Validate a workflow and print its entry and join points
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },
}

fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Run {
      workflow_file,
      timeout_ms,
      config,
    }) => run_workflow(workflow_file, timeout_ms, config),
    Some(Commands::Validate { workflow_file }) => {
      validate_workflow(&workflow_file)?;
      Ok(ExitCode::SUCCESS)
    }
    None => {
      println!("switchyard - use --help to see available commands");
      Ok(ExitCode::SUCCESS)
    }
  }
}

fn run_workflow(
  workflow_file: PathBuf,
  timeout_ms: Option<u64>,
  config: Option<PathBuf>,
) -> Result<ExitCode> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_workflow_async(workflow_file, timeout_ms, config).await })
}

async fn run_workflow_async(
  workflow_file: PathBuf,
  timeout_ms: Option<u64>,
  config: Option<PathBuf>,
) -> Result<ExitCode> {
  let workflow_def = read_workflow(&workflow_file)?;
  eprintln!("Loaded workflow: {}", workflow_def.name);

  let config = match config {
    Some(path) => {
      let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read engine config: {}", path.display()))?;
      serde_json::from_str(&content)
        .with_context(|| format!("failed to parse engine config: {}", path.display()))?
    }
    None => EngineConfig::default(),
  };

  let payload = read_payload_from_stdin()?;
  eprintln!("Payload: {}", payload);

  let engine = WorkflowEngine::new(config, ExecutorRegistry::with_builtins());

  // Ctrl-C cancels the run instead of killing the process mid-dispatch
  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      on_signal.cancel();
    }
  });

  let mut options = StartOptions::new().with_input(payload).with_cancel(cancel);
  if let Some(ms) = timeout_ms {
    options = options.with_timeout(Duration::from_millis(ms));
  }

  let result = engine
    .start(workflow_def, options)
    .await
    .context("workflow run did not complete")?;

  eprintln!("Run finished: {} ({})", result.run_id, result.status);
  if let Some(errors) = result.errors() {
    eprintln!("Errors:\n{errors}");
  }

  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(if result.status == RunStatus::Completed {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}

fn validate_workflow(workflow_file: &Path) -> Result<()> {
  let workflow_def = read_workflow(workflow_file)?;
  let workflow = Workflow::lock(workflow_def)
    .with_context(|| format!("invalid workflow: {}", workflow_file.display()))?;

  let mut join_points: Vec<&String> = workflow.graph().join_points().iter().collect();
  join_points.sort();

  println!("workflow: {} ({})", workflow.name, workflow.workflow_id);
  println!("nodes: {}", workflow.nodes().len());
  println!("entry points: {}", workflow.graph().entry_points().join(", "));
  println!(
    "join points: {}",
    join_points
      .iter()
      .map(|s| s.as_str())
      .collect::<Vec<_>>()
      .join(", ")
  );

  Ok(())
}

fn read_workflow(workflow_file: &Path) -> Result<WorkflowDef> {
  let content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
