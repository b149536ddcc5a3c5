//! Command-line interface for midiflow.
//!
//! Provides commands for starting generation runs, resuming interrupted
//! ones, replaying finished ones from history, and inspecting run state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use uuid::Uuid;

use crate::config;
use crate::core::{cancellation, CancelSignal, Orchestrator, StepKind};
use crate::domain::{RunState, WorkflowInput};
use crate::engine::{ExecutorRegistry, RunOutcome, Runtime};

/// midiflow - Replay-safe orchestrator for MIDI generation runs
#[derive(Parser, Debug)]
#[command(name = "midiflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a generation run
    Run {
        /// Description of the piece to generate
        #[arg(short, long)]
        prompt: String,

        /// Caller-defined request kind (recorded with the run)
        #[arg(short = 't', long, default_value = "")]
        request_type: String,
    },

    /// Continue an interrupted run from its history
    Resume {
        /// Run ID to resume
        run_id: String,
    },

    /// Re-execute a finished run from history without calling workers
    Replay {
        /// Run ID to replay
        run_id: String,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                prompt,
                request_type,
            } => start_run(prompt, request_type).await,
            Commands::Resume { run_id } => resume_run(&run_id).await,
            Commands::Replay { run_id } => replay_run(&run_id).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Build the runtime from the resolved configuration
fn runtime() -> Result<Runtime> {
    let cfg = config::config()?;
    let orchestrator =
        Orchestrator::new(cfg.workflow.clone()).context("Invalid workflow configuration")?;
    let executors = ExecutorRegistry::from_config(&cfg.executors);

    Ok(Runtime::new(orchestrator, executors, cfg.runs_dir()))
}

fn parse_run_id(run_id_str: &str) -> Result<Uuid> {
    Uuid::parse_str(run_id_str).with_context(|| format!("Invalid run ID: {}", run_id_str))
}

/// Cancel the run when the user hits Ctrl-C
fn cancel_on_interrupt() -> CancelSignal {
    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            handle.cancel();
        }
    });
    signal
}

/// Print the result JSON, or report failure and exit non-zero
fn report(outcome: RunOutcome) -> Result<()> {
    match outcome.result {
        Ok(result) => {
            println!("{}", result.to_json()?);
            eprintln!(
                "\n[Run {} completed successfully, {} live step calls]",
                outcome.run_id, outcome.live_calls
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("\n[Run {} failed: {}]", outcome.run_id, e);
            std::process::exit(1);
        }
    }
}

async fn start_run(prompt: String, request_type: String) -> Result<()> {
    if prompt.trim().is_empty() {
        anyhow::bail!("Prompt is empty");
    }

    let runtime = runtime()?;
    let outcome = runtime
        .start(WorkflowInput::new(prompt, request_type), cancel_on_interrupt())
        .await?;

    report(outcome)
}

async fn resume_run(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;

    let runtime = runtime()?;
    let outcome = runtime.resume(run_id, cancel_on_interrupt()).await?;

    report(outcome)
}

async fn replay_run(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;

    let runtime = runtime()?;
    let report = runtime.replay(run_id).await?;

    match &report.outcome.result {
        Ok(result) => println!("Replayed result: {}", result.to_json()?),
        Err(e) => println!("Replayed failure: {}", e),
    }
    println!("Live step calls: {}", report.outcome.live_calls);

    if report.matches_history {
        println!("Replay matches recorded history");
        Ok(())
    } else {
        eprintln!("Replay diverged from recorded history");
        std::process::exit(1);
    }
}

async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;

    let runtime = runtime()?;
    let run = runtime.status(run_id).await?;

    println!("Run ID: {}", run.id);
    if let Some(input) = &run.input {
        println!("Prompt: {}", input.prompt);
        if !input.request_type.is_empty() {
            println!("Request type: {}", input.request_type);
        }
    }
    println!("State: {}", run.state.label());
    if let RunState::Failed { error } = &run.state {
        println!("Error: {}", error);
    }
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(result) = &run.result {
        println!("Link: {}", result.link);
    }
    println!("\nStep attempts:");
    for (step, attempts) in &run.attempts {
        println!("  {}: {}", step, attempts);
    }
    println!("Failed attempts: {}", run.failed_attempts);
    println!("Retry timers: {}", run.timers);

    Ok(())
}

async fn list_runs(limit: usize) -> Result<()> {
    let runtime = runtime()?;
    let runs = runtime.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<26}", "RUN ID", "STATE", "STARTED");
    println!("{}", "-".repeat(76));

    for run in runs {
        println!(
            "{:<38} {:<12} {:<26}",
            run.id,
            run.state.label(),
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home: {}", cfg.home.display());
    println!("  Runs: {}", cfg.runs_dir().display());
    println!();
    println!("Executors:");
    let mut pools: Vec<_> = cfg.executors.iter().collect();
    pools.sort_by(|a, b| a.0.cmp(b.0));
    for (pool, executor) in pools {
        match executor {
            config::ExecutorConfig::Process { command, args } => {
                println!("  {}: process `{} {}`", pool, command, args.join(" "))
            }
            config::ExecutorConfig::Http { url } => println!("  {}: http {}", pool, url),
        }
    }
    println!();
    println!("Steps:");
    for kind in StepKind::ALL {
        let step = cfg.workflow.steps.get(kind);
        println!(
            "  {}: '{}' on {} (timeout {}s, {} attempts, {}ms x{} up to {}ms)",
            kind,
            step.name,
            step.route.pool,
            step.route.timeout.as_secs(),
            step.retry_policy.max_attempts,
            step.retry_policy.initial_delay_ms,
            step.retry_policy.backoff_multiplier,
            step.retry_policy.max_delay_ms
        );
    }
    println!();
    println!("Stages:");
    println!(
        "  validation: {} iterations, on step error {:?}",
        cfg.workflow.validation.max_iterations, cfg.workflow.validation.on_step_error
    );
    println!(
        "  generation: {} iterations, on step error {:?}",
        cfg.workflow.generation.max_iterations, cfg.workflow.generation.on_step_error
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "midiflow",
            "run",
            "--prompt",
            "Test Prompt",
            "--request-type",
            "melody",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                prompt,
                request_type,
            } => {
                assert_eq!(prompt, "Test Prompt");
                assert_eq!(request_type, "melody");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_request_type_is_optional() {
        let cli = Cli::try_parse_from(["midiflow", "run", "-p", "Test Prompt"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run { ref request_type, .. } if request_type.is_empty()
        ));
    }

    #[test]
    fn test_runs_default_limit() {
        let cli = Cli::try_parse_from(["midiflow", "runs"]).unwrap();
        assert!(matches!(cli.command, Commands::Runs { limit: 10 }));
    }

    #[test]
    fn test_parse_run_id_rejects_garbage() {
        assert!(parse_run_id("not-a-uuid").is_err());
        assert!(parse_run_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
    }
}
