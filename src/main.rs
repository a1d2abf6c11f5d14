//! # Financial Research Agent
//!
//! An iterative LLM research agent built on the `research-loop` crate and the
//! Rig framework.
//!
//! Each run plans the research, gathers evidence, writes a report and grades
//! it, looping back to research until the grade clears a threshold or the
//! loop cap is hit.
//!
//! This application demonstrates:
//! - CLI subcommands with clap
//! - Consuming an async `Stream` of progress events
//! - Graceful shutdown on Ctrl-C
//! - Structured logging with tracing
//!
//! ## Quick Start
//! ```bash
//! cargo run -- run --ticker NVDA
//! cargo run -- recent
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Configuration management
mod config;

/// Service wiring for the research loop
mod pipeline;

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use research_loop::store::DEFAULT_RECENT_LIMIT;
use research_loop::trigger::{report_update, DAILY_TASK};
use research_loop::{
    CancelToken, DailySchedule, RecordUpdate, ResearchRequest, RunEvent, RunId, RunOutcome,
    RunRecord, RunStatus, StageKind, StateUpdate,
};

use crate::config::AppConfig;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
/// # Rust Concept: Subcommands with Clap
///
/// An enum deriving `Subcommand` gives each variant its own arguments;
/// `match` on it in `main` is checked for exhaustiveness by the compiler.
#[derive(Parser, Debug)]
#[command(
    name = "fin-research-agent",
    version = "0.1.0",
    about = "An iterative AI financial research agent: plan, research, write, grade, repeat",
    long_about = r#"
Financial Research Agent - equity research that checks its own work.

Each run:
  1. Plans the research steps
  2. Searches news and filings for each step
  3. Writes a structured equity report
  4. Grades the report and loops back to research until it is good enough

PREREQUISITES:
  1. Install Ollama: https://ollama.ai
  2. Pull a model: ollama pull llama3.2
  3. Set TAVILY_API_KEY for search

EXAMPLES:
  # Research one stock
  fin-research-agent run --ticker NVDA

  # Custom instructions
  fin-research-agent run --ticker AAPL --instructions "Analyze Q4 2024 performance"

  # Free-form task
  fin-research-agent run "Compare cloud margins across hyperscalers"

  # Run the daily market report every day at 09:00 UTC
  fin-research-agent daily
"#
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (debug logging)
    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        help = "Enable verbose/debug logging",
        default_value = "false"
    )]
    verbose: bool,

    /// The Ollama model to use (overrides OLLAMA_MODEL env var)
    #[arg(
        short = 'm',
        long = "model",
        global = true,
        help = "Ollama model to use",
        env = "OLLAMA_MODEL"
    )]
    model: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one research loop in the foreground
    Run {
        /// Stock ticker to research (e.g., AAPL)
        #[arg(short = 't', long = "ticker", conflicts_with = "task")]
        ticker: Option<String>,

        /// Research instructions used with --ticker
        #[arg(short = 'i', long = "instructions", requires = "ticker")]
        instructions: Option<String>,

        /// Free-form research task
        #[arg(value_name = "TASK")]
        task: Option<String>,
    },

    /// Submit the daily market report every day until Ctrl-C
    Daily {
        /// UTC hour to fire at
        #[arg(long = "hour", default_value = "9")]
        hour: u32,

        /// UTC minute to fire at
        #[arg(long = "minute", default_value = "0")]
        minute: u32,

        /// Task submitted on every firing
        #[arg(long = "task", default_value = DAILY_TASK)]
        task: String,
    },

    /// Show the stored record of a run
    Status {
        #[arg(value_name = "RUN_ID")]
        run_id: String,
    },

    /// List the most recent runs
    Recent {
        #[arg(short = 'n', long = "limit", default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },
}

impl Command {
    /// Turn `run` arguments into a request
    fn research_request(
        ticker: Option<String>,
        instructions: Option<String>,
        task: Option<String>,
    ) -> Result<ResearchRequest> {
        match (ticker, task) {
            (Some(ticker), _) => Ok(match instructions {
                Some(instructions) => ResearchRequest::ticker_with_instructions(ticker, instructions),
                None => ResearchRequest::ticker(ticker),
            }),
            (None, Some(task)) => Ok(ResearchRequest::task(task)),
            (None, None) => anyhow::bail!("Give a --ticker or a TASK to research"),
        }
    }
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(model) = args.model {
        config.model = model;
    }

    init_logging(args.verbose, &config.log_level)?;
    config.validate()?;

    info!(
        model = %config.model,
        host = %config.ollama_host,
        store = %config.results_store,
        "Configuration loaded"
    );

    match args.command {
        Command::Run {
            ticker,
            instructions,
            task,
        } => {
            let request = Command::research_request(ticker, instructions, task)?;
            run_foreground(&config, request).await
        }
        Command::Daily { hour, minute, task } => run_daily(&config, hour, minute, task).await,
        Command::Status { run_id } => show_status(&config, &run_id).await,
        Command::Recent { limit } => show_recent(&config, limit).await,
    }
}

// =============================================================================
// COMMANDS
// =============================================================================
/// Run one loop in-process, printing progress as the stream delivers it.
///
/// # Rust Concept: Streams
///
/// A `Stream` is the async version of an `Iterator`. `next().await` yields
/// each event as soon as the orchestrator emits it.
async fn run_foreground(config: &AppConfig, request: ResearchRequest) -> Result<()> {
    // Validation errors surface here, before anything is queued
    let task = request.into_task()?;

    let orchestrator = pipeline::build_orchestrator(config)?;
    let store = pipeline::open_store(config).await?;

    let run_id = RunId::generate();
    store
        .store(
            &run_id,
            RecordUpdate::status(RunStatus::Queued).with_metadata("task", task.clone().into()),
        )
        .await?;
    store.update_status(&run_id, RunStatus::Running).await?;

    println!("\nRun {}: {}\n", run_id, task);

    let cancel = CancelToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current stage");
            shutdown.cancel();
        }
    });

    let mut events = orchestrator.stream(run_id.clone(), task, cancel);
    let mut final_report = None;
    while let Some(event) = events.next().await {
        match event {
            RunEvent::StageStarted {
                stage, iteration, ..
            } => print_stage_started(stage, iteration),
            RunEvent::StageRetrying {
                stage,
                attempt,
                error,
                ..
            } => println!("   ! {} failed ({}), retry {}", stage, error, attempt),
            RunEvent::StageCompleted { stage, update, .. } => print_stage_completed(stage, &update),
            RunEvent::Finished { report } => final_report = Some(report),
            RunEvent::Started { .. } | RunEvent::Routed { .. } => {}
        }
    }

    let report = final_report.context("Run ended without a final report")?;
    let record = store
        .store(&run_id, report_update(&report)?)
        .await
        .context("Failed to record run")?;

    println!("\n{}", "=".repeat(60));
    println!("RESEARCH REPORT");
    println!("{}\n", "=".repeat(60));
    match &report.state.report {
        Some(text) => println!("{}", text),
        None => println!("(no report was written)"),
    }
    println!("\n{}", "=".repeat(60));
    println!(
        "Outcome: {} | score {} | {} iteration(s) | {} note(s)",
        describe_outcome(&report.outcome),
        report.state.score,
        report.state.loop_count,
        report.state.research_notes.len()
    );
    println!("Stored as {} ({})", record.run_id, record.status);

    match report.outcome {
        RunOutcome::Converged | RunOutcome::Exhausted => Ok(()),
        RunOutcome::Failed { message, .. } => {
            error!(run_id = %run_id, error = %message, "Research failed");
            eprintln!("\nResearch failed: {}", message);
            if message.contains("connection refused") || message.contains("Connection refused") {
                eprintln!("\nTip: Make sure Ollama is running:");
                eprintln!("   ollama serve");
            }
            anyhow::bail!("run {} failed", run_id)
        }
        RunOutcome::Cancelled { stage } => {
            anyhow::bail!("run {} cancelled before {}", run_id, stage)
        }
    }
}

/// Submit the daily task on schedule until Ctrl-C, then let active runs
/// finish. A second Ctrl-C cancels them before their next stage.
async fn run_daily(config: &AppConfig, hour: u32, minute: u32, task: String) -> Result<()> {
    let schedule = DailySchedule::new().at_time(hour, minute)?.with_task(task);
    let launcher = pipeline::build_launcher(config).await?;

    info!(at = %schedule.at, task = %schedule.task, "Daily scheduler started");
    schedule
        .run(&launcher, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await;

    let active = launcher.active_runs().await;
    if active > 0 {
        info!(active, "Waiting for active runs to finish (Ctrl-C again to cancel them)");
        let finished = launcher.join_all();
        tokio::pin!(finished);
        tokio::select! {
            _ = &mut finished => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Cancelling active runs");
                launcher.cancel_all().await;
                finished.await;
            }
        }
    }
    match launcher.store().purge_expired().await {
        Ok(removed) if removed > 0 => info!(removed, "Purged expired run records"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to purge expired records"),
    }
    info!("Daily scheduler shut down");
    Ok(())
}

async fn show_status(config: &AppConfig, run_id: &str) -> Result<()> {
    let run_id = RunId::new(run_id)?;
    let store = pipeline::open_store(config).await?;
    match store.get(&run_id).await? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => anyhow::bail!("No record for run {} (unknown or expired)", run_id),
    }
}

async fn show_recent(config: &AppConfig, limit: usize) -> Result<()> {
    let store = pipeline::open_store(config).await?;
    let records = store.list_recent(limit).await?;
    if records.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for record in &records {
        println!("{}", summarize_record(record));
    }
    Ok(())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================
fn print_stage_started(stage: StageKind, iteration: u32) {
    match stage {
        StageKind::Plan => println!("Planning research..."),
        StageKind::Research => println!("Researching (iteration {})...", iteration),
        StageKind::Write => println!("Writing report..."),
        StageKind::Grade => println!("Grading report..."),
    }
}

fn print_stage_completed(stage: StageKind, update: &StateUpdate) {
    match stage {
        StageKind::Plan => {
            if let Some(research_loop::FieldValue::Lines(steps)) =
                update.get(research_loop::Field::Plan)
            {
                for (i, step) in steps.iter().enumerate() {
                    println!("   {}. {}", i + 1, step);
                }
            }
        }
        StageKind::Research => println!("   Found {} new facts", update.appended_notes()),
        StageKind::Write => {}
        StageKind::Grade => {
            if let Some(research_loop::FieldValue::Integer(score)) =
                update.get(research_loop::Field::Score)
            {
                println!("   Quality score: {}", score);
            }
        }
    }
}

fn describe_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Converged => "converged".to_string(),
        RunOutcome::Exhausted => "best effort (below threshold)".to_string(),
        RunOutcome::Failed { stage: Some(stage), .. } => format!("failed in {}", stage),
        RunOutcome::Failed { stage: None, .. } => "failed".to_string(),
        RunOutcome::Cancelled { stage } => format!("cancelled before {}", stage),
    }
}

fn summarize_record(record: &RunRecord) -> String {
    let task = record
        .metadata
        .get("task")
        .and_then(|t| t.as_str())
        .unwrap_or("-");
    let flag = if record.best_effort { " (best effort)" } else { "" };
    format!(
        "{}  {:<9}{}  {}  {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.status.as_str(),
        flag,
        record.run_id,
        task
    )
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Initialize the tracing subscriber for structured logging.
///
/// `--verbose` forces debug output; otherwise `RUST_LOG` (or the configured
/// level) decides, so `RUST_LOG=research_loop=debug` narrows to the library.
fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
