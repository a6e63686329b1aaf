//! `slabmap` command-line entry point.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use slabmap::config::{CliArgs, Command, RunArgs};
use slabmap::{clear_cache, OpenAiClient, Orchestrator, RunConfig, RunOutcome, RunPlan};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("slabmap=info")),
        )
        .init();

    let args = CliArgs::parse();

    match args.command {
        Command::Run(run) => run_document(&run).await,
        Command::Clean { file } => {
            clear_cache(&file).with_context(|| format!("failed to clean cache for {}", file.display()))
        }
    }
}

async fn run_document(args: &RunArgs) -> Result<()> {
    let config = RunConfig::try_from(args)?;

    let mut client = OpenAiClient::new(args.api_key.as_str())?;
    if let Some(base) = &args.api_base {
        client = client.with_base_url(base);
    }

    let mut orchestrator = Orchestrator::new(Arc::new(client)).with_config(config);
    if !args.yes {
        orchestrator = orchestrator.with_confirmation(ask_on_stdin);
    }

    let outcome = orchestrator
        .process(&args.prompt, &args.file)
        .await
        .with_context(|| format!("failed to process {}", args.file.display()))?;

    match outcome {
        RunOutcome::Completed(report) => info!(
            chunks = report.chunks,
            cached = report.cached,
            generated = report.generated,
            "all chunks processed, combined results written to {}",
            report.output.display()
        ),
        RunOutcome::Cancelled => info!("nothing processed"),
    }

    Ok(())
}

fn ask_on_stdin(plan: &RunPlan) -> bool {
    let cost = plan
        .cost
        .map_or_else(|| "unknown".to_string(), |c| format!("${c:.4}"));

    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(
        stdout,
        "\n{}: {} tokens in {} chunks ({} cached), estimated input cost {cost}",
        plan.document.display(),
        plan.estimate.tokens,
        plan.chunks,
        plan.cached,
    );
    let _ = write!(stdout, "Do you want to proceed with processing? (yes/no): ");
    let _ = stdout.flush();
    drop(stdout);

    let mut response = String::new();
    if std::io::stdin().lock().read_line(&mut response).is_err() {
        return false;
    }

    matches!(response.trim().to_lowercase().as_str(), "y" | "yes")
}
