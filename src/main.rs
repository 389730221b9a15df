use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use topic_ledger::scenario::{Scenario, ScenarioError, StepOutcome};

//==================== CLI ====================//

#[derive(Parser)]
#[command(
    name = "topic-ledger",
    version,
    about = "Replay scripted calls against a metered pub/sub ledger"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario and print every step outcome
    Run {
        /// Scenario JSON: {"config": {...}, "steps": [...]}
        scenario: PathBuf,
        /// Print outcomes as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },
    /// Replay a scenario and print the final ledger snapshot as JSON
    Snapshot { scenario: PathBuf },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("encoding output: {0}")]
    Encode(#[from] serde_json::Error),
}

//==================== commands ====================//

fn run_cmd(path: &Path, json: bool) -> Result<(), CliError> {
    let scenario = Scenario::load(path)?;
    let ledger = scenario.build_ledger()?;
    let mut encode_error = None;
    scenario.run(&ledger, |_, outcome| {
        if json {
            match serde_json::to_string(outcome) {
                Ok(line) => println!("{line}"),
                Err(err) => {
                    encode_error.get_or_insert(err);
                }
            }
        } else {
            print_outcome(outcome);
        }
    })?;
    if let Some(err) = encode_error {
        return Err(err.into());
    }
    tracing::info!(
        height = ledger.snapshot().height,
        steps = scenario.steps.len(),
        "scenario complete"
    );
    Ok(())
}

fn snapshot_cmd(path: &Path) -> Result<(), CliError> {
    let scenario = Scenario::load(path)?;
    let ledger = scenario.build_ledger()?;
    scenario.run(&ledger, |_, _| {})?;
    println!("{}", serde_json::to_string_pretty(&ledger.snapshot())?);
    Ok(())
}

fn print_outcome(outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Advertised {
            topic,
            owner,
            created,
        } => {
            if *created {
                println!("{owner} advertises topic \"{topic}\"");
            } else {
                println!("{owner} re-advertises topic \"{topic}\" (already owned)");
            }
        }
        StepOutcome::Subscribed {
            topic,
            subscriber,
            deposit,
        } => println!("{subscriber} subscribes to \"{topic}\" ({deposit})"),
        StepOutcome::Published { report, received } => {
            println!(
                "publish to \"{}\": {} delivered, {} skipped, {} charged",
                report.topic,
                report.delivered.len(),
                report.skipped.len(),
                report.total_charged()
            );
            for delivery in received {
                println!(
                    "  [event] {} got message on \"{}\": \"{}\"",
                    delivery.subscriber, delivery.topic, delivery.message
                );
            }
        }
        StepOutcome::Unsubscribed {
            topic,
            subscriber,
            refund,
        } => println!("{subscriber} unsubscribes from \"{topic}\", refund {refund}"),
        StepOutcome::Balance {
            topic,
            subscriber,
            amount,
        } => println!("{subscriber} escrow balance on \"{topic}\": {amount}"),
        StepOutcome::Accounts { label, balances } => {
            println!("=== balances after {label} ===");
            for (account, balance) in balances {
                println!(
                    "  {account}: available {} locked {}",
                    balance.available, balance.locked
                );
            }
        }
    }
}

//==================== main ====================//

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Run { scenario, json } => run_cmd(scenario, *json),
        Commands::Snapshot { scenario } => snapshot_cmd(scenario),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
