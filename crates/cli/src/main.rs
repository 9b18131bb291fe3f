//! flowprobe CLI - Main Entry Point
//!
//! Runs declarative UI-flow suites against a browser and reports results.
//! Exit codes: 0 all scenarios passed, 1 a scenario failed, 2 harness error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{check, list, run};
use flowprobe::HarnessConfig;

/// flowprobe - declarative UI-flow verification
#[derive(Parser)]
#[command(name = "flowprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to ./flowprobe.toml when present)
    #[arg(long, global = true, env = "FLOWPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenario suites
    Run(run::RunArgs),

    /// Validate suites without running them
    Check(check::CheckArgs),

    /// List groups and scenarios
    List(list::ListArgs),

    /// Show version information
    Version,
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run(args) => {
            let config = HarnessConfig::load(cli.config.as_deref())?;
            run::execute(args, config, cli.format).await
        }
        Commands::Check(args) => check::execute(args, cli.format),
        Commands::List(args) => list::execute(args, cli.format),
        Commands::Version => {
            println!("flowprobe v{}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match dispatch(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}
