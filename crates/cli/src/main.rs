//! TestBridge CLI - Main Entry Point
//!
//! Starts the application server, waits for it, runs the browser test
//! framework against it and tears the server down again.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use testbridge_cli::commands::{init, server};
use testbridge_e2e::RunnerMode;

/// TestBridge - server lifecycle for browser end-to-end tests
#[derive(Parser)]
#[command(name = "testbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "testbridge.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server and open the interactive test runner
    Open(server::ServerArgs),

    /// Start the server and run the suite headless
    Run(server::ServerArgs),

    /// Create the install folder and a starter configuration
    Init(init::InitArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
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

    match cli.command {
        Commands::Open(args) => {
            server::execute(RunnerMode::Open, args, &cli.config).await?;
        }
        Commands::Run(args) => {
            let passed = server::execute(RunnerMode::Run, args, &cli.config).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Init(args) => init::execute(args, &cli.config)?,
    }

    Ok(())
}
