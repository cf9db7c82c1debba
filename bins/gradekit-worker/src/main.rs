mod commands;
mod compiler;
mod composer;
mod engine;
mod evaluator;
mod executor;
mod pipeline;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gradekit_common::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gradekit-worker")]
#[command(about = "Gradekit Worker - Compose, compile, run and verify submissions", long_about = None)]
struct Cli {
    /// Registration file (defaults to GRADEKIT_REGISTRATIONS or config/registrations.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade every registration and print the JSON report
    Run {
        /// Submissions root, one folder per registration step
        #[arg(short, long)]
        submissions: Option<PathBuf>,

        /// Directory holding expectation files
        #[arg(short, long)]
        expectations: Option<PathBuf>,

        /// Directory holding scaffold modules
        #[arg(short = 'n', long)]
        environment: Option<PathBuf>,

        /// Wall-clock bound per execution in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Arguments passed to every entry point
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Validate the registration file against the configured directories
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(path) = cli.config {
        config.registrations_path = path;
    }

    match cli.command {
        Commands::Run {
            submissions,
            expectations,
            environment,
            timeout_ms,
            output,
            args,
        } => {
            if let Some(dir) = submissions {
                config.submissions_dir = dir;
            }
            if let Some(dir) = expectations {
                config.expectations_dir = dir;
            }
            if let Some(dir) = environment {
                config.environment_dir = dir;
            }
            if let Some(ms) = timeout_ms {
                config.execution_timeout_ms = ms;
            }

            commands::run(&config, args, output.as_deref()).await?;
        }
        Commands::Check => {
            commands::check(&config)?;
        }
    }

    Ok(())
}
