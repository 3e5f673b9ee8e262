//! Glest - Development Tools

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "glest-tools")]
#[command(about = "Development tools for the Glest simulation core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate tech tree and game config files
    Validate {
        /// Data file, or directory of .ron files
        #[arg(default_value = "assets/data")]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            tracing::info!("Validating data files in: {}", path.display());
            let reports = match glest_tools::validate::validate_path(&path) {
                Ok(reports) => reports,
                Err(e) => {
                    tracing::error!("Validation failed: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let mut failed = 0;
            for report in &reports {
                if report.is_ok() {
                    println!("ok    {}", report.path.display());
                    continue;
                }
                failed += 1;
                println!("FAIL  {}", report.path.display());
                for problem in &report.problems {
                    println!("      {problem}");
                }
            }
            if failed == 0 {
                tracing::info!("Validation passed ({} files)", reports.len());
                ExitCode::SUCCESS
            } else {
                tracing::error!("{failed} of {} files failed validation", reports.len());
                ExitCode::FAILURE
            }
        }
    }
}
