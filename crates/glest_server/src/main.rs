//! Glest - Headless Server
//!
//! Loads a game config and runs it in real time until interrupted or until
//! the requested tick is reached.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glest_server::loader::load_simulation;
use glest_server::tick_loop::{LoopSettings, TickLoop};

#[derive(Parser)]
#[command(name = "glest-server")]
#[command(about = "Headless host for the Glest simulation core")]
#[command(version)]
struct Cli {
    /// Game config (RON)
    #[arg(default_value = "assets/data/game.ron")]
    config: PathBuf,

    /// Stop after this many ticks instead of running until Ctrl-C
    #[arg(long)]
    ticks: Option<u64>,

    /// Write the final snapshot here as JSON
    #[arg(long)]
    snapshot_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting Glest headless server");
    let game = load_simulation(&cli.config)?;
    let settings = LoopSettings::from_config(&game.config);
    let tick_loop = TickLoop::start(game.simulation, settings)?;
    let view = tick_loop.shared_view();

    let mut poll = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = poll.tick() => {
                let tick = view.load().tick;
                if cli.ticks.is_some_and(|limit| tick >= limit) {
                    break;
                }
            }
        }
    }

    let simulation = tokio::task::spawn_blocking(move || tick_loop.stop()).await??;
    tracing::info!(
        tick = simulation.get_tick(),
        state_hash = simulation.state_hash(),
        "final state"
    );

    if let Some(path) = cli.snapshot_out {
        let json = serde_json::to_string_pretty(&*simulation.view())?;
        tokio::fs::write(&path, json).await?;
        tracing::info!(path = %path.display(), "snapshot written");
    }
    Ok(())
}
