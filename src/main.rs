// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use item_sync::{ItemSyncConfig, SyncContext, SyncCoordinator};

#[derive(Parser, Debug)]
#[command(name = "item-sync", version, about = "Periodic, resilient sync of external sources")]
struct Cli {
    /// TOML configuration file; ITEM_SYNC__* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the scheduler until Ctrl-C (default)
    Run,
    /// Run every job once and exit
    Once,
}

fn init_tracing(config: &ItemSyncConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if config.log_json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = ItemSyncConfig::load(cli.config.as_deref())?;
    init_tracing(&config);

    let coordinator = Arc::new(SyncCoordinator::connect(config).await?);
    let ctx = SyncContext::new();

    match cli.command.unwrap_or(Command::Run) {
        Command::Once => {
            coordinator.run_once(&ctx).await;
            coordinator.shutdown().await;
        }
        Command::Run => {
            let mut runner = tokio::spawn({
                let coordinator = Arc::clone(&coordinator);
                let ctx = ctx.clone();
                async move { coordinator.run(ctx).await }
            });

            tokio::select! {
                finished = &mut runner => {
                    // Scheduler disabled, nothing left to do
                    finished??;
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("Shutdown signal received");
                    coordinator.shutdown().await;
                    runner.await??;
                }
            }
        }
    }

    info!("item-sync exited cleanly");
    Ok(())
}
