//! Resilient incremental indexer.
//!
//! # Usage
//!
//! ```bash
//! indexer-daemon run --input tasks.json [--watch] [--metrics-out metrics.jsonl]
//! indexer-daemon config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/resilient-indexer/config.toml)
//! 3. Environment variables (INDEXER__*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use indexer_daemon::{run_tasks, show_config, Cli, Commands, RunOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            watch,
            metrics_out,
            batch_size,
            max_concurrent,
        } => {
            run_tasks(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                RunOptions {
                    input,
                    watch,
                    metrics_out,
                    batch_size,
                    max_concurrent,
                },
            )
            .await?;
        }
        Commands::Config => {
            show_config(cli.config.as_deref(), cli.log_level.as_deref())?;
        }
    }

    Ok(())
}
