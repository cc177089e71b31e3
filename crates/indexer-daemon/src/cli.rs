//! CLI argument parsing for the indexer daemon.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resilient incremental indexer
///
/// Processes indexing tasks through change detection, bulk embedding,
/// cache invalidation and retry handling.
#[derive(Parser, Debug)]
#[command(name = "indexer-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/resilient-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a task file against in-memory collaborators
    Run {
        /// JSON file with tasks and entity content
        #[arg(short, long)]
        input: PathBuf,

        /// Keep polling for work until Ctrl+C instead of stopping when idle
        #[arg(short, long)]
        watch: bool,

        /// Append performance snapshots to this JSON-lines file
        #[arg(long)]
        metrics_out: Option<PathBuf>,

        /// Override the initial batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override the initial partition concurrency
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config,
}
