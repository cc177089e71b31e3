//! Indexer daemon library.
//!
//! Exposes CLI parsing, settings and command handlers for the binary and
//! for integration tests.

pub mod cli;
pub mod commands;
pub mod input;
pub mod settings;
pub mod sinks;

pub use cli::{Cli, Commands};
pub use commands::{build_processor, drive, run_tasks, show_config, RunOptions, RunReport};
pub use input::{ContentSpec, TaskFile, TaskSpec};
pub use settings::{Settings, SettingsError};
pub use sinks::JsonLinesMetricsSink;
