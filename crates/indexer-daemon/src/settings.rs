//! Layered daemon settings.
//!
//! Load order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/resilient-indexer/config.toml)
//! 3. CLI-specified config file (optional)
//! 4. Environment variables (`INDEXER__PROCESSOR__BATCH_SIZE=50`)
//!
//! CLI flags are applied by the caller after loading.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use indexer_cache::CacheConfig;
use indexer_detect::DetectorConfig;
use indexer_monitor::MonitorConfig;
use indexer_processor::ProcessorConfig;
use indexer_resilience::ResilienceConfig;

/// Settings errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid {section} configuration: {message}")]
    Invalid { section: &'static str, message: String },

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Effective configuration of one worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Identifier used when claiming tasks
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Upper bound on cycles for a one-shot run
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_id() -> String {
    "worker-1".to_string()
}

fn default_max_cycles() -> usize {
    1_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            worker_id: default_worker_id(),
            max_cycles: default_max_cycles(),
            processor: ProcessorConfig::default(),
            detector: DetectorConfig::default(),
            cache: CacheConfig::default(),
            resilience: ResilienceConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .set_default("worker_id", default_worker_id())?
            .set_default("max_cycles", default_max_cycles() as i64)?
            .add_source(File::with_name(&default_config_path().to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("INDEXER")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Apply CLI overrides for the processing shape.
    ///
    /// The monitor's starting recommendation follows the processor so a
    /// `--batch-size` flag takes effect on the first cycle.
    pub fn with_overrides(mut self, batch_size: Option<usize>, max_concurrent: Option<usize>) -> Self {
        if let Some(size) = batch_size {
            self.processor.batch_size = size;
        }
        if let Some(n) = max_concurrent {
            self.processor.max_concurrent = n;
        }
        self.monitor.initial_batch_size = self.processor.batch_size;
        self.monitor.initial_concurrency = self.processor.max_concurrent;
        self
    }

    /// Validate every component section.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let check = |section: &'static str, result: Result<(), String>| {
            result.map_err(|message| SettingsError::Invalid { section, message })
        };
        if self.worker_id.trim().is_empty() {
            return Err(SettingsError::Invalid {
                section: "worker",
                message: "worker_id must not be empty".to_string(),
            });
        }
        check("processor", self.processor.validate())?;
        check("detector", self.detector.validate())?;
        check("cache", self.cache.validate())?;
        check("resilience", self.resilience.validate())?;
        check("monitor", self.monitor.validate())?;
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Default config file location, without extension.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "resilient-indexer")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config")
}
