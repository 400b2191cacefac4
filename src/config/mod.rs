//! Configuration management for argo-ingest
//!
//! Handles loading, saving, and validating configuration from TOML files.
//! Every field has a default so a missing config file is a valid setup.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Archive extraction settings
    #[serde(default)]
    pub extract: ExtractConfig,

    /// Recurring job settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Relational store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Raw file cleanup settings
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Filesystem locations used by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory of raw profile archives
    pub input_dir: PathBuf,

    /// Consolidation accumulation (CSV)
    pub accumulation_file: PathBuf,

    /// SQLite database holding the `profiles` table
    pub db_file: PathBuf,

    /// Directory for the operational log streams
    pub log_dir: PathBuf,
}

/// Extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// File extension identifying profile archives (without the dot)
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minutes between scheduled jobs
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Fixed pause between consolidation and load
    #[serde(default = "default_stage_delay_secs")]
    pub stage_delay_secs: u64,

    /// A tick later than this past its deadline is dropped
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Run one job before the first timer tick
    #[serde(default = "default_run_on_startup")]
    pub run_on_startup: bool,
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Bounded wait for the SQLite write lock
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Cleanup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Delete raw archives after a successful load
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,

    /// Keep raw archives whose name is not yet present in the store
    #[serde(default = "default_retain_unloaded")]
    pub retain_unloaded: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::under(&Config::default_base_dir())
    }
}

impl PathsConfig {
    /// Standard layout rooted at `base`
    pub fn under(base: &Path) -> Self {
        Self {
            input_dir: base.join("raw"),
            accumulation_file: base.join("consolidated.csv"),
            db_file: base.join("argo_profiles.db"),
            log_dir: base.join("logs"),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            archive_extension: default_archive_extension(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            stage_delay_secs: default_stage_delay_secs(),
            grace_secs: default_grace_secs(),
            run_on_startup: default_run_on_startup(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn stage_delay(&self) -> Duration {
        Duration::from_secs(self.stage_delay_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_secs: default_busy_timeout_secs(),
            max_connections: default_max_connections(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_cleanup_enabled(),
            retain_unloaded: default_retain_unloaded(),
        }
    }
}

impl Config {
    /// Get the default base directory (~/.argo-ingest)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".argo-ingest")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Configuration with every path rooted at `base`
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            paths: PathsConfig::under(base),
            ..Default::default()
        }
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path` (or the default location), falling back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);

        if config_path.exists() {
            return Self::load(&config_path);
        }

        if path.is_some() {
            warn!("Config file {:?} not found, using defaults", config_path);
        } else {
            debug!("No config file found, using defaults");
        }

        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Apply overrides sourced from the environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(INTERVAL_ENV) {
            self.scheduler.interval_minutes = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be a whole number of minutes, got '{}'", INTERVAL_ENV, raw))
            })?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval_minutes == 0 {
            return Err(Error::Config(
                "scheduler.interval_minutes must be at least 1".to_string(),
            ));
        }

        if self.scheduler.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(Error::Config(format!(
                "scheduler.interval_minutes must be at most {}",
                MAX_INTERVAL_MINUTES
            )));
        }

        if self.scheduler.grace() >= self.scheduler.interval() {
            return Err(Error::Config(
                "scheduler.grace_secs must be shorter than the interval".to_string(),
            ));
        }

        let ext = self.extract.archive_extension.trim_start_matches('.');
        if ext.is_empty() {
            return Err(Error::Config(
                "extract.archive_extension must not be empty".to_string(),
            ));
        }

        if self.store.busy_timeout_secs == 0 {
            return Err(Error::Config(
                "store.busy_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.store.max_connections == 0 {
            return Err(Error::Config(
                "store.max_connections must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Archive extension without a leading dot
    pub fn archive_extension(&self) -> &str {
        self.extract.archive_extension.trim_start_matches('.')
    }
}
