//! Configuration for coopsync

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(default)]
    pub log_level: Option<String>,

    /// Interval loop settings
    #[serde(default)]
    pub interval: IntervalConfig,

    /// Lock demo settings
    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    /// Delay between runs when the task returns no override
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Runs before the demo task cancels itself
    #[serde(default = "default_max_runs")]
    pub max_runs: u64,

    /// Fail every Nth demo run (0 = never)
    #[serde(default)]
    pub fail_every: u64,
}

impl IntervalConfig {
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            max_runs: default_max_runs(),
            fail_every: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Concurrent workers contending for the lock
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long each worker holds the lock
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
}

impl LockConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            hold_ms: default_hold_ms(),
        }
    }
}

fn default_delay_ms() -> u64 {
    crate::DEFAULT_DELAY_MS
}

fn default_max_runs() -> u64 {
    crate::DEFAULT_MAX_RUNS
}

fn default_workers() -> usize {
    crate::DEFAULT_WORKERS
}

fn default_hold_ms() -> u64 {
    crate::DEFAULT_HOLD_MS
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from(config_path);
        }

        // Try default locations
        for path in Self::default_paths().iter().flatten() {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        debug!("Config::load: no config file found, using defaults");
        Ok(Config::default())
    }

    /// Read only the log level, ignoring any other problem with the file.
    ///
    /// Used before logging is set up, so failures here stay silent.
    pub fn load_log_level(path: Option<&PathBuf>) -> Option<String> {
        Self::load(path).ok().and_then(|config| config.log_level)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content).context(format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load_from: called");
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read config: {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).context(format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    fn default_paths() -> [Option<PathBuf>; 2] {
        [
            dirs::config_dir().map(|p| p.join("coopsync").join("config.yml")),
            Some(PathBuf::from("coopsync.yml")),
        ]
    }
}
