//! TOML configuration for the engine and its CLI.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::EventTimeResolution;
use crate::types::EventTime;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub event_time: EventTimeConfig,
    pub checkpoint: CheckpointConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::Storage {
            key: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        self.event_time.validate()?;
        self.checkpoint.validate()
    }
}

/// Sliding time-interval window parameters, in event-time milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Length of every interval.
    pub interval_duration: EventTime,
    /// Distance between consecutive interval start points.
    pub creation_period: EventTime,
    /// Phase of the interval start points.
    pub interval_offset: EventTime,
    /// Grace period after the interval end before a pane closes.
    pub discard_age: EventTime,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            interval_duration: 60_000,
            creation_period: 60_000,
            interval_offset: 0,
            discard_age: 0,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_duration <= 0 {
            return Err(Error::Config("window.interval_duration must be > 0".into()));
        }
        if self.creation_period <= 0 {
            return Err(Error::Config("window.creation_period must be > 0".into()));
        }
        if self.interval_offset < 0 {
            return Err(Error::Config("window.interval_offset must be >= 0".into()));
        }
        if self.discard_age < 0 {
            return Err(Error::Config("window.discard_age must be >= 0".into()));
        }
        Ok(())
    }
}

/// Event-time source parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventTimeConfig {
    /// Resolution of integer event-time attributes.
    pub resolution: EventTimeResolution,
    /// How far the generated watermark trails the largest event time seen.
    pub lag: EventTime,
    /// Minimum step between two generated watermarks.
    pub min_gap: EventTime,
}

impl Default for EventTimeConfig {
    fn default() -> Self {
        Self {
            resolution: EventTimeResolution::Milliseconds,
            lag: 0,
            min_gap: 0,
        }
    }
}

impl EventTimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lag < 0 || self.min_gap < 0 {
            return Err(Error::Config(
                "event_time.lag and event_time.min_gap must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Checkpoint storage and threading parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory for the file-system store. `None` keeps checkpoints in memory.
    pub store_path: Option<PathBuf>,
    /// A base checkpoint is taken every `incremental_interval` checkpoints.
    /// `1` disables incremental checkpointing.
    pub incremental_interval: u32,
    /// Attempts made for a store operation before giving up.
    pub max_retry: u32,
    /// Sleep between two attempts.
    pub retry_delay_ms: u64,
    /// Size of the checkpoint worker pool.
    pub worker_threads: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            incremental_interval: 1,
            max_retry: 3,
            retry_delay_ms: 1_000,
            worker_threads: 1,
        }
    }
}

impl CheckpointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.incremental_interval == 0 {
            return Err(Error::Config(
                "checkpoint.incremental_interval must be >= 1".into(),
            ));
        }
        if self.max_retry == 0 {
            return Err(Error::Config("checkpoint.max_retry must be >= 1".into()));
        }
        if self.worker_threads == 0 {
            return Err(Error::Config("checkpoint.worker_threads must be >= 1".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> crate::checkpoint::RetryPolicy {
        crate::checkpoint::RetryPolicy::new(
            self.max_retry,
            std::time::Duration::from_millis(self.retry_delay_ms),
        )
    }
}

/// Logging setup consumed by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level filter (e.g. `"info"`, `"debug"`). `RUST_LOG` wins when set.
    pub level: String,
    /// Output format: `plain` or `json`.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
