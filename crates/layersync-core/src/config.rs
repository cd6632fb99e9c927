//! Configuration management for layersync
//!
//! Handles loading and validation of `layersync.toml` files. Every section
//! and field is optional; omitted values take the built-in defaults.
//!
//! ```toml
//! [verify]
//! timeout_ms = 100
//! poll_interval_ms = 10
//!
//! [retry]
//! max_attempts = 3
//! retry_delay_ms = 20
//!
//! [scheduler]
//! debounce_ms = 150
//! max_pending = 3
//!
//! [monitor]
//! threshold_ms = 100
//! capacity = 1000
//!
//! [layers]
//! themed = ["regions-fill", "regions-line", "regions-label"]
//! secondary = "regions-highlight"
//!
//! [[layers.provision]]
//! id = "regions-fill"
//! kind = "fill"
//! source = "regions"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::monitor::MonitorConfig;
use crate::options::SyncDefaults;
use crate::renderer::LayerSpec;
use crate::scheduler::SchedulerConfig;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LayerSyncConfig {
    /// Verification polling
    #[serde(default)]
    pub verify: VerifyConfig,

    /// Mutate-then-verify retries
    #[serde(default)]
    pub retry: RetryConfig,

    /// Debounced scheduling
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Performance telemetry
    #[serde(default)]
    pub monitor: MonitorSection,

    /// Managed layers
    #[serde(default)]
    pub layers: LayersConfig,

    /// Logging
    #[serde(default)]
    pub logging: LogConfig,
}

/// Verification configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Give up polling after this long
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Time between polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    10
}

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between failed attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    20
}

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Quiet period before a scheduled operation runs
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Global cap on pending operations
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_pending: default_max_pending(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    150
}

fn default_max_pending() -> usize {
    3
}

/// Monitor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSection {
    /// Operations slower than this carry a warning
    #[serde(default = "default_threshold_ms")]
    pub threshold_ms: u64,

    /// Metrics retained
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            threshold_ms: default_threshold_ms(),
            capacity: default_capacity(),
        }
    }
}

fn default_threshold_ms() -> u64 {
    100
}

fn default_capacity() -> usize {
    1000
}

/// Layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayersConfig {
    /// Themed group, in declaration order
    #[serde(default = "default_themed")]
    pub themed: Vec<String>,

    /// Secondary layer hidden during cleanup
    #[serde(default)]
    pub secondary: Option<String>,

    /// Layers the provisioner creates, bottom first
    #[serde(default)]
    pub provision: Vec<LayerSpec>,
}

impl Default for LayersConfig {
    fn default() -> Self {
        Self {
            themed: default_themed(),
            secondary: None,
            provision: Vec::new(),
        }
    }
}

fn default_themed() -> Vec<String> {
    vec![
        "themed-fill".to_string(),
        "themed-line".to_string(),
        "themed-label".to_string(),
    ]
}

impl LayerSyncConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load and validate configuration from a specific path
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the services misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be > 0".to_string(),
                });
            }
            Ok(())
        }

        positive("verify.timeout_ms", self.verify.timeout_ms)?;
        positive("verify.poll_interval_ms", self.verify.poll_interval_ms)?;
        positive("scheduler.max_pending", self.scheduler.max_pending as u64)?;
        positive("monitor.capacity", self.monitor.capacity as u64)?;
        if self.layers.themed.is_empty() {
            return Err(ConfigError::Invalid {
                field: "layers.themed",
                reason: "at least one layer is required".to_string(),
            });
        }
        if let Err(reason) = self.logging.level.parse::<crate::logging::LogLevel>() {
            return Err(ConfigError::Invalid {
                field: "logging.level",
                reason,
            });
        }
        Ok(())
    }

    /// Per-call option defaults
    #[must_use]
    pub fn sync_defaults(&self) -> SyncDefaults {
        SyncDefaults {
            timeout: Duration::from_millis(self.verify.timeout_ms),
            poll_interval: Duration::from_millis(self.verify.poll_interval_ms),
            retries: self.retry.max_attempts,
            retry_delay: Duration::from_millis(self.retry.retry_delay_ms),
        }
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(self.scheduler.debounce_ms),
            max_pending: self.scheduler.max_pending,
        }
    }

    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            threshold: Duration::from_millis(self.monitor.threshold_ms),
            capacity: self.monitor.capacity,
        }
    }
}
