//! Per-call options accepted by every orchestration entry point.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default verification timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);
/// Default poll interval while verifying.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Default number of mutate-then-verify attempts.
pub const DEFAULT_RETRIES: u32 = 3;
/// Fixed pause between failed attempts, letting the renderer drain its queue.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Caller-supplied overrides. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    pub retries: Option<u32>,
    pub context: Option<String>,
}

impl SyncOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Fill unset fields from `defaults`.
    #[must_use]
    pub fn resolve(&self, defaults: &SyncDefaults) -> ResolvedOptions {
        ResolvedOptions {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            retries: self.retries.unwrap_or(defaults.retries),
            retry_delay: defaults.retry_delay,
            context: self.context.clone().unwrap_or_default(),
        }
    }
}

/// Service-wide defaults, usually built from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDefaults {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Options with every field decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub context: String,
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        SyncOptions::default().resolve(&SyncDefaults::default())
    }
}
