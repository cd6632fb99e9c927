//! Operation timing ledger with latency-budget warnings.
//!
//! Every reconciliation step reports here: [`PerformanceMonitor::start_operation`]
//! stamps a start time, [`PerformanceMonitor::end_operation`] turns it into a
//! [`PerformanceMetric`] in a bounded ring. Metrics whose duration exceeds the
//! threshold (100ms by default) carry a warning and are logged.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Instant, SharedClock, as_millis_u64};
use crate::ring_buffer::RingBuffer;

/// Default latency budget per operation.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_millis(100);
/// Default number of retained metrics.
pub const DEFAULT_CAPACITY: usize = 1000;
/// Over-threshold entries included in [`PerformanceStats::recent_warnings`].
pub const RECENT_WARNINGS: usize = 10;

/// What a measured operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Show,
    Hide,
    Verify,
    Create,
    Cleanup,
    /// A debounced operation fired by the scheduler.
    Switch,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Hide => "hide",
            Self::Verify => "verify",
            Self::Create => "create",
            Self::Cleanup => "cleanup",
            Self::Switch => "switch",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub threshold: Duration,
    pub capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// One finished operation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub operation_id: String,
    pub layer_id: String,
    pub kind: OperationKind,
    pub duration: Duration,
    /// Milliseconds since the monitor was created.
    pub timestamp_ms: u64,
    pub success: bool,
    pub context: String,
    pub warning: Option<String>,
}

/// Derived statistics over the retained metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub average_duration_ms: f64,
    pub over_threshold: usize,
    pub over_threshold_percent: f64,
    pub by_kind: BTreeMap<OperationKind, usize>,
    /// Most recent over-threshold metrics, newest first.
    pub recent_warnings: Vec<PerformanceMetric>,
}

#[derive(Debug)]
struct MonitorState {
    started: HashMap<String, Instant>,
    metrics: RingBuffer<PerformanceMetric>,
}

/// Bounded timing ledger. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct PerformanceMonitor {
    clock: SharedClock,
    config: MonitorConfig,
    origin: Instant,
    next_id: AtomicU64,
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    /// Create a monitor. A zero capacity is raised to 1.
    #[must_use]
    pub fn new(clock: SharedClock, config: MonitorConfig) -> Self {
        let capacity = config.capacity.max(1);
        let origin = clock.now();
        Self {
            clock,
            config: MonitorConfig { capacity, ..config },
            origin,
            next_id: AtomicU64::new(1),
            state: Mutex::new(MonitorState {
                started: HashMap::new(),
                metrics: RingBuffer::new(capacity),
            }),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.config.threshold
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Unique id for a new operation, e.g. `hide-roads-17`.
    #[must_use]
    pub fn next_operation_id(&self, kind: OperationKind, layer_id: &str) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{kind}-{layer_id}-{seq}")
    }

    /// Record the start of `operation_id`.
    pub fn start_operation(
        &self,
        operation_id: &str,
        layer_id: &str,
        kind: OperationKind,
        context: &str,
    ) {
        let now = self.clock.now();
        self.lock().started.insert(operation_id.to_string(), now);
        debug!(operation_id, layer_id, %kind, context, "Operation started");
    }

    /// Close `operation_id` and append its metric.
    ///
    /// An id with no recorded start yields a zero duration.
    pub fn end_operation(
        &self,
        operation_id: &str,
        layer_id: &str,
        kind: OperationKind,
        success: bool,
        context: &str,
    ) -> PerformanceMetric {
        let now = self.clock.now();
        let mut state = self.lock();
        let duration = state
            .started
            .remove(operation_id)
            .map_or(Duration::ZERO, |start| now.saturating_duration_since(start));

        let threshold_ms = as_millis_u64(self.config.threshold);
        let duration_ms = as_millis_u64(duration);
        let warning = (duration > self.config.threshold).then(|| {
            format!("Operation exceeded {threshold_ms}ms threshold: {duration_ms}ms")
        });

        let metric = PerformanceMetric {
            operation_id: operation_id.to_string(),
            layer_id: layer_id.to_string(),
            kind,
            duration,
            timestamp_ms: as_millis_u64(now.saturating_duration_since(self.origin)),
            success,
            context: context.to_string(),
            warning,
        };
        state.metrics.push(metric.clone());
        drop(state);

        if let Some(warning) = &metric.warning {
            warn!(
                operation_id,
                layer_id,
                %kind,
                context,
                duration_ms,
                threshold_ms,
                "{warning}"
            );
        }
        metric
    }

    /// Number of operations started but not yet ended.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().started.len()
    }

    /// Retained metrics, oldest first.
    #[must_use]
    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        self.lock().metrics.to_owned_vec()
    }

    /// The `limit` most recent over-threshold metrics, newest first.
    #[must_use]
    pub fn recent_warnings(&self, limit: usize) -> Vec<PerformanceMetric> {
        self.lock()
            .metrics
            .iter_recent()
            .filter(|m| m.warning.is_some())
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> PerformanceStats {
        let state = self.lock();
        let total = state.metrics.len();
        let mut successful = 0usize;
        let mut over_threshold = 0usize;
        let mut total_ms = 0f64;
        let mut by_kind = BTreeMap::new();

        for metric in state.metrics.iter() {
            if metric.success {
                successful += 1;
            }
            if metric.warning.is_some() {
                over_threshold += 1;
            }
            total_ms += metric.duration.as_secs_f64() * 1000.0;
            *by_kind.entry(metric.kind).or_insert(0) += 1;
        }

        let (average_duration_ms, over_threshold_percent) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                total_ms / total as f64,
                over_threshold as f64 * 100.0 / total as f64,
            )
        };

        let recent_warnings = state
            .metrics
            .iter_recent()
            .filter(|m| m.warning.is_some())
            .take(RECENT_WARNINGS)
            .cloned()
            .collect();

        PerformanceStats {
            total,
            successful,
            failed: total - successful,
            average_duration_ms,
            over_threshold,
            over_threshold_percent,
            by_kind,
            recent_warnings,
        }
    }

    /// Drop all metrics and in-flight start records.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.started.clear();
        state.metrics.clear();
    }
}
