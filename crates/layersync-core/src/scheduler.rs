//! Debounced, coalescing operation scheduler.
//!
//! Each operation is keyed by a *context* (the logical intent, e.g.
//! `"color_scheme_change"`). Scheduling under a context that already has a
//! pending operation supersedes it, so a burst of requests runs once with the
//! last request's arguments. A global cap bounds the number of pending
//! operations; beyond it the oldest pending operation is evicted, whatever
//! its context.
//!
//! Every pending operation owns one spawned timer task. When the timer fires
//! the task removes its own entry from the pending set, under the same lock
//! that cancellation takes, and only then runs the operation. A cancelled,
//! superseded or evicted operation therefore never executes, even if its
//! abort races with the timer.
//!
//! Operations are fire-and-forget: an `Err` is logged at warn level, a panic
//! is caught and logged at error level, and neither reaches the caller.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Instant, SharedClock, as_millis_u64};
use crate::monitor::{OperationKind, PerformanceMonitor};
use crate::visibility::ColorScheme;

/// Default quiet period before a scheduled operation runs.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);
/// Default global cap on pending operations.
pub const DEFAULT_MAX_PENDING: usize = 3;
/// Context used by [`DebouncedScheduler::schedule_color_scheme_change`].
pub const COLOR_SCHEME_CONTEXT: &str = "color_scheme_change";

/// Monotonic scheduler-assigned operation id.
pub type OperationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    pub max_pending: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// Snapshot of one pending operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperationInfo {
    pub id: OperationId,
    pub context: String,
    pub intent_label: String,
    pub enqueued_at: Instant,
    pub fires_at: Instant,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub executed: u64,
    pub failed: u64,
    pub superseded: u64,
    pub evicted: u64,
    pub cancelled: u64,
}

#[derive(Debug)]
struct PendingOperation {
    id: OperationId,
    context: String,
    intent_label: String,
    enqueued_at: Instant,
    fires_at: Instant,
    timer: Option<JoinHandle<()>>,
}

impl PendingOperation {
    fn info(&self) -> PendingOperationInfo {
        PendingOperationInfo {
            id: self.id,
            context: self.context.clone(),
            intent_label: self.intent_label.clone(),
            enqueued_at: self.enqueued_at,
            fires_at: self.fires_at,
        }
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: BTreeMap<OperationId, PendingOperation>,
    by_context: HashMap<String, OperationId>,
    stats: SchedulerStats,
}

impl SchedulerState {
    fn remove(&mut self, id: OperationId) -> Option<PendingOperation> {
        let op = self.pending.remove(&id)?;
        if self.by_context.get(&op.context) == Some(&id) {
            self.by_context.remove(&op.context);
        }
        Some(op)
    }

    /// Oldest by enqueue time, lower id first on ties.
    fn oldest(&self) -> Option<OperationId> {
        self.pending
            .values()
            .min_by_key(|op| (op.enqueued_at, op.id))
            .map(|op| op.id)
    }
}

#[derive(Debug)]
struct Shared {
    clock: SharedClock,
    monitor: Arc<PerformanceMonitor>,
    config: SchedulerConfig,
    next_id: AtomicU64,
    state: Mutex<SchedulerState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim a due operation. `None` if it was cancelled in the meantime.
    fn take_due(&self, id: OperationId) -> Option<PendingOperation> {
        let mut state = self.lock();
        let op = state.remove(id)?;
        state.stats.executed += 1;
        Some(op)
    }

    async fn execute<F, Fut, E>(&self, op: PendingOperation, run: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let operation_id = format!("{}-{}", OperationKind::Switch, op.id);
        self.monitor
            .start_operation(&operation_id, &op.intent_label, OperationKind::Switch, &op.context);
        debug!(
            operation_id = %operation_id,
            context = %op.context,
            intent = %op.intent_label,
            "Running scheduled operation"
        );

        let outcome = AssertUnwindSafe(async move { run().await })
            .catch_unwind()
            .await;
        let success = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(
                    operation_id = %operation_id,
                    context = %op.context,
                    intent = %op.intent_label,
                    error = %err,
                    "Scheduled operation failed"
                );
                false
            }
            Err(payload) => {
                error!(
                    operation_id = %operation_id,
                    context = %op.context,
                    intent = %op.intent_label,
                    panic = %panic_message(payload.as_ref()),
                    "Scheduled operation panicked"
                );
                false
            }
        };
        if !success {
            self.lock().stats.failed += 1;
        }

        self.monitor.end_operation(
            &operation_id,
            &op.intent_label,
            OperationKind::Switch,
            success,
            &op.context,
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Coalescing scheduler. Dropping it cancels everything still pending.
///
/// Must be used from within a tokio runtime: each scheduled operation spawns
/// its timer task.
#[derive(Debug)]
pub struct DebouncedScheduler {
    shared: Arc<Shared>,
}

impl DebouncedScheduler {
    /// Create a scheduler. A zero `max_pending` is raised to 1.
    #[must_use]
    pub fn new(
        clock: SharedClock,
        monitor: Arc<PerformanceMonitor>,
        config: SchedulerConfig,
    ) -> Self {
        let config = SchedulerConfig {
            max_pending: config.max_pending.max(1),
            ..config
        };
        Self {
            shared: Arc::new(Shared {
                clock,
                monitor,
                config,
                next_id: AtomicU64::new(1),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> SchedulerConfig {
        self.shared.config
    }

    /// Schedule `run` after `delay` (default debounce if `None`).
    ///
    /// Supersedes any pending operation for the same `context`, then evicts
    /// the oldest pending operations while over the global cap.
    pub fn schedule<F, Fut, E>(
        &self,
        context: impl Into<String>,
        intent_label: impl Into<String>,
        delay: Option<Duration>,
        run: F,
    ) -> OperationId
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let context = context.into();
        let intent_label = intent_label.into();
        let delay = delay.unwrap_or(self.shared.config.debounce);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let now = self.shared.clock.now();

        let mut state = self.shared.lock();

        if let Some(previous) = state.by_context.get(&context).copied() {
            if let Some(mut superseded) = state.remove(previous) {
                superseded.disarm();
                state.stats.superseded += 1;
                debug!(
                    operation_id = previous,
                    context = %context,
                    intent = %superseded.intent_label,
                    "Superseded pending operation"
                );
            }
        }

        state.pending.insert(
            id,
            PendingOperation {
                id,
                context: context.clone(),
                intent_label: intent_label.clone(),
                enqueued_at: now,
                fires_at: now + delay,
                timer: None,
            },
        );
        state.by_context.insert(context.clone(), id);
        state.stats.scheduled += 1;

        while state.pending.len() > self.shared.config.max_pending {
            let Some(oldest) = state.oldest() else { break };
            if let Some(mut evicted) = state.remove(oldest) {
                evicted.disarm();
                state.stats.evicted += 1;
                info!(
                    operation_id = oldest,
                    context = %evicted.context,
                    intent = %evicted.intent_label,
                    max_pending = self.shared.config.max_pending,
                    "Evicted oldest pending operation"
                );
            }
        }

        // Spawned under the lock: the timer cannot claim its entry before the
        // handle is stored.
        if state.pending.contains_key(&id) {
            let shared = Arc::clone(&self.shared);
            let sleep = shared.clock.sleep(delay);
            let timer = tokio::spawn(async move {
                sleep.await;
                let Some(op) = shared.take_due(id) else {
                    return;
                };
                shared.execute(op, run).await;
            });
            if let Some(op) = state.pending.get_mut(&id) {
                op.timer = Some(timer);
            }
        }
        drop(state);

        debug!(
            operation_id = id,
            context = %context,
            intent = %intent_label,
            delay_ms = as_millis_u64(delay),
            "Scheduled operation"
        );
        id
    }

    /// Debounce a color scheme switch under [`COLOR_SCHEME_CONTEXT`].
    pub fn schedule_color_scheme_change<F, Fut, E>(&self, scheme: ColorScheme, run: F) -> OperationId
    where
        F: FnOnce(ColorScheme) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.schedule(COLOR_SCHEME_CONTEXT, scheme.as_str(), None, move || run(scheme))
    }

    /// Cancel a pending operation. `false` if it already ran, was already
    /// cancelled, or never existed.
    pub fn cancel(&self, id: OperationId) -> bool {
        let mut state = self.shared.lock();
        match state.remove(id) {
            Some(mut op) => {
                op.disarm();
                state.stats.cancelled += 1;
                debug!(operation_id = id, context = %op.context, "Cancelled pending operation");
                true
            }
            None => false,
        }
    }

    /// Cancel everything pending. Returns how many operations were dropped.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.shared.lock();
        let pending = std::mem::take(&mut state.pending);
        state.by_context.clear();
        let count = pending.len();
        for mut op in pending.into_values() {
            op.disarm();
        }
        state.stats.cancelled += count as u64;
        drop(state);

        if count > 0 {
            debug!(count, "Cancelled all pending operations");
        }
        count
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Pending operations in enqueue order.
    #[must_use]
    pub fn pending_operations(&self) -> Vec<PendingOperationInfo> {
        let state = self.shared.lock();
        let mut ops: Vec<_> = state.pending.values().map(PendingOperation::info).collect();
        drop(state);
        ops.sort_by_key(|op| (op.enqueued_at, op.id));
        ops
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats
    }
}

impl Drop for DebouncedScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
