//! Poll-until-converged verification of a single layer's visibility.
//!
//! The verifier is read-only: it never mutates the renderer, it only watches
//! a previously issued command land (or fail to).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::{Instant, SharedClock, as_millis_u64};
use crate::error::SyncError;
use crate::monitor::{OperationKind, PerformanceMonitor};
use crate::options::ResolvedOptions;
use crate::renderer::{Renderer, VISIBILITY_PROPERTY};
use crate::visibility::{VerificationResult, Visibility};

/// Floor applied to the poll interval so a zero setting cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polls a layer's `visibility` until it matches or the timeout elapses.
#[derive(Debug, Clone)]
pub struct VisibilityVerifier {
    clock: SharedClock,
    monitor: Arc<PerformanceMonitor>,
}

impl VisibilityVerifier {
    #[must_use]
    pub fn new(clock: SharedClock, monitor: Arc<PerformanceMonitor>) -> Self {
        Self { clock, monitor }
    }

    /// Wait for `layer_id` to report `expected`.
    ///
    /// Always resolves; failures are described by the returned result:
    /// - no renderer: [`SyncError::Unavailable`], no polling
    /// - layer absent at call time: [`SyncError::LayerNotFound`], no polling
    /// - renderer error while polling: [`SyncError::Renderer`], polling stops
    /// - no convergence: [`SyncError::Timeout`] with the last observed state
    pub async fn verify(
        &self,
        renderer: Option<&dyn Renderer>,
        layer_id: &str,
        expected: Visibility,
        options: &ResolvedOptions,
    ) -> VerificationResult {
        let operation_id = self.monitor.next_operation_id(OperationKind::Verify, layer_id);
        self.monitor
            .start_operation(&operation_id, layer_id, OperationKind::Verify, &options.context);

        let result = self.poll(renderer, layer_id, expected, options).await;

        self.monitor.end_operation(
            &operation_id,
            layer_id,
            OperationKind::Verify,
            result.success,
            &options.context,
        );
        result
    }

    async fn poll(
        &self,
        renderer: Option<&dyn Renderer>,
        layer_id: &str,
        expected: Visibility,
        options: &ResolvedOptions,
    ) -> VerificationResult {
        let start = self.clock.now();

        let Some(renderer) = renderer else {
            return VerificationResult::failed(
                layer_id,
                expected,
                None,
                Duration::ZERO,
                SyncError::Unavailable,
            );
        };

        match renderer.has_layer(layer_id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(layer_id, context = %options.context, "Layer missing, not polling");
                return VerificationResult::failed(
                    layer_id,
                    expected,
                    None,
                    self.clock.elapsed_since(start),
                    SyncError::layer_not_found(layer_id),
                );
            }
            Err(err) => {
                return VerificationResult::failed(
                    layer_id,
                    expected,
                    None,
                    self.clock.elapsed_since(start),
                    err.into(),
                );
            }
        }

        let deadline = start + options.timeout;
        let interval = options.poll_interval.max(MIN_POLL_INTERVAL);
        let mut last_seen = None;
        let mut polls = 0u32;

        loop {
            polls += 1;
            match renderer.get_property(layer_id, VISIBILITY_PROPERTY) {
                Ok(value) => {
                    let actual = Visibility::from_property(layer_id, value.as_ref());
                    last_seen = Some(actual);
                    if actual == expected {
                        let elapsed = self.clock.elapsed_since(start);
                        trace!(
                            layer_id,
                            polls,
                            duration_ms = as_millis_u64(elapsed),
                            "Visibility converged"
                        );
                        return VerificationResult::converged(layer_id, expected, elapsed);
                    }
                }
                Err(err) => {
                    debug!(layer_id, polls, error = %err, "Renderer failed during poll");
                    return VerificationResult::failed(
                        layer_id,
                        expected,
                        last_seen,
                        self.clock.elapsed_since(start),
                        err.into(),
                    );
                }
            }

            let now = self.clock.now();
            if now >= deadline {
                let timeout_ms = as_millis_u64(options.timeout);
                debug!(
                    layer_id,
                    polls,
                    timeout_ms,
                    expected = %expected,
                    actual = ?last_seen,
                    "Visibility verification timed out"
                );
                return VerificationResult::failed(
                    layer_id,
                    expected,
                    last_seen,
                    now.saturating_duration_since(start),
                    SyncError::Timeout { timeout_ms },
                );
            }

            self.clock.sleep(interval.min(remaining(deadline, now))).await;
        }
    }
}

fn remaining(deadline: Instant, now: Instant) -> Duration {
    deadline.saturating_duration_since(now)
}
