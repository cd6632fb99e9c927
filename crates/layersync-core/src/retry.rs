//! Mutate-then-verify with bounded, fixed-delay retries.
//!
//! Each attempt re-checks that the layer exists (the provisioner may create it
//! concurrently), issues the `visibility` command, then hands off to the
//! [`VisibilityVerifier`] to confirm it landed. Failed attempts are separated
//! by a fixed delay that lets the renderer drain its internal queue; there is
//! no exponential growth.
//!
//! # Usage
//!
//! ```rust,ignore
//! let coordinator = RetryCoordinator::new(clock, monitor);
//! let result = coordinator
//!     .set_visibility(Some(&renderer), "borders", Visibility::None, &options)
//!     .await;
//! if !result.success {
//!     tracing::warn!(error = ?result.error, "borders still visible");
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, SharedClock, as_millis_u64};
use crate::error::SyncError;
use crate::monitor::{OperationKind, PerformanceMonitor};
use crate::options::{DEFAULT_RETRIES, DEFAULT_RETRY_DELAY, ResolvedOptions};
use crate::renderer::{Renderer, VISIBILITY_PROPERTY};
use crate::verifier::VisibilityVerifier;
use crate::visibility::{VerificationResult, Visibility};

/// Attempt budget and inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause after each failed attempt except the last.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Policy taken from resolved call options.
    #[must_use]
    pub fn from_options(options: &ResolvedOptions) -> Self {
        Self::new(options.retries, options.retry_delay)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The first success, or the last failure.
    pub result: Result<T, E>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Total time spent (including delays).
    pub elapsed: Duration,
}

/// Run `operation` until it succeeds or the policy's attempts are spent.
///
/// `operation` receives the 1-based attempt number. Attempts are strictly
/// sequential; the only suspension between them is the policy's delay.
pub async fn with_retry_outcome<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let start = clock.now();
    let max = policy.attempts();
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        total_attempts = attempt,
                        retries = attempt - 1,
                        "Operation succeeded after retries"
                    );
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    elapsed: clock.elapsed_since(start),
                };
            }
            Err(e) => {
                if attempt >= max {
                    warn!(
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                        elapsed: clock.elapsed_since(start),
                    };
                }

                debug!(
                    attempt,
                    delay_ms = as_millis_u64(policy.retry_delay),
                    error = %e,
                    "Retrying operation after failure"
                );
                clock.sleep(policy.retry_delay).await;
                attempt += 1;
            }
        }
    }
}

/// Failed attempt: what went wrong and what the layer looked like.
#[derive(Debug, Clone)]
struct AttemptFailure {
    error: SyncError,
    actual: Option<Visibility>,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

/// Drives a layer to a desired visibility with verification and retries.
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    clock: SharedClock,
    monitor: Arc<PerformanceMonitor>,
    verifier: VisibilityVerifier,
}

impl RetryCoordinator {
    #[must_use]
    pub fn new(clock: SharedClock, monitor: Arc<PerformanceMonitor>) -> Self {
        let verifier = VisibilityVerifier::new(clock.clone(), monitor.clone());
        Self {
            clock,
            monitor,
            verifier,
        }
    }

    #[must_use]
    pub fn verifier(&self) -> &VisibilityVerifier {
        &self.verifier
    }

    /// Set `layer_id`'s visibility and confirm it, retrying per `options`.
    ///
    /// A missing renderer fails immediately and is never retried. Every other
    /// failure is retried until `options.retries` attempts have been made;
    /// the final error is [`SyncError::RetriesExhausted`] wrapping the last
    /// attempt's error.
    pub async fn set_visibility(
        &self,
        renderer: Option<&dyn Renderer>,
        layer_id: &str,
        desired: Visibility,
        options: &ResolvedOptions,
    ) -> VerificationResult {
        let kind = match desired {
            Visibility::Visible => OperationKind::Show,
            Visibility::None => OperationKind::Hide,
        };
        let operation_id = self.monitor.next_operation_id(kind, layer_id);
        self.monitor
            .start_operation(&operation_id, layer_id, kind, &options.context);

        let result = match renderer {
            None => VerificationResult::failed(
                layer_id,
                desired,
                None,
                Duration::ZERO,
                SyncError::Unavailable,
            ),
            Some(renderer) => self.retry_loop(renderer, layer_id, desired, options).await,
        };

        self.monitor
            .end_operation(&operation_id, layer_id, kind, result.success, &options.context);
        result
    }

    async fn retry_loop(
        &self,
        renderer: &dyn Renderer,
        layer_id: &str,
        desired: Visibility,
        options: &ResolvedOptions,
    ) -> VerificationResult {
        let policy = RetryPolicy::from_options(options);
        let outcome = with_retry_outcome(&policy, self.clock.as_ref(), move |attempt| {
            self.attempt(renderer, layer_id, desired, options, attempt)
        })
        .await;

        match outcome.result {
            Ok(actual) => VerificationResult {
                layer_id: layer_id.to_string(),
                expected: desired,
                actual: Some(actual),
                duration: outcome.elapsed,
                success: true,
                error: None,
            },
            Err(failure) => VerificationResult::failed(
                layer_id,
                desired,
                failure.actual,
                outcome.elapsed,
                SyncError::RetriesExhausted {
                    attempts: outcome.attempts,
                    last: Box::new(failure.error),
                },
            ),
        }
    }

    async fn attempt(
        &self,
        renderer: &dyn Renderer,
        layer_id: &str,
        desired: Visibility,
        options: &ResolvedOptions,
        attempt: u32,
    ) -> Result<Visibility, AttemptFailure> {
        let result = self
            .mutate_and_verify(renderer, layer_id, desired, options)
            .await;
        if result.success {
            return Ok(desired);
        }
        debug!(
            layer_id,
            attempt,
            context = %options.context,
            error = ?result.error_message(),
            "Visibility attempt failed"
        );
        Err(AttemptFailure {
            error: result.error.unwrap_or(SyncError::Timeout {
                timeout_ms: as_millis_u64(options.timeout),
            }),
            actual: result.actual,
        })
    }

    /// One unretried cycle: existence check, command, confirmation.
    pub(crate) async fn mutate_and_verify(
        &self,
        renderer: &dyn Renderer,
        layer_id: &str,
        desired: Visibility,
        options: &ResolvedOptions,
    ) -> VerificationResult {
        let start = self.clock.now();
        let failed = |error: SyncError| {
            VerificationResult::failed(
                layer_id,
                desired,
                None,
                self.clock.elapsed_since(start),
                error,
            )
        };

        match renderer.has_layer(layer_id) {
            Ok(true) => {}
            Ok(false) => return failed(SyncError::layer_not_found(layer_id)),
            Err(err) => return failed(err.into()),
        }

        if let Err(err) =
            renderer.set_property(layer_id, VISIBILITY_PROPERTY, desired.to_property_value())
        {
            return failed(err.into());
        }

        self.verifier
            .verify(Some(renderer), layer_id, desired, options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::error::FailureKind;
    use crate::monitor::MonitorConfig;
    use crate::simulated::SimulatedRenderer;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn coordinator() -> (RetryCoordinator, Arc<PerformanceMonitor>) {
        let clock = TokioClock::shared();
        let monitor = Arc::new(PerformanceMonitor::new(
            clock.clone(),
            MonitorConfig::default(),
        ));
        (RetryCoordinator::new(clock, monitor.clone()), monitor)
    }

    #[tokio::test(start_paused = true)]
    async fn generic_retry_succeeds_after_failures() {
        let clock = TokioClock;
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy::new(5, Duration::from_millis(20));

        let outcome = with_retry_outcome(&policy, &clock, move |_| async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient")
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.elapsed >= Duration::from_millis(40));
        assert!(outcome.elapsed < Duration::from_millis(41));
    }

    #[tokio::test(start_paused = true)]
    async fn generic_retry_exhausts_without_trailing_delay() {
        let clock = TokioClock;
        let policy = RetryPolicy::new(3, Duration::from_millis(20));

        let outcome: RetryOutcome<(), &str> =
            with_retry_outcome(&policy, &clock, |_| async { Err("persistent") }).await;

        assert_eq!(outcome.attempts, 3);
        assert!(outcome.result.is_err());
        assert!(outcome.elapsed < Duration::from_millis(41));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let clock = TokioClock;
        let policy = RetryPolicy {
            max_attempts: 0,
            retry_delay: Duration::from_millis(20),
        };
        let outcome: RetryOutcome<(), &str> =
            with_retry_outcome(&policy, &clock, |_| async { Err("no") }).await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_successful_attempt_returns() {
        let (c, _) = coordinator();
        let renderer = SimulatedRenderer::new();
        renderer.insert_layer("layerA", Visibility::Visible);

        let result = c
            .set_visibility(Some(&renderer), "layerA", Visibility::None, &ResolvedOptions::default())
            .await;
        assert!(result.success);
        assert_eq!(result.actual, Some(Visibility::None));
        assert_eq!(renderer.stats().set_property_calls, 1);
        assert_eq!(renderer.visibility("layerA"), Some(Visibility::None));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_layer_exhausts_all_attempts() {
        let (c, _) = coordinator();
        let renderer = SimulatedRenderer::new();

        let result = c
            .set_visibility(Some(&renderer), "nowhere", Visibility::None, &ResolvedOptions::default())
            .await;
        assert!(!result.success);
        assert_eq!(renderer.stats().has_layer_calls, 3);
        assert_eq!(renderer.stats().set_property_calls, 0);
        assert_eq!(
            result.error_message().as_deref(),
            Some("Failed after 3 attempts: Layer nowhere not found")
        );
        // Two 20ms gaps between three attempts.
        assert!(result.duration >= Duration::from_millis(40));
        assert!(result.duration < Duration::from_millis(41));
    }

    #[tokio::test(start_paused = true)]
    async fn layer_created_between_attempts_is_picked_up() {
        let (c, _) = coordinator();
        let renderer = SimulatedRenderer::new();

        let creator = {
            let renderer = renderer.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                renderer.insert_layer("late", Visibility::Visible);
            }
        };
        let options = ResolvedOptions::default();
        let (result, ()) = tokio::join!(
            c.set_visibility(Some(&renderer), "late", Visibility::None, &options),
            creator
        );
        assert!(result.success, "{result:?}");
        // Miss on attempt one; attempt two checks before writing and again in verify.
        assert_eq!(renderer.stats().has_layer_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn thrown_mutation_is_retried() {
        let (c, _) = coordinator();
        let renderer = SimulatedRenderer::new();
        renderer.insert_layer("flaky", Visibility::Visible);
        renderer.fail_next_writes("flaky", 2, "queue full");

        let result = c
            .set_visibility(Some(&renderer), "flaky", Visibility::None, &ResolvedOptions::default())
            .await;
        assert!(result.success, "{result:?}");
        assert_eq!(renderer.stats().set_property_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_writes_time_out_every_attempt() {
        let (c, _) = coordinator();
        let renderer = SimulatedRenderer::new();
        renderer.insert_layer("deaf", Visibility::Visible);
        renderer.ignore_writes_to("deaf");

        let options = ResolvedOptions {
            retries: 2,
            ..ResolvedOptions::default()
        };
        let result = c
            .set_visibility(Some(&renderer), "deaf", Visibility::None, &options)
            .await;
        assert!(!result.success);
        assert_eq!(result.actual, Some(Visibility::Visible));
        let err = result.error.unwrap();
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(err.to_string().starts_with("Failed after 2 attempts"));
        assert_eq!(renderer.stats().set_property_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_renderer_is_not_retried() {
        let (c, monitor) = coordinator();
        let result = c
            .set_visibility(None, "layerA", Visibility::Visible, &ResolvedOptions::default())
            .await;
        assert_eq!(result.error, Some(SyncError::Unavailable));
        assert_eq!(result.duration, Duration::ZERO);
        assert_eq!(monitor.stats().by_kind.get(&OperationKind::Show), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_calls_on_converged_state_are_idempotent() {
        let (c, _) = coordinator();
        let renderer = SimulatedRenderer::new();
        renderer.insert_layer("steady", Visibility::None);
        let options = ResolvedOptions::default();

        let first = c
            .set_visibility(Some(&renderer), "steady", Visibility::None, &options)
            .await;
        let second = c
            .set_visibility(Some(&renderer), "steady", Visibility::None, &options)
            .await;
        assert!(first.success && second.success);
        assert_eq!(first.duration, Duration::ZERO);
        assert_eq!(second.duration, Duration::ZERO);
        let writes = renderer.write_log();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.value == serde_json::json!("none")));
    }

    #[tokio::test(start_paused = true)]
    async fn hide_and_show_are_recorded_by_kind() {
        let (c, monitor) = coordinator();
        let renderer = SimulatedRenderer::new();
        renderer.insert_layer("a", Visibility::Visible);
        let options = ResolvedOptions::default();
        let _ = c.set_visibility(Some(&renderer), "a", Visibility::None, &options).await;
        let _ = c.set_visibility(Some(&renderer), "a", Visibility::Visible, &options).await;

        let stats = monitor.stats();
        assert_eq!(stats.by_kind.get(&OperationKind::Hide), Some(&1));
        assert_eq!(stats.by_kind.get(&OperationKind::Show), Some(&1));
        assert_eq!(stats.by_kind.get(&OperationKind::Verify), Some(&2));
    }
}
