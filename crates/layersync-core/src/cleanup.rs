//! Hide-everything teardown of the themed overlay.
//!
//! Steps run concurrently on the calling task and are reported in a fixed
//! order: the themed layers, the auxiliary feature, then the secondary layer.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, as_millis_u64};
use crate::error::SyncError;
use crate::monitor::{OperationKind, PerformanceMonitor};
use crate::options::ResolvedOptions;
use crate::renderer::Renderer;
use crate::retry::RetryCoordinator;
use crate::visibility::{BatchResult, VerificationResult, Visibility};

/// Pseudo layer id under which the auxiliary step is reported.
pub const AUXILIARY_STEP_ID: &str = "auxiliary:terrain";

/// Layer id used for the monitor record of a whole cleanup.
const CLEANUP_METRIC_ID: &str = "cleanup";

/// Runs the cleanup sequence.
#[derive(Debug, Clone)]
pub struct CleanupOrchestrator {
    clock: SharedClock,
    monitor: Arc<PerformanceMonitor>,
    coordinator: RetryCoordinator,
    themed: Vec<String>,
    secondary: Option<String>,
}

impl CleanupOrchestrator {
    #[must_use]
    pub fn new(
        clock: SharedClock,
        monitor: Arc<PerformanceMonitor>,
        coordinator: RetryCoordinator,
        themed: Vec<String>,
        secondary: Option<String>,
    ) -> Self {
        Self {
            clock,
            monitor,
            coordinator,
            themed,
            secondary,
        }
    }

    /// Hide every managed layer and disable the auxiliary feature.
    ///
    /// A failing step is recorded in its own slot and never aborts its
    /// siblings. Without a renderer no step is attempted.
    pub async fn cleanup(
        &self,
        renderer: Option<&dyn Renderer>,
        options: &ResolvedOptions,
    ) -> BatchResult {
        let operation_id = self
            .monitor
            .next_operation_id(OperationKind::Cleanup, CLEANUP_METRIC_ID);
        self.monitor.start_operation(
            &operation_id,
            CLEANUP_METRIC_ID,
            OperationKind::Cleanup,
            &options.context,
        );

        let batch = match renderer {
            None => {
                debug!(context = %options.context, "No renderer, cleanup skipped");
                BatchResult::unavailable(options.context.clone())
            }
            Some(renderer) => self.run_steps(renderer, options).await,
        };

        self.monitor.end_operation(
            &operation_id,
            CLEANUP_METRIC_ID,
            OperationKind::Cleanup,
            batch.success,
            &options.context,
        );
        batch
    }

    async fn run_steps(&self, renderer: &dyn Renderer, options: &ResolvedOptions) -> BatchResult {
        let start = self.clock.now();

        let mut steps: Vec<BoxFuture<'_, VerificationResult>> =
            Vec::with_capacity(self.themed.len() + 2);
        for layer_id in &self.themed {
            steps.push(self.hide(renderer, layer_id, options).boxed());
        }
        steps.push(async move { disable_auxiliary(renderer) }.boxed());
        if let Some(layer_id) = &self.secondary {
            steps.push(self.hide(renderer, layer_id, options).boxed());
        }

        let results = join_all(steps).await;
        let batch = BatchResult::from_results(
            results,
            self.clock.elapsed_since(start),
            options.context.clone(),
        );

        if batch.success {
            info!(
                context = %batch.context,
                steps = batch.results.len(),
                duration_ms = as_millis_u64(batch.total_duration),
                "Cleanup complete"
            );
        } else {
            warn!(
                context = %batch.context,
                failure_count = batch.failure_count,
                failed = ?batch.failures().map(|r| r.layer_id.as_str()).collect::<Vec<_>>(),
                "Cleanup finished with failures"
            );
        }
        batch
    }

    async fn hide(
        &self,
        renderer: &dyn Renderer,
        layer_id: &str,
        options: &ResolvedOptions,
    ) -> VerificationResult {
        self.coordinator
            .mutate_and_verify(renderer, layer_id, Visibility::None, options)
            .await
    }
}

/// Fire-and-confirm: success as soon as the call returns without error.
fn disable_auxiliary(renderer: &dyn Renderer) -> VerificationResult {
    match renderer.disable_auxiliary_feature() {
        Ok(()) => VerificationResult::converged(AUXILIARY_STEP_ID, Visibility::None, Duration::ZERO),
        Err(err) => VerificationResult::failed(
            AUXILIARY_STEP_ID,
            Visibility::None,
            None,
            Duration::ZERO,
            SyncError::from(err),
        ),
    }
}
