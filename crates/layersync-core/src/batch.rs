//! Group-wide verification of a color scheme transition.

use futures::future::join_all;
use tracing::{debug, info};

use crate::clock::{SharedClock, as_millis_u64};
use crate::options::ResolvedOptions;
use crate::renderer::Renderer;
use crate::verifier::VisibilityVerifier;
use crate::visibility::{BatchResult, ColorScheme};

/// Verifies that every layer of the themed group reflects a [`ColorScheme`].
///
/// Read-only: the layers are expected to have been mutated already.
#[derive(Debug, Clone)]
pub struct BatchTransitionVerifier {
    clock: SharedClock,
    verifier: VisibilityVerifier,
    group: Vec<String>,
}

impl BatchTransitionVerifier {
    #[must_use]
    pub fn new(clock: SharedClock, verifier: VisibilityVerifier, group: Vec<String>) -> Self {
        Self {
            clock,
            verifier,
            group,
        }
    }

    /// Layer ids checked by [`Self::verify_transition`], in declaration order.
    #[must_use]
    pub fn group(&self) -> &[String] {
        &self.group
    }

    /// Poll every member concurrently and aggregate in declaration order.
    pub async fn verify_transition(
        &self,
        renderer: Option<&dyn Renderer>,
        scheme: ColorScheme,
        options: &ResolvedOptions,
    ) -> BatchResult {
        let Some(renderer) = renderer else {
            debug!(scheme = %scheme, context = %options.context, "No renderer, skipping transition check");
            return BatchResult::unavailable(options.context.clone());
        };

        let expected = scheme.target_visibility();
        let start = self.clock.now();
        let checks = self
            .group
            .iter()
            .map(|layer_id| self.verifier.verify(Some(renderer), layer_id, expected, options));
        let results = join_all(checks).await;

        let batch = BatchResult::from_results(
            results,
            self.clock.elapsed_since(start),
            options.context.clone(),
        );
        info!(
            scheme = %scheme,
            context = %batch.context,
            success_count = batch.success_count,
            failure_count = batch.failure_count,
            duration_ms = as_millis_u64(batch.total_duration),
            "Transition verified"
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::error::SyncError;
    use crate::monitor::{MonitorConfig, PerformanceMonitor};
    use crate::renderer::VISIBILITY_PROPERTY;
    use crate::simulated::SimulatedRenderer;
    use crate::visibility::Visibility;
    use std::sync::Arc;
    use std::time::Duration;

    fn batch(group: &[&str]) -> BatchTransitionVerifier {
        let clock = TokioClock::shared();
        let monitor = Arc::new(PerformanceMonitor::new(
            clock.clone(),
            MonitorConfig::default(),
        ));
        BatchTransitionVerifier::new(
            clock.clone(),
            VisibilityVerifier::new(clock, monitor),
            group.iter().map(ToString::to_string).collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn all_members_converged() {
        let b = batch(&["fill", "outline", "labels"]);
        let r = SimulatedRenderer::new();
        for id in b.group() {
            r.insert_layer(id, Visibility::Visible);
        }
        let result = b
            .verify_transition(Some(&r), ColorScheme::Themed, &ResolvedOptions::default())
            .await;
        assert!(result.success);
        assert_eq!(result.success_count, 3);
        assert_eq!(result.total_duration, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn members_poll_concurrently() {
        let b = batch(&["a", "b", "c"]);
        let r = SimulatedRenderer::new().with_apply_lag(Duration::from_millis(25));
        for id in b.group() {
            r.insert_layer(id, Visibility::Visible);
            r.set_property(id, VISIBILITY_PROPERTY, Visibility::None.to_property_value())
                .unwrap();
        }
        let result = b
            .verify_transition(Some(&r), ColorScheme::Standard, &ResolvedOptions::default())
            .await;
        assert!(result.success, "{result:?}");
        // Sequential polling would need at least 90ms.
        assert!(result.total_duration < Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_keeps_declaration_order() {
        let b = batch(&["slow", "missing", "ok"]);
        let r = SimulatedRenderer::new();
        r.insert_layer("slow", Visibility::Visible);
        r.ignore_writes_to("slow");
        r.insert_layer("ok", Visibility::None);

        let result = b
            .verify_transition(Some(&r), ColorScheme::Standard, &ResolvedOptions::default())
            .await;
        assert!(!result.success);
        let ids: Vec<_> = result.results.iter().map(|v| v.layer_id.as_str()).collect();
        assert_eq!(ids, ["slow", "missing", "ok"]);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 2);
        assert_eq!(
            result.success_count + result.failure_count,
            result.results.len()
        );
        assert_eq!(result.failures().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_renderer_short_circuits() {
        let b = batch(&["a"]);
        let options = ResolvedOptions {
            context: "toggle".to_string(),
            ..ResolvedOptions::default()
        };
        let result = b.verify_transition(None, ColorScheme::Themed, &options).await;
        assert!(!result.success);
        assert!(result.results.is_empty());
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.error, Some(SyncError::Unavailable));
        assert_eq!(result.context, "toggle");
    }
}
