//! The [`LayerSync`] service: one explicitly constructed owner for the clock,
//! monitor, configuration and scheduler, exposing every orchestration entry
//! point.
//!
//! Hosts build one instance per renderer session and pass it by reference;
//! tests build as many isolated instances as they like.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use crate::batch::BatchTransitionVerifier;
use crate::cleanup::CleanupOrchestrator;
use crate::clock::{SharedClock, TokioClock, as_millis_u64};
use crate::config::LayerSyncConfig;
use crate::error::{Error, Result};
use crate::monitor::PerformanceMonitor;
use crate::options::{ResolvedOptions, SyncDefaults, SyncOptions};
use crate::provision::{ProvisioningResult, ResourceProvisioner};
use crate::renderer::Renderer;
use crate::retry::RetryCoordinator;
use crate::scheduler::{COLOR_SCHEME_CONTEXT, DebouncedScheduler, OperationId};
use crate::visibility::{BatchResult, ColorScheme, VerificationResult, Visibility};

/// Drives every themed layer to a scheme's visibility. Cheap to clone into
/// scheduled operations.
#[derive(Debug, Clone)]
struct SchemeSwitcher {
    clock: SharedClock,
    coordinator: RetryCoordinator,
    themed: Arc<[String]>,
}

impl SchemeSwitcher {
    async fn apply(
        &self,
        renderer: Option<&dyn Renderer>,
        scheme: ColorScheme,
        options: &ResolvedOptions,
    ) -> BatchResult {
        let Some(renderer) = renderer else {
            return BatchResult::unavailable(options.context.clone());
        };
        let target = scheme.target_visibility();
        let start = self.clock.now();
        let results = join_all(self.themed.iter().map(|layer_id| {
            self.coordinator
                .set_visibility(Some(renderer), layer_id, target, options)
        }))
        .await;
        let batch = BatchResult::from_results(
            results,
            self.clock.elapsed_since(start),
            options.context.clone(),
        );
        info!(
            scheme = %scheme,
            context = %batch.context,
            success = batch.success,
            failure_count = batch.failure_count,
            duration_ms = as_millis_u64(batch.total_duration),
            "Color scheme applied"
        );
        batch
    }
}

/// Reconciliation service for one renderer session.
#[derive(Debug)]
pub struct LayerSync {
    config: LayerSyncConfig,
    defaults: SyncDefaults,
    monitor: Arc<PerformanceMonitor>,
    switcher: SchemeSwitcher,
    batch: BatchTransitionVerifier,
    cleanup: CleanupOrchestrator,
    provisioner: ResourceProvisioner,
    scheduler: DebouncedScheduler,
}

impl LayerSync {
    /// Build a service on the tokio clock.
    pub fn new(config: LayerSyncConfig) -> Result<Self> {
        Self::with_clock(config, TokioClock::shared())
    }

    /// Build a service on an explicit clock.
    pub fn with_clock(config: LayerSyncConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let monitor = Arc::new(PerformanceMonitor::new(
            clock.clone(),
            config.monitor_config(),
        ));
        let coordinator = RetryCoordinator::new(clock.clone(), monitor.clone());
        let themed: Arc<[String]> = config.layers.themed.clone().into();

        let service = Self {
            defaults: config.sync_defaults(),
            switcher: SchemeSwitcher {
                clock: clock.clone(),
                coordinator: coordinator.clone(),
                themed: themed.clone(),
            },
            batch: BatchTransitionVerifier::new(
                clock.clone(),
                coordinator.verifier().clone(),
                themed.to_vec(),
            ),
            cleanup: CleanupOrchestrator::new(
                clock.clone(),
                monitor.clone(),
                coordinator,
                themed.to_vec(),
                config.layers.secondary.clone(),
            ),
            provisioner: ResourceProvisioner::new(monitor.clone(), config.layers.provision.clone()),
            scheduler: DebouncedScheduler::new(clock, monitor.clone(), config.scheduler_config()),
            monitor,
            config,
        };
        debug!(
            themed = service.config.layers.themed.len(),
            provision = service.config.layers.provision.len(),
            "LayerSync ready"
        );
        Ok(service)
    }

    #[must_use]
    pub fn config(&self) -> &LayerSyncConfig {
        &self.config
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    #[must_use]
    pub fn scheduler(&self) -> &DebouncedScheduler {
        &self.scheduler
    }

    /// Fill unset option fields from the configured defaults.
    #[must_use]
    pub fn resolve(&self, options: &SyncOptions) -> ResolvedOptions {
        options.resolve(&self.defaults)
    }

    /// Poll a layer until it reports `expected`, without mutating it.
    pub async fn verify_visibility(
        &self,
        renderer: Option<&dyn Renderer>,
        layer_id: &str,
        expected: Visibility,
        options: &SyncOptions,
    ) -> VerificationResult {
        self.switcher
            .coordinator
            .verifier()
            .verify(renderer, layer_id, expected, &self.resolve(options))
            .await
    }

    /// Set a layer's visibility and confirm it, with retries.
    pub async fn set_visibility(
        &self,
        renderer: Option<&dyn Renderer>,
        layer_id: &str,
        desired: Visibility,
        options: &SyncOptions,
    ) -> VerificationResult {
        self.switcher
            .coordinator
            .set_visibility(renderer, layer_id, desired, &self.resolve(options))
            .await
    }

    /// Confirm the themed group reflects `scheme`.
    pub async fn verify_transition(
        &self,
        renderer: Option<&dyn Renderer>,
        scheme: ColorScheme,
        options: &SyncOptions,
    ) -> BatchResult {
        self.batch
            .verify_transition(renderer, scheme, &self.resolve(options))
            .await
    }

    /// Drive the themed group to `scheme` now, bypassing the debounce.
    pub async fn apply_color_scheme(
        &self,
        renderer: Option<&dyn Renderer>,
        scheme: ColorScheme,
        options: &SyncOptions,
    ) -> BatchResult {
        self.switcher
            .apply(renderer, scheme, &self.resolve(options))
            .await
    }

    /// Hide every managed layer and disable the auxiliary feature.
    pub async fn cleanup(
        &self,
        renderer: Option<&dyn Renderer>,
        options: &SyncOptions,
    ) -> BatchResult {
        self.cleanup.cleanup(renderer, &self.resolve(options)).await
    }

    /// Create any declared layer that is missing.
    pub fn provision(
        &self,
        renderer: Option<&dyn Renderer>,
        options: &SyncOptions,
    ) -> Vec<ProvisioningResult> {
        self.provisioner.provision(renderer, &self.resolve(options))
    }

    /// Debounced [`apply_color_scheme`](Self::apply_color_scheme).
    ///
    /// Rapid calls coalesce: only the last scheme within the debounce window
    /// is applied. A failed switch is logged by the scheduler.
    pub fn schedule_color_scheme_change(
        &self,
        renderer: Arc<dyn Renderer>,
        scheme: ColorScheme,
    ) -> OperationId {
        let switcher = self.switcher.clone();
        let options = self.resolve(&SyncOptions::new().context(COLOR_SCHEME_CONTEXT));
        self.scheduler
            .schedule_color_scheme_change(scheme, move |scheme| async move {
                let batch = switcher
                    .apply(Some(renderer.as_ref()), scheme, &options)
                    .await;
                if batch.success {
                    Ok(())
                } else {
                    let failed: Vec<_> = batch.failures().map(|r| r.layer_id.as_str()).collect();
                    Err(Error::Operation(format!(
                        "switch to {scheme} left {} layer(s) unconverged: {}",
                        batch.failure_count,
                        failed.join(", ")
                    )))
                }
            })
    }

    /// Cancel every pending scheduled operation.
    pub fn shutdown(&self) -> usize {
        self.scheduler.cancel_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{LayerKind, LayerSpec};
    use crate::simulated::SimulatedRenderer;
    use std::time::Duration;

    fn config() -> LayerSyncConfig {
        let mut config = LayerSyncConfig::default();
        config.layers.themed = vec!["fill".into(), "line".into()];
        config.layers.secondary = Some("highlight".into());
        config.layers.provision = vec![
            LayerSpec::new("fill", LayerKind::Fill, "regions"),
            LayerSpec::new("line", LayerKind::Line, "regions"),
            LayerSpec::new("highlight", LayerKind::Line, "regions"),
        ];
        config
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config();
        bad.verify.timeout_ms = 0;
        assert!(matches!(LayerSync::new(bad), Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_options_override_config() {
        let mut cfg = config();
        cfg.verify.timeout_ms = 300;
        let sync = LayerSync::new(cfg).unwrap();
        let resolved = sync.resolve(&SyncOptions::new().retries(1));
        assert_eq!(resolved.timeout, Duration::from_millis(300));
        assert_eq!(resolved.retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn apply_then_verify_scheme() {
        let sync = LayerSync::new(config()).unwrap();
        let r = SimulatedRenderer::new().with_apply_lag(Duration::from_millis(5));
        r.insert_source("regions");
        let _ = sync.provision(Some(&r), &SyncOptions::new());

        let applied = sync
            .apply_color_scheme(Some(&r), ColorScheme::Themed, &SyncOptions::new())
            .await;
        assert!(applied.success, "{applied:?}");
        let verified = sync
            .verify_transition(Some(&r), ColorScheme::Themed, &SyncOptions::new())
            .await;
        assert!(verified.success);
        assert_eq!(verified.total_duration, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_switch_coalesces() {
        let sync = LayerSync::new(config()).unwrap();
        let r = SimulatedRenderer::new();
        for id in ["fill", "line"] {
            r.insert_layer(id, Visibility::None);
        }
        let renderer: Arc<dyn Renderer> = Arc::new(r.clone());

        sync.schedule_color_scheme_change(renderer.clone(), ColorScheme::Themed);
        sync.schedule_color_scheme_change(renderer.clone(), ColorScheme::Standard);
        sync.schedule_color_scheme_change(renderer, ColorScheme::Themed);
        assert_eq!(sync.scheduler().pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(r.visibility("fill"), Some(Visibility::Visible));
        assert_eq!(r.visibility("line"), Some(Visibility::Visible));
        // One write per themed layer: only the last request ran.
        assert_eq!(r.stats().set_property_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_switch() {
        let sync = LayerSync::new(config()).unwrap();
        let r = SimulatedRenderer::new();
        r.insert_layer("fill", Visibility::None);
        sync.schedule_color_scheme_change(Arc::new(r.clone()), ColorScheme::Themed);
        assert_eq!(sync.shutdown(), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(r.stats().set_property_calls, 0);
    }
}
