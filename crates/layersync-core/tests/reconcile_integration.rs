//! End-to-end reconciliation through the `LayerSync` service against the
//! simulated renderer, on tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use layersync_core::monitor::OperationKind;
use layersync_core::renderer::{LayerKind, VISIBILITY_PROPERTY};
use layersync_core::simulated::SimulatedRenderer;
use layersync_core::{
    ColorScheme, LayerSpec, LayerSync, LayerSyncConfig, Renderer, SyncError, SyncOptions,
    Visibility,
};

const THEMED: [&str; 3] = ["regions-fill", "regions-line", "regions-label"];

fn config() -> LayerSyncConfig {
    LayerSyncConfig::from_toml_str(
        r#"
        [layers]
        themed = ["regions-fill", "regions-line", "regions-label"]
        secondary = "regions-highlight"

        [[layers.provision]]
        id = "regions-fill"
        kind = "fill"
        source = "regions"
        paint = { "fill-opacity" = 0.5 }

        [[layers.provision]]
        id = "regions-line"
        kind = "line"
        source = "regions"

        [[layers.provision]]
        id = "regions-label"
        kind = "symbol"
        source = "regions"

        [[layers.provision]]
        id = "regions-highlight"
        kind = "line"
        source = "regions"
        "#,
    )
    .unwrap()
}

fn renderer() -> SimulatedRenderer {
    let r = SimulatedRenderer::new().with_apply_lag(Duration::from_millis(5));
    r.insert_source("regions");
    r
}

#[tokio::test(start_paused = true)]
async fn full_session_lifecycle() {
    let sync = LayerSync::new(config()).unwrap();
    let r = renderer();

    let provisioned = sync.provision(Some(&r), &SyncOptions::new().context("startup"));
    assert!(provisioned.iter().all(|p| p.created));
    assert_eq!(
        r.layer_ids(),
        ["regions-fill", "regions-line", "regions-label", "regions-highlight"]
    );
    assert_eq!(
        r.added_layers()[0].kind,
        LayerKind::Fill,
        "specs reach the renderer unchanged apart from visibility"
    );
    for id in THEMED {
        assert_eq!(r.visibility(id), Some(Visibility::None));
    }

    let shown = sync
        .apply_color_scheme(Some(&r), ColorScheme::Themed, &SyncOptions::new())
        .await;
    assert!(shown.success, "{shown:?}");
    let verified = sync
        .verify_transition(Some(&r), ColorScheme::Themed, &SyncOptions::new())
        .await;
    assert!(verified.success);

    let cleaned = sync.cleanup(Some(&r), &SyncOptions::new().context("teardown")).await;
    assert!(cleaned.success, "{cleaned:?}");
    assert_eq!(cleaned.results.len(), THEMED.len() + 2);
    assert!(!r.auxiliary_enabled());
    for id in THEMED {
        assert_eq!(r.visibility(id), Some(Visibility::None));
    }

    let stats = sync.monitor().stats();
    assert_eq!(stats.by_kind.get(&OperationKind::Create), Some(&4));
    assert_eq!(stats.by_kind.get(&OperationKind::Show), Some(&3));
    assert_eq!(stats.by_kind.get(&OperationKind::Cleanup), Some(&1));
    assert_eq!(stats.total, stats.successful + stats.failed);
}

#[tokio::test(start_paused = true)]
async fn lagging_hide_converges_on_second_poll() {
    let sync = LayerSync::new(config()).unwrap();
    let r = renderer();
    r.insert_layer("layerA", Visibility::Visible);
    r.set_property("layerA", VISIBILITY_PROPERTY, Visibility::None.to_property_value())
        .unwrap();

    let result = sync
        .verify_visibility(Some(&r), "layerA", Visibility::None, &SyncOptions::new())
        .await;
    assert!(result.success);
    assert_eq!(result.actual, Some(Visibility::None));
    assert!(result.duration >= Duration::from_millis(10));
    assert!(result.duration < Duration::from_millis(11));
}

#[tokio::test(start_paused = true)]
async fn missing_layer_fails_fast() {
    let sync = LayerSync::new(config()).unwrap();
    let r = renderer();
    let result = sync
        .verify_visibility(Some(&r), "layerB", Visibility::None, &SyncOptions::new())
        .await;
    assert!(!result.success);
    assert_eq!(result.error_message().as_deref(), Some("Layer layerB not found"));
    assert_eq!(result.duration, Duration::ZERO);
    assert_eq!(r.stats().get_property_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_resolves_within_budget_plus_one_interval() {
    let sync = LayerSync::new(config()).unwrap();
    let r = renderer();
    r.insert_layer("stuck", Visibility::Visible);
    r.ignore_writes_to("stuck");

    for timeout_ms in [20u64, 55, 100, 137] {
        let start = tokio::time::Instant::now();
        let result = sync
            .verify_visibility(
                Some(&r),
                "stuck",
                Visibility::None,
                &SyncOptions::new().timeout(Duration::from_millis(timeout_ms)),
            )
            .await;
        let waited = start.elapsed();
        assert!(!result.success);
        assert!(result.error_message().unwrap().contains(&format!("{timeout_ms}ms")));
        assert!(waited <= Duration::from_millis(timeout_ms + 10));
    }
}

#[tokio::test(start_paused = true)]
async fn cleanup_without_renderer() {
    let sync = LayerSync::new(config()).unwrap();
    let result = sync.cleanup(None, &SyncOptions::new()).await;
    assert!(!result.success);
    assert_eq!(result.success_count, 0);
    assert_eq!(result.failure_count, 1);
    assert!(result.results.is_empty());
    assert_eq!(result.error, Some(SyncError::Unavailable));
}

#[tokio::test(start_paused = true)]
async fn rapid_mode_switches_apply_only_the_last() {
    let sync = LayerSync::new(config()).unwrap();
    let r = renderer();
    let _ = sync.provision(Some(&r), &SyncOptions::new());
    let handle: Arc<dyn Renderer> = Arc::new(r.clone());

    let schemes = [
        ColorScheme::Themed,
        ColorScheme::Standard,
        ColorScheme::Themed,
        ColorScheme::Standard,
        ColorScheme::Themed,
    ];
    for scheme in schemes {
        sync.schedule_color_scheme_change(Arc::clone(&handle), scheme);
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert_eq!(sync.scheduler().pending_count(), 1);
    assert_eq!(r.stats().set_property_calls, 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    for id in THEMED {
        assert_eq!(r.visibility(id), Some(Visibility::Visible));
    }
    assert_eq!(r.stats().set_property_calls, THEMED.len() as u64);
    assert_eq!(sync.scheduler().stats().executed, 1);
    assert_eq!(sync.scheduler().stats().superseded, 4);
}

#[tokio::test(start_paused = true)]
async fn provisioning_without_source_creates_nothing() {
    let sync = LayerSync::new(config()).unwrap();
    let r = SimulatedRenderer::new();
    let results = sync.provision(Some(&r), &SyncOptions::new());
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|p| !p.success && !p.existed && !p.created));
    assert!(r.layer_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spec_declared_in_code_matches_config() {
    let spec = LayerSpec::new("regions-fill", LayerKind::Fill, "regions")
        .with_paint("fill-opacity", serde_json::json!(0.5));
    assert_eq!(config().layers.provision[0], spec);
}
