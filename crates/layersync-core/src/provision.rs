//! Ensures the declared layers exist, creating missing ones hidden.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::monitor::{OperationKind, PerformanceMonitor};
use crate::options::ResolvedOptions;
use crate::renderer::{LayerSpec, Renderer};

/// Per-layer provisioning outcome. `existed` and `created` never both hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub layer_id: String,
    pub success: bool,
    pub existed: bool,
    pub created: bool,
    pub error: Option<SyncError>,
}

impl ProvisioningResult {
    fn existed(layer_id: &str) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            success: true,
            existed: true,
            created: false,
            error: None,
        }
    }

    fn created(layer_id: &str) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            success: true,
            existed: false,
            created: true,
            error: None,
        }
    }

    fn failed(layer_id: &str, error: SyncError) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            success: false,
            existed: false,
            created: false,
            error: Some(error),
        }
    }
}

/// Creates the declared layers, in declaration order.
///
/// Order matters: later layers stack above earlier ones.
#[derive(Debug, Clone)]
pub struct ResourceProvisioner {
    monitor: Arc<PerformanceMonitor>,
    specs: Vec<LayerSpec>,
}

impl ResourceProvisioner {
    #[must_use]
    pub fn new(monitor: Arc<PerformanceMonitor>, specs: Vec<LayerSpec>) -> Self {
        Self { monitor, specs }
    }

    #[must_use]
    pub fn specs(&self) -> &[LayerSpec] {
        &self.specs
    }

    /// Provision every declared layer; one failure never blocks the rest.
    pub fn provision(
        &self,
        renderer: Option<&dyn Renderer>,
        options: &ResolvedOptions,
    ) -> Vec<ProvisioningResult> {
        let Some(renderer) = renderer else {
            debug!(context = %options.context, "No renderer, nothing provisioned");
            return self
                .specs
                .iter()
                .map(|spec| ProvisioningResult::failed(&spec.id, SyncError::Unavailable))
                .collect();
        };

        let results: Vec<_> = self
            .specs
            .iter()
            .map(|spec| self.provision_one(renderer, spec, options))
            .collect();

        let created = results.iter().filter(|r| r.created).count();
        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            context = %options.context,
            declared = results.len(),
            created,
            failed,
            "Provisioning finished"
        );
        results
    }

    fn provision_one(
        &self,
        renderer: &dyn Renderer,
        spec: &LayerSpec,
        options: &ResolvedOptions,
    ) -> ProvisioningResult {
        match renderer.has_layer(&spec.id) {
            Ok(true) => return ProvisioningResult::existed(&spec.id),
            Ok(false) => {}
            Err(err) => {
                warn!(layer_id = %spec.id, error = %err, "Existence check failed");
                return ProvisioningResult::failed(&spec.id, err.into());
            }
        }

        match renderer.has_source(&spec.source) {
            Ok(true) => {}
            Ok(false) => {
                warn!(layer_id = %spec.id, source_id = %spec.source, "Source missing, layer not created");
                return ProvisioningResult::failed(&spec.id, SyncError::source_not_found(&spec.source));
            }
            Err(err) => return ProvisioningResult::failed(&spec.id, err.into()),
        }

        let operation_id = self.monitor.next_operation_id(OperationKind::Create, &spec.id);
        self.monitor
            .start_operation(&operation_id, &spec.id, OperationKind::Create, &options.context);
        let outcome = renderer.add_layer(&spec.initially_hidden());
        self.monitor.end_operation(
            &operation_id,
            &spec.id,
            OperationKind::Create,
            outcome.is_ok(),
            &options.context,
        );

        match outcome {
            Ok(()) => {
                debug!(layer_id = %spec.id, kind = ?spec.kind, "Layer created hidden");
                ProvisioningResult::created(&spec.id)
            }
            Err(err) => {
                warn!(layer_id = %spec.id, error = %err, "Layer creation failed");
                ProvisioningResult::failed(&spec.id, err.into())
            }
        }
    }
}
