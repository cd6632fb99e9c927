//! Renderer capability interface.
//!
//! The renderer (a map style engine, typically) is foreign, shared and
//! best-effort: `set_property` may be ignored or applied late, and any call
//! may fail. This crate only ever touches it through [`Renderer`].

use serde::{Deserialize, Serialize};

use crate::error::RendererError;
use crate::visibility::Visibility;

/// Value of a named layer property.
pub type PropertyValue = serde_json::Value;

/// Result of a renderer call.
pub type RendererResult<T> = std::result::Result<T, RendererError>;

/// Layout property that carries layer visibility.
pub const VISIBILITY_PROPERTY: &str = "visibility";

/// The narrow surface this crate needs from a renderer.
///
/// All methods are synchronous: a mutation is a command whose effect is
/// confirmed later by polling, never by blocking here.
pub trait Renderer: Send + Sync {
    /// Whether a layer with this id is present in the style.
    fn has_layer(&self, layer_id: &str) -> RendererResult<bool>;

    /// Current value of a layer property, `None` when unset.
    fn get_property(&self, layer_id: &str, name: &str) -> RendererResult<Option<PropertyValue>>;

    /// Request a property change. The effect may lag or never land.
    fn set_property(&self, layer_id: &str, name: &str, value: PropertyValue) -> RendererResult<()>;

    /// Whether a data source with this id is registered.
    fn has_source(&self, source_id: &str) -> RendererResult<bool>;

    /// Add a layer built from `spec`.
    fn add_layer(&self, spec: &LayerSpec) -> RendererResult<()>;

    /// Turn off the auxiliary feature (terrain, for a map renderer).
    fn disable_auxiliary_feature(&self) -> RendererResult<()>;
}

/// Rendering category of a declared layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Fill,
    Line,
    Symbol,
    Circle,
}

/// Declarative description of a layer the provisioner may create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub id: String,
    pub kind: LayerKind,
    /// Source the layer draws from.
    pub source: String,
    #[serde(default)]
    pub paint: serde_json::Map<String, PropertyValue>,
    #[serde(default)]
    pub layout: serde_json::Map<String, PropertyValue>,
}

impl LayerSpec {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: LayerKind, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            source: source.into(),
            paint: serde_json::Map::new(),
            layout: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_paint(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.paint.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_layout(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.layout.insert(name.into(), value);
        self
    }

    /// Copy of this spec whose layout starts out hidden.
    #[must_use]
    pub fn initially_hidden(&self) -> Self {
        let mut spec = self.clone();
        spec.layout.insert(
            VISIBILITY_PROPERTY.to_string(),
            Visibility::None.to_property_value(),
        );
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initially_hidden_overrides_visibility() {
        let spec = LayerSpec::new("borders", LayerKind::Line, "regions")
            .with_layout("visibility", json!("visible"))
            .with_paint("line-width", json!(2));
        let hidden = spec.initially_hidden();
        assert_eq!(hidden.layout.get("visibility"), Some(&json!("none")));
        assert_eq!(hidden.paint.get("line-width"), Some(&json!(2)));
        assert_eq!(spec.layout.get("visibility"), Some(&json!("visible")));
    }

    #[test]
    fn layer_spec_deserializes_with_defaults() {
        let spec: LayerSpec =
            serde_json::from_value(json!({"id": "labels", "kind": "symbol", "source": "regions"}))
                .unwrap();
        assert_eq!(spec.kind, LayerKind::Symbol);
        assert!(spec.paint.is_empty());
        assert!(spec.layout.is_empty());
    }
}
