//! In-memory [`Renderer`] with configurable misbehaviour.
//!
//! Models the failure modes reconciliation has to survive: writes that land
//! late ([`SimulatedRenderer::with_apply_lag`]), writes that are silently
//! dropped, and calls that fail. Time is read from tokio, so under a paused
//! runtime the lag is fully deterministic.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::RendererError;
use crate::renderer::{LayerSpec, PropertyValue, Renderer, RendererResult, VISIBILITY_PROPERTY};
use crate::visibility::Visibility;

/// Call counters, for asserting how hard a caller hit the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererCallStats {
    pub has_layer_calls: u64,
    pub get_property_calls: u64,
    pub set_property_calls: u64,
    pub has_source_calls: u64,
    pub add_layer_calls: u64,
    pub disable_auxiliary_calls: u64,
}

/// One accepted `set_property` command.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub layer_id: String,
    pub name: String,
    pub value: PropertyValue,
}

#[derive(Debug)]
struct PendingWrite {
    layer_id: String,
    name: String,
    value: PropertyValue,
    apply_at: Instant,
}

#[derive(Debug, Default)]
struct Faults {
    ignore_writes: BTreeSet<String>,
    failing_reads: HashMap<String, String>,
    failing_writes: HashMap<String, (u32, String)>,
    failing_existence: HashMap<String, String>,
    failing_adds: HashMap<String, String>,
    failing_auxiliary: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    /// Layer ids in stacking order, bottom first.
    order: Vec<String>,
    properties: HashMap<String, HashMap<String, PropertyValue>>,
    sources: BTreeSet<String>,
    pending: Vec<PendingWrite>,
    writes: Vec<WriteRecord>,
    added: Vec<LayerSpec>,
    auxiliary_enabled: bool,
    faults: Faults,
    stats: RendererCallStats,
}

impl State {
    /// Land every pending write whose time has come, in issue order.
    fn settle(&mut self, now: Instant) {
        if self.pending.is_empty() {
            return;
        }
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|w| w.apply_at <= now);
        self.pending = waiting;
        for write in due {
            if let Some(props) = self.properties.get_mut(&write.layer_id) {
                props.insert(write.name, write.value);
            }
        }
    }
}

/// Shared, cloneable simulated renderer. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct SimulatedRenderer {
    apply_lag: Duration,
    state: Arc<Mutex<State>>,
}

impl Default for SimulatedRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRenderer {
    /// A renderer that applies writes immediately, with terrain enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            apply_lag: Duration::ZERO,
            state: Arc::new(Mutex::new(State {
                auxiliary_enabled: true,
                ..State::default()
            })),
        }
    }

    /// Delay between a `set_property` and its effect becoming readable.
    #[must_use]
    pub fn with_apply_lag(mut self, lag: Duration) -> Self {
        self.apply_lag = lag;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn settled(&self) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        state.settle(Instant::now());
        state
    }

    // -- Scene setup --------------------------------------------------------

    /// Add (or reset) a layer with the given visibility.
    pub fn insert_layer(&self, layer_id: &str, visibility: Visibility) {
        let mut state = self.lock();
        if !state.properties.contains_key(layer_id) {
            state.order.push(layer_id.to_string());
        }
        let mut props = HashMap::new();
        props.insert(
            VISIBILITY_PROPERTY.to_string(),
            visibility.to_property_value(),
        );
        state.properties.insert(layer_id.to_string(), props);
    }

    /// Add a layer whose `visibility` was never set.
    pub fn insert_unstyled_layer(&self, layer_id: &str) {
        let mut state = self.lock();
        if !state.properties.contains_key(layer_id) {
            state.order.push(layer_id.to_string());
        }
        state
            .properties
            .insert(layer_id.to_string(), HashMap::new());
    }

    pub fn remove_layer(&self, layer_id: &str) {
        let mut state = self.lock();
        state.properties.remove(layer_id);
        state.order.retain(|id| id != layer_id);
        state.pending.retain(|w| w.layer_id != layer_id);
    }

    pub fn insert_source(&self, source_id: &str) {
        self.lock().sources.insert(source_id.to_string());
    }

    /// Overwrite a property directly, bypassing lag and faults.
    pub fn force_raw_property(&self, layer_id: &str, name: &str, value: PropertyValue) {
        if let Some(props) = self.lock().properties.get_mut(layer_id) {
            props.insert(name.to_string(), value);
        }
    }

    // -- Fault injection ----------------------------------------------------

    /// Accept writes to `layer_id` but never apply them.
    pub fn ignore_writes_to(&self, layer_id: &str) {
        self.lock().faults.ignore_writes.insert(layer_id.to_string());
    }

    /// Make every `get_property` on `layer_id` fail.
    pub fn fail_reads_of(&self, layer_id: &str, message: &str) {
        self.lock()
            .faults
            .failing_reads
            .insert(layer_id.to_string(), message.to_string());
    }

    /// Make the next `count` writes to `layer_id` fail.
    pub fn fail_next_writes(&self, layer_id: &str, count: u32, message: &str) {
        self.lock()
            .faults
            .failing_writes
            .insert(layer_id.to_string(), (count, message.to_string()));
    }

    /// Make `has_layer(layer_id)` fail.
    pub fn fail_existence_checks_for(&self, layer_id: &str, message: &str) {
        self.lock()
            .faults
            .failing_existence
            .insert(layer_id.to_string(), message.to_string());
    }

    /// Make `add_layer` fail for specs with this id.
    pub fn fail_adding(&self, layer_id: &str, message: &str) {
        self.lock()
            .faults
            .failing_adds
            .insert(layer_id.to_string(), message.to_string());
    }

    /// Make `disable_auxiliary_feature` fail.
    pub fn fail_auxiliary(&self, message: &str) {
        self.lock().faults.failing_auxiliary = Some(message.to_string());
    }

    // -- Inspection ---------------------------------------------------------

    /// Applied visibility of a layer, `None` if the layer is absent.
    #[must_use]
    pub fn visibility(&self, layer_id: &str) -> Option<Visibility> {
        let state = self.settled();
        state
            .properties
            .get(layer_id)
            .map(|props| Visibility::from_property(layer_id, props.get(VISIBILITY_PROPERTY)))
    }

    /// Layer ids in stacking order, bottom first.
    #[must_use]
    pub fn layer_ids(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// Specs passed to successful `add_layer` calls, in call order.
    #[must_use]
    pub fn added_layers(&self) -> Vec<LayerSpec> {
        self.lock().added.clone()
    }

    /// Every accepted `set_property` command, in call order.
    #[must_use]
    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    #[must_use]
    pub fn auxiliary_enabled(&self) -> bool {
        self.lock().auxiliary_enabled
    }

    #[must_use]
    pub fn stats(&self) -> RendererCallStats {
        self.lock().stats
    }
}

impl Renderer for SimulatedRenderer {
    fn has_layer(&self, layer_id: &str) -> RendererResult<bool> {
        let mut state = self.settled();
        state.stats.has_layer_calls += 1;
        if let Some(message) = state.faults.failing_existence.get(layer_id) {
            return Err(RendererError::new(message.clone()));
        }
        Ok(state.properties.contains_key(layer_id))
    }

    fn get_property(&self, layer_id: &str, name: &str) -> RendererResult<Option<PropertyValue>> {
        let mut state = self.settled();
        state.stats.get_property_calls += 1;
        if let Some(message) = state.faults.failing_reads.get(layer_id) {
            return Err(RendererError::new(message.clone()));
        }
        Ok(state
            .properties
            .get(layer_id)
            .and_then(|props| props.get(name))
            .cloned())
    }

    fn set_property(&self, layer_id: &str, name: &str, value: PropertyValue) -> RendererResult<()> {
        let now = Instant::now();
        let mut state = self.lock();
        state.settle(now);
        state.stats.set_property_calls += 1;

        if let Some((remaining, message)) = state.faults.failing_writes.get_mut(layer_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RendererError::new(message.clone()));
            }
        }
        if !state.properties.contains_key(layer_id) {
            return Err(RendererError::new(format!(
                "cannot set property on missing layer {layer_id}"
            )));
        }

        state.writes.push(WriteRecord {
            layer_id: layer_id.to_string(),
            name: name.to_string(),
            value: value.clone(),
        });
        if state.faults.ignore_writes.contains(layer_id) {
            return Ok(());
        }
        state.pending.push(PendingWrite {
            layer_id: layer_id.to_string(),
            name: name.to_string(),
            value,
            apply_at: now + self.apply_lag,
        });
        state.settle(now);
        Ok(())
    }

    fn has_source(&self, source_id: &str) -> RendererResult<bool> {
        let mut state = self.lock();
        state.stats.has_source_calls += 1;
        Ok(state.sources.contains(source_id))
    }

    fn add_layer(&self, spec: &LayerSpec) -> RendererResult<()> {
        let mut state = self.lock();
        state.stats.add_layer_calls += 1;
        if let Some(message) = state.faults.failing_adds.get(&spec.id) {
            return Err(RendererError::new(message.clone()));
        }
        if state.properties.contains_key(&spec.id) {
            return Err(RendererError::new(format!(
                "layer {} already exists",
                spec.id
            )));
        }
        let props = spec
            .layout
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        state.properties.insert(spec.id.clone(), props);
        state.order.push(spec.id.clone());
        state.added.push(spec.clone());
        Ok(())
    }

    fn disable_auxiliary_feature(&self) -> RendererResult<()> {
        let mut state = self.lock();
        state.stats.disable_auxiliary_calls += 1;
        if let Some(message) = &state.faults.failing_auxiliary {
            return Err(RendererError::new(message.clone()));
        }
        state.auxiliary_enabled = false;
        Ok(())
    }
}
