//! Signal Conventions and Port System
//!
//! This module defines the port definitions and the type-erased module
//! interface shared by every processing node in a [`Patch`](crate::graph::Patch).
//!
//! Two kinds of input exist. Audio inputs carry the sum of every cable
//! connected to them. Param inputs additionally carry an intrinsic,
//! automatable value (an [`AudioParam`](crate::param::AudioParam) owned by the
//! patch), so a cable patched into a param *adds* to its scheduled value. This
//! is how LFO stages drive gain and frequency.

use serde::{Deserialize, Serialize};

/// Port number; inputs count from 0, outputs from 10
pub type PortId = u32;

/// Semantic signal classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Audio-rate signal, nominally within [-1, 1]
    Audio,

    /// Automatable parameter input; value = intrinsic automation + connected cables
    Param,
}

/// One named port and, for params, its intrinsic default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    /// Unique identifier within the module
    pub id: PortId,

    /// Human-readable name (e.g., "frequency", "gain", "out")
    pub name: String,

    /// Signal type
    pub kind: SignalKind,

    /// Default value when no cable connected, or the initial param value
    pub default: f64,

    /// Nominal range for param inputs; automation targets are clamped to it
    pub range: Option<(f64, f64)>,
}

impl PortDef {
    pub fn new(id: PortId, name: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            default: 0.0,
            range: None,
        }
    }

    /// Shorthand for an automatable parameter input
    pub fn param(id: PortId, name: impl Into<String>, default: f64) -> Self {
        Self::new(id, name, SignalKind::Param).with_default(default)
    }

    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn is_param(&self) -> bool {
        self.kind == SignalKind::Param
    }
}

/// Input and output layout of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

impl PortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_by_name(&self, name: &str) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_by_name(&self, name: &str) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn input_by_id(&self, id: PortId) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn output_by_id(&self, id: PortId) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.id == id)
    }
}

/// Runtime port values container.
///
/// Modules have at most a handful of ports, so a flat list beats a map here.
#[derive(Debug, Clone, Default)]
pub struct PortValues {
    values: Vec<(PortId, f64)>,
}

impl PortValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PortId) -> Option<f64> {
        self.values
            .iter()
            .find(|(port, _)| *port == id)
            .map(|(_, v)| *v)
    }

    pub fn get_or(&self, id: PortId, default: f64) -> f64 {
        self.get(id).unwrap_or(default)
    }

    pub fn set(&mut self, id: PortId, value: f64) {
        match self.values.iter_mut().find(|(port, _)| *port == id) {
            Some(slot) => slot.1 = value,
            None => self.values.push((id, value)),
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Type-erased processing module.
///
/// Modules are pure per-sample processors; everything time-related (param
/// automation, source start/stop) is resolved by the patch before `tick`.
pub trait GraphModule: Send {
    /// Port layout of this module
    fn port_spec(&self) -> &PortSpec;

    /// Process one sample
    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues);

    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Short type identifier used in logs
    fn type_id(&self) -> &'static str {
        "unknown"
    }

    /// Source modules only produce output between their start and stop times
    fn is_source(&self) -> bool {
        false
    }
}
