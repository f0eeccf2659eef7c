//! Chain assembly and ownership.
//!
//! Every tool renders through exactly one chain at a time:
//! source, optional filters and modulators, gain, panner, sink. A [`Chain`]
//! records every node it adds so it can be torn down without leaving
//! orphans, and a [`ChainSlot`] holds the single active chain of a session.
//!
//! Structural changes (waveform, noise color, modulation type) go through a
//! [`Rebuild`]: tear the chain down, wait a short settle period on the device
//! clock, then build again. Only the newest rebuild request may build.

use crate::error::EngineError;
use crate::graph::{NodeHandle, NodeId, Patch, PatchError, PortRef, StopOutcome};
use crate::nodes::{Biquad, Oscillator, OscillatorType, StereoPanner};
use crate::port::GraphModule;
use crate::timer::{LoopGuard, LoopToken};
use serde::{Deserialize, Serialize};

/// Cutoff of the lowpass inserted by the filtered waveform
pub const FILTERED_CUTOFF_HZ: f64 = 1000.0;
pub const FILTERED_Q: f64 = 1.0;

/// Carrier waveform of a tone chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
    /// Sawtooth through a fixed lowpass
    Filtered,
}

impl Waveform {
    pub fn oscillator_type(&self) -> OscillatorType {
        match self {
            Waveform::Sine => OscillatorType::Sine,
            Waveform::Square => OscillatorType::Square,
            Waveform::Sawtooth | Waveform::Filtered => OscillatorType::Sawtooth,
            Waveform::Triangle => OscillatorType::Triangle,
        }
    }
}

/// Which ear a tone is presented to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ear {
    #[default]
    Both,
    Left,
    Right,
}

impl Ear {
    pub fn pan(&self) -> f64 {
        match self {
            Ear::Both => 0.0,
            Ear::Left => -1.0,
            Ear::Right => 1.0,
        }
    }
}

/// Stereo spread of the notched-noise tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StereoWidth {
    Mono,
    Narrow,
    #[default]
    Normal,
    Wide,
}

impl StereoWidth {
    pub fn pan(&self) -> f64 {
        match self {
            StereoWidth::Mono => 0.0,
            StereoWidth::Narrow => 0.3,
            StereoWidth::Normal => 0.5,
            StereoWidth::Wide => 0.7,
        }
    }
}

/// The set of nodes one build added to a patch.
#[derive(Debug, Default)]
pub struct Chain {
    nodes: Vec<NodeId>,
    sources: Vec<NodeId>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the patch and take ownership of the node
    pub fn add<M: GraphModule + 'static>(
        &mut self,
        patch: &mut Patch,
        name: impl Into<String>,
        module: M,
    ) -> NodeHandle {
        let is_source = module.is_source();
        let handle = patch.add(name, module);
        self.adopt(handle.id(), is_source);
        handle
    }

    /// Take ownership of a node something else added
    pub fn adopt(&mut self, node: NodeId, is_source: bool) {
        self.nodes.push(node);
        if is_source {
            self.sources.push(node);
        }
    }

    /// Forget a node without touching the patch
    pub fn release(&mut self, node: NodeId) {
        self.nodes.retain(|&n| n != node);
        self.sources.retain(|&n| n != node);
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    /// Start every source that has not been started yet
    pub fn start_sources(&self, patch: &mut Patch, time: f64) -> Result<(), EngineError> {
        for &source in &self.sources {
            match patch.start(source, time) {
                Ok(()) | Err(PatchError::AlreadyStarted) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn start_now(&self, patch: &mut Patch) -> Result<(), EngineError> {
        let now = patch.current_time();
        self.start_sources(patch, now)
    }

    /// Stop every source, then disconnect and drop every node.
    pub fn teardown(self, patch: &mut Patch) {
        let now = patch.current_time();
        for &source in &self.sources {
            match patch.stop(source, now) {
                Ok(StopOutcome::Stopped) => {}
                Ok(StopOutcome::AlreadyStopped) | Err(PatchError::InvalidNode) => {
                    log::debug!("op=chain_teardown node={source:?} already_stopped=true");
                }
                Err(e) => log::warn!("op=chain_teardown node={source:?} error={e}"),
            }
        }
        for &node in &self.nodes {
            // Nodes can already be gone after a source swap
            let _ = patch.remove(node);
        }
        log::debug!("op=chain_teardown nodes={}", self.nodes.len());
    }
}

/// Holds the one active chain of a session.
#[derive(Debug, Default)]
pub struct ChainSlot {
    active: Option<Chain>,
}

impl ChainSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn chain(&self) -> Option<&Chain> {
        self.active.as_ref()
    }

    pub fn chain_mut(&mut self) -> Option<&mut Chain> {
        self.active.as_mut()
    }

    /// Install `chain`, tearing down whatever was active first
    pub fn install(&mut self, patch: &mut Patch, chain: Chain) {
        self.clear(patch);
        self.active = Some(chain);
    }

    /// Tear down the active chain; a no-op when nothing is active
    pub fn clear(&mut self, patch: &mut Patch) {
        if let Some(old) = self.active.take() {
            old.teardown(patch);
        }
    }
}

/// Add the carrier for `waveform`, returning the oscillator and the port
/// that feeds the rest of the chain.
pub fn tone_source(
    patch: &mut Patch,
    chain: &mut Chain,
    waveform: Waveform,
    frequency: f64,
) -> Result<(NodeHandle, PortRef), EngineError> {
    let osc = chain.add(patch, "carrier", Oscillator::new(waveform.oscillator_type(), frequency));
    if waveform != Waveform::Filtered {
        let out = osc.out("out");
        return Ok((osc, out));
    }
    let lowpass = chain.add(patch, "carrier_lowpass", Biquad::lowpass(FILTERED_CUTOFF_HZ, FILTERED_Q));
    patch.connect(osc.out("out"), lowpass.in_("in"))?;
    Ok((osc, lowpass.out("out")))
}

/// Route `input` through a new panner into both channels of `destination`
pub fn attach_panner(
    patch: &mut Patch,
    chain: &mut Chain,
    input: PortRef,
    pan: f64,
    destination: &NodeHandle,
) -> Result<NodeHandle, EngineError> {
    let panner = chain.add(patch, "panner", StereoPanner::new(pan));
    patch.connect(input, panner.in_("in"))?;
    patch.connect(panner.out("left"), destination.in_("left"))?;
    patch.connect(panner.out("right"), destination.in_("right"))?;
    Ok(panner)
}

/// Swap the source feeding `targets` without a silent gap.
///
/// The new source is connected and started before the old one is stopped
/// and dropped, so for one block both may sound.
pub fn replace_source<M: GraphModule + 'static>(
    patch: &mut Patch,
    chain: &mut Chain,
    old: NodeId,
    name: &str,
    module: M,
    targets: &[PortRef],
) -> Result<NodeHandle, EngineError> {
    let now = patch.current_time();
    let new = chain.add(patch, name, module);
    patch.mult(new.out("out"), targets)?;
    patch.start(new.id(), now)?;

    match patch.stop(old, now) {
        Ok(_) | Err(PatchError::InvalidNode) => {}
        Err(e) => log::warn!("op=replace_source error={e}"),
    }
    patch.disconnect_outputs(old);
    let _ = patch.remove(old);
    chain.release(old);
    log::debug!("op=replace_source name={name}");
    Ok(new)
}

/// Phase of a structural rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Idle,
    Settling,
}

/// TearDown → settle → Build.
///
/// The caller tears the chain down, schedules a timer carrying the token
/// from [`Rebuild::request`] at [`Rebuild::due`], and builds only if
/// [`Rebuild::complete`] accepts that token.
#[derive(Debug, Default)]
pub struct Rebuild {
    guard: LoopGuard,
}

impl Rebuild {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a settle period; any earlier request is superseded
    pub fn request(&mut self) -> LoopToken {
        self.guard.begin()
    }

    /// Frame at which the settle period ends
    pub fn due(now: u64, settle_frames: u64) -> u64 {
        now.saturating_add(settle_frames.max(1))
    }

    /// Accept the settle timer if it belongs to the newest request
    pub fn complete(&mut self, token: LoopToken) -> bool {
        if !self.guard.is_current(token) {
            return false;
        }
        self.guard.cancel();
        true
    }

    pub fn cancel(&mut self) {
        self.guard.cancel();
    }

    pub fn phase(&self) -> RebuildPhase {
        if self.guard.is_running() {
            RebuildPhase::Settling
        } else {
            RebuildPhase::Idle
        }
    }
}
