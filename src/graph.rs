//! Patch Graph
//!
//! The runtime node graph every session renders through. It owns the
//! modules, the cables between their ports, the automation timelines of
//! their param inputs and the start/stop schedule of source nodes. It
//! handles topological ordering and per-sample signal propagation.

use crate::param::AudioParam;
use crate::port::{GraphModule, PortId, PortSpec, PortValues};
use serde::{Deserialize, Serialize};
use slotmap::{DefaultKey, SlotMap};
use std::collections::{HashMap, VecDeque};

/// Key of a node in its patch; stale after the node is removed
pub type NodeId = DefaultKey;

/// One port of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: PortId,
}

/// A cable connecting an output port to an input (or param) port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cable {
    pub from: PortRef,
    pub to: PortRef,
}

/// Lifecycle of a source node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Not started yet
    Idle,
    /// Start (and possibly stop) scheduled; currently producing output or about to
    Scheduled,
    /// Reached its stop time; produces silence forever
    Finished,
}

/// Result of asking a source to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

#[derive(Debug, Clone, Copy, Default)]
struct Schedule {
    start: Option<u64>,
    stop: Option<u64>,
    finished: bool,
}

impl Schedule {
    fn is_active(&mut self, frame: u64) -> bool {
        if self.finished {
            return false;
        }
        let Some(start) = self.start else {
            return false;
        };
        if let Some(stop) = self.stop {
            if frame >= stop {
                self.finished = true;
                return false;
            }
        }
        frame >= start
    }
}

struct Node {
    module: Box<dyn GraphModule>,
    name: String,
    params: Vec<(PortId, AudioParam)>,
    schedule: Option<Schedule>,
}

/// Failures raised while wiring, scheduling or compiling a patch
#[derive(Debug, Clone, PartialEq)]
pub enum PatchError {
    InvalidNode,
    InvalidPort,
    NotASource,
    AlreadyStarted,
    CycleDetected { nodes: Vec<NodeId> },
    CompilationFailed(String),
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchError::InvalidNode => write!(f, "Invalid node"),
            PatchError::InvalidPort => write!(f, "Invalid port"),
            PatchError::NotASource => write!(f, "Node is not a schedulable source"),
            PatchError::AlreadyStarted => write!(f, "Source was already started"),
            PatchError::CycleDetected { nodes } => {
                write!(f, "Cycle detected involving {} nodes", nodes.len())
            }
            PatchError::CompilationFailed(msg) => write!(f, "Compilation failed: {}", msg),
        }
    }
}

impl std::error::Error for PatchError {}

/// A node id paired with its port layout, so ports can be named by label.
///
/// Naming a port the node does not have is a programming error and panics.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: NodeId,
    spec: PortSpec,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Reference an output port by name
    pub fn out(&self, name: &str) -> PortRef {
        let port = self
            .spec
            .output_by_name(name)
            .unwrap_or_else(|| panic!("Unknown output port: {}", name));
        PortRef {
            node: self.id,
            port: port.id,
        }
    }

    /// Reference an input or param port by name
    pub fn in_(&self, name: &str) -> PortRef {
        let port = self
            .spec
            .input_by_name(name)
            .unwrap_or_else(|| panic!("Unknown input port: {}", name));
        PortRef {
            node: self.id,
            port: port.id,
        }
    }

    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }
}

struct InputRoute {
    port: PortId,
    default: f64,
    param: Option<usize>,
    sources: Vec<usize>,
}

struct Route {
    node: NodeId,
    inputs: Vec<InputRoute>,
    outputs: Vec<(PortId, usize)>,
}

/// Node storage, cabling and the per-frame renderer of one audio context
pub struct Patch {
    nodes: SlotMap<NodeId, Node>,
    cables: Vec<Cable>,

    // Execution state, rebuilt lazily after any topology change
    execution_order: Vec<NodeId>,
    routes: Vec<Route>,
    buffers: Vec<f64>,
    compiled: bool,

    sample_rate: f64,
    frame: u64,

    output_node: Option<NodeId>,
}

impl Patch {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            nodes: SlotMap::new(),
            cables: Vec::new(),
            execution_order: Vec::new(),
            routes: Vec::new(),
            buffers: Vec::new(),
            compiled: false,
            sample_rate,
            frame: 0,
            output_node: None,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Frames rendered so far (the device clock)
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Device clock in seconds
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate
    }

    /// Convert a time in seconds to a device frame, never earlier than now
    pub fn frame_at(&self, time: f64) -> u64 {
        let frame = (time * self.sample_rate).round();
        if frame <= self.frame as f64 {
            self.frame
        } else {
            frame as u64
        }
    }

    /// Insert a node under a diagnostic label
    pub fn add<M: GraphModule + 'static>(&mut self, name: impl Into<String>, module: M) -> NodeHandle {
        self.add_boxed(name, Box::new(module))
    }

    pub fn add_boxed(&mut self, name: impl Into<String>, mut module: Box<dyn GraphModule>) -> NodeHandle {
        module.set_sample_rate(self.sample_rate);
        let spec = module.port_spec().clone();
        let params = spec
            .inputs
            .iter()
            .filter(|p| p.is_param())
            .map(|p| (p.id, AudioParam::new(p.default, p.range)))
            .collect();
        let schedule = module.is_source().then(Schedule::default);
        let id = self.nodes.insert(Node {
            module,
            name: name.into(),
            params,
            schedule,
        });
        self.invalidate();
        NodeHandle { id, spec }
    }

    /// Remove a module and every cable touching it
    pub fn remove(&mut self, node: NodeId) -> Result<(), PatchError> {
        if self.nodes.remove(node).is_none() {
            return Err(PatchError::InvalidNode);
        }

        self.cables
            .retain(|cable| cable.from.node != node && cable.to.node != node);

        if self.output_node == Some(node) {
            self.output_node = None;
        }

        self.invalidate();
        Ok(())
    }

    /// Connect an output port to an input or param port
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> Result<(), PatchError> {
        self.validate_output_port(from)?;
        self.validate_input_port(to)?;

        let cable = Cable { from, to };
        if !self.cables.contains(&cable) {
            self.cables.push(cable);
            self.invalidate();
        }
        Ok(())
    }

    /// Connect one output to multiple inputs
    pub fn mult(&mut self, from: PortRef, to: &[PortRef]) -> Result<(), PatchError> {
        to.iter().try_for_each(|&dest| self.connect(from, dest))
    }

    /// Remove every cable leaving `node`
    pub fn disconnect_outputs(&mut self, node: NodeId) {
        let before = self.cables.len();
        self.cables.retain(|c| c.from.node != node);
        if self.cables.len() != before {
            self.invalidate();
        }
    }

    /// Node whose outputs become the rendered left/right pair
    pub fn set_output(&mut self, node: NodeId) {
        self.output_node = Some(node);
    }

    pub fn output(&self) -> Option<NodeId> {
        self.output_node
    }

    /// Automation timeline of a param input
    pub fn param(&self, port: PortRef) -> Option<&AudioParam> {
        self.nodes.get(port.node).and_then(|n| {
            n.params
                .iter()
                .find(|(id, _)| *id == port.port)
                .map(|(_, p)| p)
        })
    }

    pub fn param_mut(&mut self, port: PortRef) -> Option<&mut AudioParam> {
        self.nodes.get_mut(port.node).and_then(|n| {
            n.params
                .iter_mut()
                .find(|(id, _)| *id == port.port)
                .map(|(_, p)| p)
        })
    }

    /// Click-free update of a param from the current device time
    pub fn ramp_param(&mut self, port: PortRef, target: f64, window: f64) -> Result<(), PatchError> {
        let now = self.current_time();
        let param = self.param_mut(port).ok_or(PatchError::InvalidPort)?;
        param.ramp_to(now, target, window);
        Ok(())
    }

    /// Schedule a source to start at `time` seconds (clamped to now)
    pub fn start(&mut self, node: NodeId, time: f64) -> Result<(), PatchError> {
        let frame = self.frame_at(time);
        let n = self.nodes.get_mut(node).ok_or(PatchError::InvalidNode)?;
        let schedule = n.schedule.as_mut().ok_or(PatchError::NotASource)?;
        if schedule.start.is_some() {
            return Err(PatchError::AlreadyStarted);
        }
        schedule.start = Some(frame);
        Ok(())
    }

    /// Schedule a source to stop at `time` seconds (clamped to now).
    ///
    /// Stopping a source that already finished, or never started, is a no-op.
    pub fn stop(&mut self, node: NodeId, time: f64) -> Result<StopOutcome, PatchError> {
        let frame = self.frame_at(time);
        let n = self.nodes.get_mut(node).ok_or(PatchError::InvalidNode)?;
        let schedule = n.schedule.as_mut().ok_or(PatchError::NotASource)?;

        match (schedule.finished, schedule.start) {
            (true, _) => Ok(StopOutcome::AlreadyStopped),
            (false, None) => {
                schedule.finished = true;
                Ok(StopOutcome::AlreadyStopped)
            }
            (false, Some(start)) => {
                let frame = frame.max(start);
                schedule.stop = Some(schedule.stop.map_or(frame, |s| s.min(frame)));
                Ok(StopOutcome::Stopped)
            }
        }
    }

    pub fn playback_state(&self, node: NodeId) -> Option<PlaybackState> {
        let schedule = self.nodes.get(node)?.schedule?;
        Some(if schedule.finished || schedule.stop.is_some_and(|s| self.frame >= s) {
            PlaybackState::Finished
        } else if schedule.start.is_some() {
            PlaybackState::Scheduled
        } else {
            PlaybackState::Idle
        })
    }

    pub fn get_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).map(|n| n.name.as_str())
    }

    /// Live nodes, the figure teardown tests assert on
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn cable_count(&self) -> usize {
        self.cables.len()
    }

    pub fn cables(&self) -> &[Cable] {
        &self.cables
    }

    fn invalidate(&mut self) {
        self.compiled = false;
        self.execution_order.clear();
    }

    fn validate_output_port(&self, port_ref: PortRef) -> Result<(), PatchError> {
        let node = self.nodes.get(port_ref.node).ok_or(PatchError::InvalidNode)?;
        node.module
            .port_spec()
            .output_by_id(port_ref.port)
            .ok_or(PatchError::InvalidPort)?;
        Ok(())
    }

    fn validate_input_port(&self, port_ref: PortRef) -> Result<(), PatchError> {
        let node = self.nodes.get(port_ref.node).ok_or(PatchError::InvalidNode)?;
        node.module
            .port_spec()
            .input_by_id(port_ref.port)
            .ok_or(PatchError::InvalidPort)?;
        Ok(())
    }

    /// Compile the patch into an executable order with flat signal buffers
    pub fn compile(&mut self) -> Result<(), PatchError> {
        let order = self.topological_sort()?;

        let mut slots: HashMap<PortRef, usize> = HashMap::new();
        for &id in &order {
            if let Some(node) = self.nodes.get(id) {
                for output in &node.module.port_spec().outputs {
                    let next = slots.len();
                    slots.insert(PortRef { node: id, port: output.id }, next);
                }
            }
        }

        let mut routes = Vec::with_capacity(order.len());
        for &id in &order {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let spec = node.module.port_spec();
            let inputs = spec
                .inputs
                .iter()
                .map(|input| {
                    let to = PortRef { node: id, port: input.id };
                    InputRoute {
                        port: input.id,
                        default: input.default,
                        param: node.params.iter().position(|(pid, _)| *pid == input.id),
                        sources: self
                            .cables
                            .iter()
                            .filter(|c| c.to == to)
                            .filter_map(|c| slots.get(&c.from).copied())
                            .collect(),
                    }
                })
                .collect();
            let outputs = spec
                .outputs
                .iter()
                .filter_map(|o| {
                    slots
                        .get(&PortRef { node: id, port: o.id })
                        .map(|&slot| (o.id, slot))
                })
                .collect();
            routes.push(Route { node: id, inputs, outputs });
        }

        self.buffers = vec![0.0; slots.len()];
        self.routes = routes;
        self.execution_order = order;
        self.compiled = true;
        Ok(())
    }

    fn topological_sort(&self) -> Result<Vec<NodeId>, PatchError> {
        let mut in_degree: HashMap<NodeId, usize> = self.nodes.keys().map(|k| (k, 0)).collect();
        let mut successors: HashMap<NodeId, Vec<NodeId>> =
            self.nodes.keys().map(|k| (k, vec![])).collect();

        for cable in &self.cables {
            *in_degree.entry(cable.to.node).or_insert(0) += 1;
            successors
                .entry(cable.from.node)
                .or_default()
                .push(cable.to.node);
        }

        // Kahn: sources first, then whatever they unblock
        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            result.push(node);
            if let Some(succs) = successors.get(&node) {
                for &succ in succs {
                    if let Some(deg) = in_degree.get_mut(&succ) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(succ);
                        }
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let in_cycle: Vec<NodeId> = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(id, _)| id)
                .collect();
            return Err(PatchError::CycleDetected { nodes: in_cycle });
        }

        Ok(result)
    }

    /// Process a single frame, returning stereo output
    pub fn tick(&mut self) -> (f64, f64) {
        if !self.compiled {
            if let Err(e) = self.compile() {
                log::error!("op=patch_compile error={e}");
                self.frame += 1;
                return (0.0, 0.0);
            }
        }

        let time = self.current_time();
        let frame = self.frame;
        let mut inputs = PortValues::new();
        let mut outputs = PortValues::new();

        for route in &self.routes {
            let Some(node) = self.nodes.get_mut(route.node) else {
                continue;
            };

            let active = node.schedule.as_mut().map_or(true, |s| s.is_active(frame));
            if !active {
                for &(_, slot) in &route.outputs {
                    self.buffers[slot] = 0.0;
                }
                continue;
            }

            inputs.clear();
            for input in &route.inputs {
                let sum: f64 = input.sources.iter().map(|&s| self.buffers[s]).sum();
                let value = match input.param {
                    Some(i) => node.params[i].1.value_at(time) + sum,
                    None if input.sources.is_empty() => input.default,
                    None => sum,
                };
                inputs.set(input.port, value);
            }

            outputs.clear();
            node.module.tick(&inputs, &mut outputs);

            for &(port, slot) in &route.outputs {
                self.buffers[slot] = outputs.get_or(port, 0.0);
            }
        }

        self.frame += 1;
        self.read_output()
    }

    /// Fold elapsed automation into each param's anchor
    pub fn settle_params(&mut self) {
        let now = self.current_time();
        for (_, node) in &mut self.nodes {
            for (_, param) in &mut node.params {
                param.settle(now);
            }
        }
    }

    fn read_output(&self) -> (f64, f64) {
        let Some(output) = self.output_node else {
            return (0.0, 0.0);
        };
        let Some(route) = self.routes.iter().find(|r| r.node == output) else {
            return (0.0, 0.0);
        };
        let mut outs = route.outputs.iter().map(|&(_, slot)| self.buffers[slot]);
        let left = outs.next().unwrap_or(0.0);
        let right = outs.next().unwrap_or(left);
        (left, right)
    }

    /// `(id, label, node)` for every live node
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &str, &dyn GraphModule)> {
        self.nodes
            .iter()
            .map(|(id, node)| (id, node.name.as_str(), node.module.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{ConstantSource, Destination, Gain, Oscillator};
    use approx::assert_relative_eq;

    fn patch_with_output() -> (Patch, NodeHandle) {
        let mut patch = Patch::new(1000.0);
        let out = patch.add("out", Destination::new());
        patch.set_output(out.id());
        (patch, out)
    }

    fn gain_chain(patch: &mut Patch, len: usize) -> Vec<NodeHandle> {
        let stages: Vec<NodeHandle> = (0..len)
            .map(|i| patch.add(format!("stage{i}"), Gain::new(1.0)))
            .collect();
        for pair in stages.windows(2) {
            patch.connect(pair[0].out("out"), pair[1].in_("in")).unwrap();
        }
        stages
    }

    #[test]
    fn test_added_node_keeps_its_label() {
        let mut patch = Patch::new(48000.0);
        let amp = patch.add("master", Gain::new(0.3));
        assert_eq!(patch.get_name(amp.id()), Some("master"));
        assert!(patch.param(amp.in_(Gain::GAIN)).is_some());
    }

    #[test]
    fn test_duplicate_cables_collapse() {
        let mut patch = Patch::new(48000.0);
        let stages = gain_chain(&mut patch, 2);
        patch
            .connect(stages[0].out("out"), stages[1].in_("in"))
            .unwrap();
        assert_eq!(patch.cable_count(), 1);
    }

    #[test]
    fn test_input_cannot_feed_input() {
        let mut patch = Patch::new(48000.0);
        let stages = gain_chain(&mut patch, 2);
        assert_eq!(
            patch.connect(stages[0].in_("in"), stages[1].in_("in")),
            Err(PatchError::InvalidPort)
        );
    }

    #[test]
    fn test_chain_renders_upstream_first() {
        let mut patch = Patch::new(48000.0);
        let stages = gain_chain(&mut patch, 4);
        patch.compile().unwrap();

        let order = &patch.execution_order;
        let rank: Vec<usize> = stages
            .iter()
            .map(|h| order.iter().position(|&id| id == h.id()).unwrap())
            .collect();
        assert!(rank.windows(2).all(|w| w[0] < w[1]), "order was {rank:?}");
    }

    #[test]
    fn test_feedback_loop_refuses_to_compile() {
        let mut patch = Patch::new(48000.0);
        let stages = gain_chain(&mut patch, 3);
        patch
            .connect(stages[2].out("out"), stages[0].in_("in"))
            .unwrap();
        match patch.compile() {
            Err(PatchError::CycleDetected { nodes }) => assert_eq!(nodes.len(), 3),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_teardown_drops_touching_cables() {
        let mut patch = Patch::new(48000.0);
        let stages = gain_chain(&mut patch, 3);
        patch.remove(stages[1].id()).unwrap();
        assert_eq!(patch.node_count(), 2);
        assert_eq!(patch.cable_count(), 0);
        assert_eq!(patch.remove(stages[1].id()), Err(PatchError::InvalidNode));
    }

    #[test]
    fn test_source_silent_until_started() {
        let (mut patch, out) = patch_with_output();
        let dc = patch.add("dc", ConstantSource::new(0.5));
        patch.connect(dc.out("out"), out.in_("left")).unwrap();

        assert_eq!(patch.tick(), (0.0, 0.0));
        patch.start(dc.id(), 0.0).unwrap();
        let (left, _) = patch.tick();
        assert_relative_eq!(left, 0.5);
    }

    #[test]
    fn test_stop_schedules_silence() {
        let (mut patch, out) = patch_with_output();
        let dc = patch.add("dc", ConstantSource::new(1.0));
        patch.connect(dc.out("out"), out.in_("left")).unwrap();
        patch.start(dc.id(), 0.0).unwrap();
        assert_eq!(patch.stop(dc.id(), 0.005), Ok(StopOutcome::Stopped));

        let rendered: Vec<f64> = (0..10).map(|_| patch.tick().0).collect();
        assert_eq!(&rendered[..5], &[1.0; 5]);
        assert_eq!(&rendered[5..], &[0.0; 5]);
        assert_eq!(patch.playback_state(dc.id()), Some(PlaybackState::Finished));
    }

    #[test]
    fn test_stop_twice_is_noop() {
        let mut patch = Patch::new(1000.0);
        let osc = patch.add("osc", Oscillator::sine(10.0));
        // Never started
        assert_eq!(patch.stop(osc.id(), 0.0), Ok(StopOutcome::AlreadyStopped));

        let osc = patch.add("osc2", Oscillator::sine(10.0));
        patch.start(osc.id(), 0.0).unwrap();
        patch.stop(osc.id(), 0.0).unwrap();
        patch.tick();
        assert_eq!(patch.stop(osc.id(), 0.0), Ok(StopOutcome::AlreadyStopped));
    }

    #[test]
    fn test_stop_non_source_fails() {
        let mut patch = Patch::new(1000.0);
        let gain = patch.add("gain", Gain::new(1.0));
        assert_eq!(patch.stop(gain.id(), 0.0), Err(PatchError::NotASource));
    }

    #[test]
    fn test_cable_into_param_adds_to_intrinsic_value() {
        let (mut patch, out) = patch_with_output();
        let dc = patch.add("dc", ConstantSource::new(1.0));
        let offset = patch.add("offset", ConstantSource::new(0.25));
        let gain = patch.add("gain", Gain::new(0.5));

        patch.connect(dc.out("out"), gain.in_("in")).unwrap();
        patch.connect(offset.out("out"), gain.in_(Gain::GAIN)).unwrap();
        patch.connect(gain.out("out"), out.in_("left")).unwrap();
        patch.start(dc.id(), 0.0).unwrap();
        patch.start(offset.id(), 0.0).unwrap();

        let (left, right) = patch.tick();
        assert_relative_eq!(left, 0.75);
        assert_relative_eq!(right, 0.0);
    }

    #[test]
    fn test_ramp_param_follows_clock() {
        let (mut patch, out) = patch_with_output();
        let dc = patch.add("dc", ConstantSource::new(0.0));
        patch.connect(dc.out("out"), out.in_("left")).unwrap();
        patch.start(dc.id(), 0.0).unwrap();

        patch.ramp_param(dc.in_(ConstantSource::OFFSET), 1.0, 0.010).unwrap();
        let rendered: Vec<f64> = (0..12).map(|_| patch.tick().0).collect();
        assert_relative_eq!(rendered[0], 0.0);
        assert_relative_eq!(rendered[5], 0.5, epsilon = 1e-9);
        assert_relative_eq!(rendered[11], 1.0);
    }
}
