//! Audio contexts: a patch wired to an output sink plus a clock.
//!
//! [`AudioContext`] fronts a real-time output device. [`OfflineContext`]
//! renders the same kind of patch as fast as possible into memory; tool
//! graph builders only see a `&mut Patch` and the destination handle, so the
//! same topology code serves both.

use crate::config::EngineConfig;
use crate::device::{DeviceState, OutputDevice, PulledDevice};
use crate::error::EngineError;
use crate::graph::{NodeHandle, Patch};
use crate::nodes::Destination;

/// One stereo frame
pub type Frame = [f32; 2];

fn patch_with_destination(sample_rate: f64) -> (Patch, NodeHandle) {
    let mut patch = Patch::new(sample_rate);
    let destination = patch.add("destination", Destination::new());
    patch.set_output(destination.id());
    (patch, destination)
}

/// Live context bound to one output device.
pub struct AudioContext {
    patch: Patch,
    destination: NodeHandle,
    device: Box<dyn OutputDevice>,
    config: EngineConfig,
}

impl AudioContext {
    pub fn new(config: EngineConfig, mut device: Box<dyn OutputDevice>) -> Result<Self, EngineError> {
        config.validate()?;
        if let Err(e) = device.open(config.sample_rate) {
            log::error!("op=context_open sample_rate={} error={e}", config.sample_rate);
            return Err(e);
        }
        let (patch, destination) = patch_with_destination(config.sample_rate);
        log::debug!("op=context_open sample_rate={}", config.sample_rate);
        Ok(Self {
            patch,
            destination,
            device,
            config,
        })
    }

    /// Context on a host-pulled device
    pub fn pulled(config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(config, Box::new(PulledDevice::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    pub fn patch_mut(&mut self) -> &mut Patch {
        &mut self.patch
    }

    /// Split borrow: the patch and the sink every chain ends in
    pub fn graph(&mut self) -> (&mut Patch, &NodeHandle) {
        (&mut self.patch, &self.destination)
    }

    pub fn destination(&self) -> &NodeHandle {
        &self.destination
    }

    pub fn state(&self) -> DeviceState {
        self.device.state()
    }

    pub fn is_running(&self) -> bool {
        self.device.state() == DeviceState::Running
    }

    /// Resume the device if it is suspended
    pub fn resume(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        self.device.resume().inspect_err(|e| {
            log::error!("op=context_resume state={:?} error={e}", self.device.state());
        })
    }

    pub fn suspend(&mut self) {
        self.device.suspend();
    }

    pub fn current_frame(&self) -> u64 {
        self.patch.frame()
    }

    pub fn current_time(&self) -> f64 {
        self.patch.current_time()
    }

    /// Device frames in `ms` milliseconds
    pub fn frames_for_ms(&self, ms: f64) -> u64 {
        (ms.max(0.0) / 1000.0 * self.config.sample_rate).round() as u64
    }

    /// Nodes other than the sink
    pub fn live_node_count(&self) -> usize {
        self.patch.node_count().saturating_sub(1)
    }

    /// Render `frames` frames into `out`.
    ///
    /// A suspended device produces silence and its clock stands still.
    pub fn render(&mut self, frames: usize, out: &mut Vec<Frame>) {
        if !self.is_running() {
            out.extend(std::iter::repeat([0.0, 0.0]).take(frames));
            return;
        }
        out.reserve(frames);
        for _ in 0..frames {
            let (left, right) = self.patch.tick();
            out.push([left as f32, right as f32]);
        }
        self.patch.settle_params();
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.device.close();
    }
}

/// Non-real-time context for fixed-duration renders.
pub struct OfflineContext {
    patch: Patch,
    destination: NodeHandle,
}

impl OfflineContext {
    pub fn new(sample_rate: f64) -> Self {
        let (patch, destination) = patch_with_destination(sample_rate);
        Self { patch, destination }
    }

    pub fn sample_rate(&self) -> f64 {
        self.patch.sample_rate()
    }

    pub fn graph(&mut self) -> (&mut Patch, &NodeHandle) {
        (&mut self.patch, &self.destination)
    }

    /// Render `frames` frames from the start of the timeline
    pub fn render(mut self, frames: usize) -> Vec<Frame> {
        let mut out = Vec::with_capacity(frames);
        for i in 0..frames {
            let (left, right) = self.patch.tick();
            out.push([left as f32, right as f32]);
            if i % 4096 == 4095 {
                self.patch.settle_params();
            }
        }
        out
    }
}
