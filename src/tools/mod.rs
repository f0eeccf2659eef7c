//! The playback tools.
//!
//! Each tool owns one [`AudioContext`](crate::context::AudioContext), one
//! timer queue and one chain slot. Hosts pull audio with `process(frames)`.

pub mod audiometry;
pub mod noise_player;
pub mod notched;
pub mod tone;

use crate::assembler::{attach_panner, Chain, StereoWidth};
use crate::error::EngineError;
use crate::filter_bank::{BankLayout, FilterBank};
use crate::graph::{NodeHandle, Patch};
use crate::noise::NoiseColor;
use crate::nodes::{BufferSource, Gain};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use audiometry::{AudiometricPlayer, AudiometricState, ToneRequest, ToneType};
pub use noise_player::NoisePlayer;
pub use notched::NotchedNoisePlayer;
pub use tone::{ToneGenerator, ToneSettings};

/// Volume slider (0–100) to linear gain under `headroom`
pub fn volume_gain(volume: f64, headroom: f64) -> f64 {
    volume.clamp(0.0, 100.0) / 100.0 * headroom
}

pub(crate) fn check_volume(volume: f64) -> Result<(), EngineError> {
    if (0.0..=100.0).contains(&volume) {
        Ok(())
    } else {
        Err(EngineError::invalid("volume", volume))
    }
}

pub(crate) fn check_frequency(frequency: f64) -> Result<(), EngineError> {
    if (50.0..=20_000.0).contains(&frequency) {
        Ok(())
    } else {
        Err(EngineError::invalid("frequency", frequency))
    }
}

/// Settings of a noise playback session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseSpec {
    pub color: NoiseColor,
    /// Slider values, one per band (0–100, neutral 50)
    pub band_gains: Vec<u8>,
    pub volume: f64,
    #[serde(default)]
    pub stereo_width: Option<StereoWidth>,
}

impl NoiseSpec {
    /// Flat bands for `layout`
    pub fn flat(color: NoiseColor, layout: BankLayout, volume: f64) -> Self {
        Self {
            color,
            band_gains: vec![50; layout.band_count()],
            volume,
            stereo_width: None,
        }
    }

    pub fn validate(&self, layout: BankLayout) -> Result<(), EngineError> {
        check_volume(self.volume)?;
        if self.band_gains.len() != layout.band_count() {
            return Err(EngineError::invalid("band_gains", self.band_gains.len()));
        }
        if let Some(&bad) = self.band_gains.iter().find(|&&g| g > 100) {
            return Err(EngineError::invalid("band_gain", bad));
        }
        Ok(())
    }
}

/// Fixed shaping of a noise chain
#[derive(Debug, Clone, Copy)]
pub(crate) struct NoiseShape {
    pub layout: BankLayout,
    /// dB per slider step of the peaking filters
    pub gain_scale: f64,
    /// Linear gain at volume 100
    pub headroom: f64,
}

/// Handles into a built noise chain
#[derive(Debug, Clone)]
pub(crate) struct NoiseVoice {
    pub source: NodeHandle,
    pub bank: FilterBank,
    pub gain: NodeHandle,
    pub panner: Option<NodeHandle>,
}

/// Build looping noise → filter bank → gain → (panner) → sink.
///
/// Shared by live playback and offline export so both render the same
/// topology.
pub(crate) fn build_noise_chain(
    patch: &mut Patch,
    destination: &NodeHandle,
    chain: &mut Chain,
    buffer: Arc<[f32]>,
    shape: NoiseShape,
    spec: &NoiseSpec,
) -> Result<NoiseVoice, EngineError> {
    let source = chain.add(patch, "noise", BufferSource::looping(buffer));
    let bank = FilterBank::build(patch, shape.layout, &spec.band_gains, shape.gain_scale)?;
    for id in bank.node_ids() {
        chain.adopt(id, false);
    }
    let gain = chain.add(patch, "gain", Gain::new(volume_gain(spec.volume, shape.headroom)));

    let (bank_in, bank_out) = match (bank.input(), bank.output()) {
        (Some(input), Some(output)) => (input, output),
        _ => return Err(EngineError::invalid("band_gains", "empty filter bank")),
    };
    patch.connect(source.out("out"), bank_in)?;
    patch.connect(bank_out, gain.in_("in"))?;

    let panner = match spec.stereo_width {
        Some(width) => Some(attach_panner(patch, chain, gain.out("out"), width.pan(), destination)?),
        None => {
            patch.mult(gain.out("out"), &[destination.in_("left"), destination.in_("right")])?;
            None
        }
    };

    Ok(NoiseVoice {
        source,
        bank,
        gain,
        panner,
    })
}
