//! LFO modulation stages.
//!
//! AM inserts an amplitude node between the carrier and the main gain. Its
//! intrinsic gain is zero; the effective gain is the sum of a constant offset
//! of `1 - depth/2` and the LFO scaled by `depth/2`, so the amplitude swings
//! over `[1 - depth, 1]`. FM scales the same LFO by `frequency * depth` and
//! feeds it into the carrier's frequency param. BOTH attaches both stages to
//! one LFO.

use crate::assembler::Chain;
use crate::error::EngineError;
use crate::graph::{NodeHandle, Patch, PortRef};
use crate::nodes::{ConstantSource, Gain, Oscillator};
use crate::timer::check_delay_ms;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MIN_RATE_HZ: f64 = 0.1;
pub const MAX_RATE_HZ: f64 = 10.0;

/// Warble: fixed-rate vibrato on audiometric tones
pub const WARBLE_RATE_HZ: f64 = 4.5;
pub const WARBLE_DEPTH: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationType {
    Am,
    Fm,
    Both,
    /// Coordinated reset; no LFO, the sequencer drives playback
    Cr,
}

impl ModulationType {
    pub fn has_am(&self) -> bool {
        matches!(self, ModulationType::Am | ModulationType::Both)
    }

    pub fn has_fm(&self) -> bool {
        matches!(self, ModulationType::Fm | ModulationType::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationSpec {
    #[serde(rename = "type")]
    pub kind: ModulationType,
    /// LFO rate (Hz)
    pub rate: f64,
    /// Depth in percent
    pub depth: f64,
    pub randomize: bool,
    pub rate_range: (f64, f64),
    pub depth_range: (f64, f64),
    pub randomization_interval_ms: f64,
    pub tone_duration_ms: f64,
    pub gap_ms: f64,
    pub frequency_spread_percent: f64,
}

impl Default for ModulationSpec {
    fn default() -> Self {
        Self {
            kind: ModulationType::Am,
            rate: 4.0,
            depth: 50.0,
            randomize: false,
            rate_range: (0.5, 8.0),
            depth_range: (20.0, 80.0),
            randomization_interval_ms: 5000.0,
            tone_duration_ms: 150.0,
            gap_ms: 50.0,
            frequency_spread_percent: 10.0,
        }
    }
}

impl ModulationSpec {
    pub fn validate(&self) -> Result<(), EngineError> {
        check_rate(self.rate)?;
        check_depth(self.depth)?;
        check_rate_range(self.rate_range)?;
        check_depth_range(self.depth_range)?;
        check_delay_ms("randomization_interval_ms", self.randomization_interval_ms)?;
        if self.randomization_interval_ms == 0.0 {
            return Err(EngineError::invalid("randomization_interval_ms", self.randomization_interval_ms));
        }
        let bounded = check_delay_ms("tone_duration_ms", self.tone_duration_ms)
            .and(check_delay_ms("gap_ms", self.gap_ms));
        if bounded.is_err() || self.tone_duration_ms == 0.0 {
            return Err(EngineError::invalid(
                "cr_timing",
                format!("{}ms tone / {}ms gap", self.tone_duration_ms, self.gap_ms),
            ));
        }
        if !(0.0..=100.0).contains(&self.frequency_spread_percent) {
            return Err(EngineError::invalid("frequency_spread_percent", self.frequency_spread_percent));
        }
        Ok(())
    }

    /// Randomization only applies to LFO modulation
    pub fn randomizes(&self) -> bool {
        self.randomize && self.kind != ModulationType::Cr
    }
}

pub fn check_rate(rate: f64) -> Result<(), EngineError> {
    if (MIN_RATE_HZ..=MAX_RATE_HZ).contains(&rate) {
        Ok(())
    } else {
        Err(EngineError::invalid("modulation_rate", rate))
    }
}

pub fn check_depth(depth: f64) -> Result<(), EngineError> {
    if (0.0..=100.0).contains(&depth) {
        Ok(())
    } else {
        Err(EngineError::invalid("modulation_depth", depth))
    }
}

pub fn check_rate_range((lo, hi): (f64, f64)) -> Result<(), EngineError> {
    if lo <= hi && check_rate(lo).is_ok() && check_rate(hi).is_ok() {
        Ok(())
    } else {
        Err(EngineError::invalid("rate_range", format!("{lo}..{hi}")))
    }
}

pub fn check_depth_range((lo, hi): (f64, f64)) -> Result<(), EngineError> {
    if lo <= hi && check_depth(lo).is_ok() && check_depth(hi).is_ok() {
        Ok(())
    } else {
        Err(EngineError::invalid("depth_range", format!("{lo}..{hi}")))
    }
}

/// Draw a uniform (rate, depth percent) pair from the randomization bounds
pub fn draw<R: Rng + ?Sized>(rng: &mut R, rate_range: (f64, f64), depth_range: (f64, f64)) -> (f64, f64) {
    let rate = rng.gen_range(rate_range.0..=rate_range.1);
    let depth = rng.gen_range(depth_range.0..=depth_range.1);
    (rate, depth)
}

/// The tone a [`Modulator`] acts on
#[derive(Debug, Clone, Copy)]
pub struct Carrier<'a> {
    /// Oscillator whose frequency FM drives
    pub node: &'a NodeHandle,
    pub frequency: f64,
    /// Audio path leaving the carrier
    pub signal: PortRef,
}

#[derive(Debug, Clone)]
struct AmStage {
    scale: NodeHandle,
    offset: NodeHandle,
}

/// The LFO stages attached to one carrier.
#[derive(Debug, Clone)]
pub struct Modulator {
    kind: ModulationType,
    lfo: NodeHandle,
    am: Option<AmStage>,
    fm_scale: Option<NodeHandle>,
    rate: f64,
    depth: f64,
    carrier_frequency: f64,
}

impl Modulator {
    /// Attach `kind` modulation to `carrier`.
    ///
    /// The returned port is where the rest of the chain should continue from.
    pub fn attach(
        patch: &mut Patch,
        chain: &mut Chain,
        kind: ModulationType,
        rate: f64,
        depth_percent: f64,
        carrier: Carrier<'_>,
    ) -> Result<(Self, PortRef), EngineError> {
        let Carrier {
            node: carrier,
            frequency: carrier_frequency,
            signal,
        } = carrier;
        if kind == ModulationType::Cr {
            return Err(EngineError::invalid("modulation_type", "cr has no LFO stage"));
        }
        let depth = depth_percent.clamp(0.0, 100.0) / 100.0;
        let lfo = chain.add(patch, "lfo", Oscillator::sine(rate.clamp(MIN_RATE_HZ, MAX_RATE_HZ)));

        let mut out = signal;
        let am = if kind.has_am() {
            let amp = chain.add(patch, "am_amp", Gain::new(0.0));
            let scale = chain.add(patch, "am_scale", Gain::new(depth / 2.0));
            let offset = chain.add(patch, "am_offset", ConstantSource::new(1.0 - depth / 2.0));
            patch.connect(lfo.out("out"), scale.in_("in"))?;
            patch.connect(scale.out("out"), amp.in_(Gain::GAIN))?;
            patch.connect(offset.out("out"), amp.in_(Gain::GAIN))?;
            patch.connect(signal, amp.in_("in"))?;
            out = amp.out("out");
            Some(AmStage { scale, offset })
        } else {
            None
        };

        let fm_scale = if kind.has_fm() {
            let scale = chain.add(patch, "fm_scale", Gain::new(carrier_frequency * depth));
            patch.connect(lfo.out("out"), scale.in_("in"))?;
            patch.connect(scale.out("out"), carrier.in_(Oscillator::FREQUENCY))?;
            Some(scale)
        } else {
            None
        };

        log::debug!("op=modulation_attach type={kind:?} rate={rate} depth={depth_percent}");
        Ok((
            Self {
                kind,
                lfo,
                am,
                fm_scale,
                rate,
                depth,
                carrier_frequency,
            },
            out,
        ))
    }

    pub fn kind(&self) -> ModulationType {
        self.kind
    }

    /// Live LFO rate (Hz)
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Live depth in percent
    pub fn depth_percent(&self) -> f64 {
        self.depth * 100.0
    }

    pub fn set_rate(&mut self, patch: &mut Patch, rate: f64, window: f64) -> Result<(), EngineError> {
        check_rate(rate)?;
        patch.ramp_param(self.lfo.in_(Oscillator::FREQUENCY), rate, window)?;
        self.rate = rate;
        Ok(())
    }

    pub fn set_depth(&mut self, patch: &mut Patch, depth_percent: f64, window: f64) -> Result<(), EngineError> {
        check_depth(depth_percent)?;
        self.depth = depth_percent / 100.0;
        if let Some(am) = &self.am {
            patch.ramp_param(am.scale.in_(Gain::GAIN), self.depth / 2.0, window)?;
            patch.ramp_param(am.offset.in_(ConstantSource::OFFSET), 1.0 - self.depth / 2.0, window)?;
        }
        self.ramp_fm_scale(patch, window)
    }

    /// Keep FM excursions proportional after the carrier is retuned
    pub fn set_carrier_frequency(&mut self, patch: &mut Patch, frequency: f64, window: f64) -> Result<(), EngineError> {
        self.carrier_frequency = frequency;
        self.ramp_fm_scale(patch, window)
    }

    fn ramp_fm_scale(&self, patch: &mut Patch, window: f64) -> Result<(), EngineError> {
        if let Some(scale) = &self.fm_scale {
            patch.ramp_param(scale.in_(Gain::GAIN), self.carrier_frequency * self.depth, window)?;
        }
        Ok(())
    }

    /// Current scheduled (offset, scale) of the AM stage
    pub fn am_targets(&self, patch: &Patch) -> Option<(f64, f64)> {
        let am = self.am.as_ref()?;
        let offset = patch.param(am.offset.in_(ConstantSource::OFFSET))?.scheduled_target();
        let scale = patch.param(am.scale.in_(Gain::GAIN))?.scheduled_target();
        Some((offset, scale))
    }

    /// Current scheduled gain of the FM stage (Hz of excursion)
    pub fn fm_target(&self, patch: &Patch) -> Option<f64> {
        let scale = self.fm_scale.as_ref()?;
        patch.param(scale.in_(Gain::GAIN)).map(|p| p.scheduled_target())
    }
}

/// Fixed 4.5 Hz, ±5 % vibrato on `carrier`
pub fn attach_warble(
    patch: &mut Patch,
    chain: &mut Chain,
    carrier: &NodeHandle,
    carrier_frequency: f64,
) -> Result<(), EngineError> {
    let lfo = chain.add(patch, "warble_lfo", Oscillator::sine(WARBLE_RATE_HZ));
    let scale = chain.add(patch, "warble_scale", Gain::new(carrier_frequency * WARBLE_DEPTH));
    patch.connect(lfo.out("out"), scale.in_("in"))?;
    patch.connect(scale.out("out"), carrier.in_(Oscillator::FREQUENCY))?;
    Ok(())
}
