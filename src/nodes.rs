//! Core processing nodes
//!
//! The building blocks every tool graph is assembled from: oscillators,
//! looping sample buffers, biquad filters, gain stages, constant sources,
//! the stereo panner and the output sink.
//!
//! Port numbering follows one convention throughout: inputs count up from 0,
//! outputs count up from 10.

use crate::port::{GraphModule, PortDef, PortSpec, PortValues, SignalKind};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::sync::Arc;

/// Oscillator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OscillatorType {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// Periodic oscillator with an automatable frequency.
pub struct Oscillator {
    kind: OscillatorType,
    phase: f64,
    sample_rate: f64,
    spec: PortSpec,
}

impl Oscillator {
    pub const FREQUENCY: &'static str = "frequency";

    pub fn new(kind: OscillatorType, frequency: f64) -> Self {
        Self {
            kind,
            phase: 0.0,
            sample_rate: 44100.0,
            spec: PortSpec {
                inputs: vec![PortDef::param(0, Self::FREQUENCY, frequency).with_range(0.0, 24_000.0)],
                outputs: vec![PortDef::new(10, "out", SignalKind::Audio)],
            },
        }
    }

    pub fn sine(frequency: f64) -> Self {
        Self::new(OscillatorType::Sine, frequency)
    }

    pub fn kind(&self) -> OscillatorType {
        self.kind
    }
}

impl GraphModule for Oscillator {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        let freq = inputs.get_or(0, 440.0);

        let out = match self.kind {
            OscillatorType::Sine => (self.phase * TAU).sin(),
            OscillatorType::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            OscillatorType::Sawtooth => 2.0 * self.phase - 1.0,
            OscillatorType::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
        };
        outputs.set(10, out);

        self.phase = (self.phase + freq / self.sample_rate).fract();
        if self.phase < 0.0 {
            self.phase += 1.0;
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn type_id(&self) -> &'static str {
        "oscillator"
    }

    fn is_source(&self) -> bool {
        true
    }
}

/// Plays a sample buffer, optionally looping.
pub struct BufferSource {
    buffer: Arc<[f32]>,
    looping: bool,
    position: usize,
    spec: PortSpec,
}

impl BufferSource {
    pub fn new(buffer: Arc<[f32]>, looping: bool) -> Self {
        Self {
            buffer,
            looping,
            position: 0,
            spec: PortSpec {
                inputs: vec![],
                outputs: vec![PortDef::new(10, "out", SignalKind::Audio)],
            },
        }
    }

    pub fn looping(buffer: Arc<[f32]>) -> Self {
        Self::new(buffer, true)
    }
}

impl GraphModule for BufferSource {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, _inputs: &PortValues, outputs: &mut PortValues) {
        if self.position >= self.buffer.len() {
            if self.looping && !self.buffer.is_empty() {
                self.position = 0;
            } else {
                outputs.set(10, 0.0);
                return;
            }
        }
        outputs.set(10, self.buffer[self.position] as f64);
        self.position += 1;
    }

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "buffer_source"
    }

    fn is_source(&self) -> bool {
        true
    }
}

/// Biquad response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    Lowpass,
    Notch,
    Peaking,
}

/// A biquad IIR filter (2nd order).
///
/// Direct Form II Transposed; coefficients from the Audio EQ Cookbook.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    pub frequency: f64,
    pub q: f64,
    pub gain_db: f64,

    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    z1: f64,
    z2: f64,

    sample_rate: f64,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, frequency: f64, q: f64, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency,
            q,
            gain_db: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
        };
        f.update_coefficients();
        f
    }

    /// Recompute filter coefficients from current parameters.
    pub fn update_coefficients(&mut self) {
        let nyquist = self.sample_rate * 0.5;
        let freq = self.frequency.clamp(1.0, nyquist * 0.999);
        let q = self.q.max(1e-4);
        let w0 = 2.0 * PI * freq / self.sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_w0;
                let b0 = b1 / 2.0;
                (b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Notch => (
                1.0,
                -2.0 * cos_w0,
                1.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::Peaking => {
                let a_lin = 10.0_f64.powf(self.gain_db / 40.0);
                (
                    1.0 + alpha * a_lin,
                    -2.0 * cos_w0,
                    1.0 - alpha * a_lin,
                    1.0 + alpha / a_lin,
                    -2.0 * cos_w0,
                    1.0 - alpha / a_lin,
                )
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Process a single sample through the filter.
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.update_coefficients();
    }
}

/// Biquad filter node with automatable frequency, Q and gain.
pub struct Biquad {
    filter: BiquadFilter,
    spec: PortSpec,
}

impl Biquad {
    pub const FREQUENCY: &'static str = "frequency";
    pub const Q: &'static str = "q";
    pub const GAIN: &'static str = "gain";

    pub fn new(filter_type: FilterType, frequency: f64, q: f64, gain_db: f64) -> Self {
        let mut filter = BiquadFilter::new(filter_type, frequency, q, 44100.0);
        filter.gain_db = gain_db;
        filter.update_coefficients();
        Self {
            filter,
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(0, "in", SignalKind::Audio),
                    PortDef::param(1, Self::FREQUENCY, frequency).with_range(10.0, 24_000.0),
                    PortDef::param(2, Self::Q, q).with_range(1e-4, 1000.0),
                    PortDef::param(3, Self::GAIN, gain_db).with_range(-40.0, 40.0),
                ],
                outputs: vec![PortDef::new(10, "out", SignalKind::Audio)],
            },
        }
    }

    pub fn lowpass(frequency: f64, q: f64) -> Self {
        Self::new(FilterType::Lowpass, frequency, q, 0.0)
    }

    pub fn peaking(frequency: f64, q: f64, gain_db: f64) -> Self {
        Self::new(FilterType::Peaking, frequency, q, gain_db)
    }

    pub fn notch(frequency: f64, q: f64) -> Self {
        Self::new(FilterType::Notch, frequency, q, 0.0)
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter.filter_type
    }
}

impl GraphModule for Biquad {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        let input = inputs.get_or(0, 0.0);
        let frequency = inputs.get_or(1, self.filter.frequency);
        let q = inputs.get_or(2, self.filter.q);
        let gain_db = inputs.get_or(3, self.filter.gain_db);

        // Coefficients only move while a param is ramping
        if frequency != self.filter.frequency || q != self.filter.q || gain_db != self.filter.gain_db
        {
            self.filter.frequency = frequency;
            self.filter.q = q;
            self.filter.gain_db = gain_db;
            self.filter.update_coefficients();
        }

        outputs.set(10, self.filter.process(input));
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.filter.set_sample_rate(sample_rate);
    }

    fn type_id(&self) -> &'static str {
        "biquad"
    }
}

/// Gain stage. With a cable into its `gain` param it doubles as an
/// amplitude modulator or a scaling stage for control signals.
pub struct Gain {
    spec: PortSpec,
}

impl Gain {
    pub const GAIN: &'static str = "gain";

    pub fn new(gain: f64) -> Self {
        Self {
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(0, "in", SignalKind::Audio),
                    PortDef::param(1, Self::GAIN, gain),
                ],
                outputs: vec![PortDef::new(10, "out", SignalKind::Audio)],
            },
        }
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl GraphModule for Gain {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        let input = inputs.get_or(0, 0.0);
        let gain = inputs.get_or(1, 1.0);
        outputs.set(10, input * gain);
    }

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "gain"
    }
}

/// Emits its (automatable) offset as a constant signal.
pub struct ConstantSource {
    spec: PortSpec,
}

impl ConstantSource {
    pub const OFFSET: &'static str = "offset";

    pub fn new(offset: f64) -> Self {
        Self {
            spec: PortSpec {
                inputs: vec![PortDef::param(0, Self::OFFSET, offset)],
                outputs: vec![PortDef::new(10, "out", SignalKind::Audio)],
            },
        }
    }
}

impl GraphModule for ConstantSource {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        outputs.set(10, inputs.get_or(0, 1.0));
    }

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "constant_source"
    }

    fn is_source(&self) -> bool {
        true
    }
}

/// Equal-power stereo panner for a mono input.
///
/// `pan` of -1 is hard left, +1 hard right, 0 center (-3 dB per side).
pub struct StereoPanner {
    spec: PortSpec,
}

impl StereoPanner {
    pub const PAN: &'static str = "pan";

    pub fn new(pan: f64) -> Self {
        Self {
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(0, "in", SignalKind::Audio),
                    PortDef::param(1, Self::PAN, pan).with_range(-1.0, 1.0),
                ],
                outputs: vec![
                    PortDef::new(10, "left", SignalKind::Audio),
                    PortDef::new(11, "right", SignalKind::Audio),
                ],
            },
        }
    }

    /// Left/right gains for a pan position
    pub fn gains(pan: f64) -> (f64, f64) {
        let x = (pan.clamp(-1.0, 1.0) + 1.0) / 2.0;
        ((x * FRAC_PI_2).cos(), (x * FRAC_PI_2).sin())
    }
}

impl GraphModule for StereoPanner {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        let input = inputs.get_or(0, 0.0);
        let (left, right) = Self::gains(inputs.get_or(1, 0.0));
        outputs.set(10, input * left);
        outputs.set(11, input * right);
    }

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "stereo_panner"
    }
}

/// Output sink: sums everything patched into its left/right inputs.
pub struct Destination {
    spec: PortSpec,
}

impl Destination {
    pub const LEFT_OUT: u32 = 10;
    pub const RIGHT_OUT: u32 = 11;

    pub fn new() -> Self {
        Self {
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(0, "left", SignalKind::Audio),
                    PortDef::new(1, "right", SignalKind::Audio),
                ],
                outputs: vec![
                    PortDef::new(Self::LEFT_OUT, "left", SignalKind::Audio),
                    PortDef::new(Self::RIGHT_OUT, "right", SignalKind::Audio),
                ],
            },
        }
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphModule for Destination {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        outputs.set(Self::LEFT_OUT, inputs.get_or(0, 0.0));
        outputs.set(Self::RIGHT_OUT, inputs.get_or(1, 0.0));
    }

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "destination"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn run_filter(filter: &mut BiquadFilter, freq: f64, sample_rate: f64) -> f64 {
        // Peak amplitude after settling
        let mut peak: f64 = 0.0;
        for i in 0..(sample_rate as usize) {
            let x = (TAU * freq * i as f64 / sample_rate).sin();
            let y = filter.process(x);
            if i > sample_rate as usize / 2 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn test_oscillator_frequency() {
        let mut osc = Oscillator::new(OscillatorType::Sawtooth, 441.0);
        osc.set_sample_rate(44100.0);
        let mut inputs = PortValues::new();
        let mut outputs = PortValues::new();
        inputs.set(0, 441.0);

        let mut samples = Vec::new();
        for _ in 0..44100 {
            osc.tick(&inputs, &mut outputs);
            samples.push(outputs.get(10).unwrap());
        }

        // A sawtooth wraps once per period
        let wraps = samples.windows(2).filter(|w| w[1] < w[0]).count();
        assert!((439..=442).contains(&wraps), "got {wraps} periods");
    }

    #[test]
    fn test_sine_starts_at_zero() {
        let mut osc = Oscillator::sine(1000.0);
        let mut inputs = PortValues::new();
        let mut outputs = PortValues::new();
        inputs.set(0, 1000.0);
        osc.tick(&inputs, &mut outputs);
        assert_eq!(outputs.get(10), Some(0.0));
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, 1000.0, 1.0, 44100.0);
        let mut output = 0.0;
        for _ in 0..2000 {
            output = f.process(1.0);
        }
        assert!((output - 1.0).abs() < 0.001, "Lowpass should pass DC, got {output}");
    }

    #[test]
    fn test_notch_removes_center() {
        let mut f = BiquadFilter::new(FilterType::Notch, 1000.0, 2.0, 44100.0);
        let at_center = run_filter(&mut f, 1000.0, 44100.0);
        let mut f = BiquadFilter::new(FilterType::Notch, 1000.0, 2.0, 44100.0);
        let far_away = run_filter(&mut f, 8000.0, 44100.0);
        assert!(at_center < 0.05, "notch left {at_center}");
        assert!(far_away > 0.9);
    }

    #[test]
    fn test_flat_peaking_is_transparent() {
        let mut f = BiquadFilter::new(FilterType::Peaking, 1000.0, 1.0, 44100.0);
        for i in 0..256 {
            let x = (i as f64 * 0.37).sin();
            assert_relative_eq!(f.process(x), x, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_peaking_boosts_center() {
        let mut f = BiquadFilter::new(FilterType::Peaking, 1000.0, 1.0, 44100.0);
        f.gain_db = 12.0;
        f.update_coefficients();
        let peak = run_filter(&mut f, 1000.0, 44100.0);
        assert_relative_eq!(peak, 10.0_f64.powf(12.0 / 20.0), epsilon = 0.05);
    }

    #[test]
    fn test_panner_equal_power() {
        let (l, r) = StereoPanner::gains(0.0);
        assert_relative_eq!(l, r, epsilon = 1e-12);
        assert_relative_eq!(l * l + r * r, 1.0, epsilon = 1e-12);

        let (l, r) = StereoPanner::gains(-1.0);
        assert_relative_eq!(l, 1.0, epsilon = 1e-12);
        assert_relative_eq!(r, 0.0, epsilon = 1e-12);

        let (l, r) = StereoPanner::gains(1.0);
        assert_relative_eq!(l, 0.0, epsilon = 1e-12);
        assert_relative_eq!(r, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_buffer_source_loops() {
        let buffer: Arc<[f32]> = Arc::from(vec![0.25_f32, 0.5, 0.75]);
        let mut source = BufferSource::looping(buffer);
        let inputs = PortValues::new();
        let mut outputs = PortValues::new();

        let mut seen = Vec::new();
        for _ in 0..7 {
            source.tick(&inputs, &mut outputs);
            seen.push(outputs.get(10).unwrap());
        }
        assert_eq!(seen, vec![0.25, 0.5, 0.75, 0.25, 0.5, 0.75, 0.25]);
    }

    #[test]
    fn test_one_shot_buffer_falls_silent() {
        let buffer: Arc<[f32]> = Arc::from(vec![1.0_f32]);
        let mut source = BufferSource::new(buffer, false);
        let inputs = PortValues::new();
        let mut outputs = PortValues::new();
        source.tick(&inputs, &mut outputs);
        source.tick(&inputs, &mut outputs);
        assert_eq!(outputs.get(10), Some(0.0));
    }

    #[test]
    fn test_gain_scales() {
        let mut gain = Gain::new(0.5);
        let mut inputs = PortValues::new();
        let mut outputs = PortValues::new();
        inputs.set(0, 0.8);
        inputs.set(1, 0.5);
        gain.tick(&inputs, &mut outputs);
        assert_relative_eq!(outputs.get(10).unwrap(), 0.4);
    }
}
