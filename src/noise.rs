//! Colored noise generation.
//!
//! Each color is a small recurrence over uniform white noise. Filter state
//! lives only for the duration of one generation call, and every call draws
//! fresh randomness unless a generator is passed in explicitly.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default loop length of a generated noise buffer
pub const DEFAULT_BUFFER_SECS: f64 = 2.0;

/// Noise spectrum shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
    #[serde(alias = "purple")]
    Violet,
    Blue,
    /// Stands in for equal-loudness noise; rendered as white noise
    Grey,
}

impl NoiseColor {
    pub const ALL: [NoiseColor; 6] = [
        NoiseColor::White,
        NoiseColor::Pink,
        NoiseColor::Brown,
        NoiseColor::Violet,
        NoiseColor::Blue,
        NoiseColor::Grey,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NoiseColor::White => "white",
            NoiseColor::Pink => "pink",
            NoiseColor::Brown => "brown",
            NoiseColor::Violet => "violet",
            NoiseColor::Blue => "blue",
            NoiseColor::Grey => "grey",
        }
    }
}

impl FromStr for NoiseColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "white" => Ok(NoiseColor::White),
            "pink" => Ok(NoiseColor::Pink),
            "brown" | "brownian" => Ok(NoiseColor::Brown),
            "violet" | "purple" => Ok(NoiseColor::Violet),
            "blue" => Ok(NoiseColor::Blue),
            "grey" | "gray" => Ok(NoiseColor::Grey),
            other => Err(format!("unknown noise color: {other}")),
        }
    }
}

/// Paul Kellet's economy pink filter
#[derive(Debug, Default)]
struct PinkState {
    b: [f64; 7],
}

impl PinkState {
    fn next(&mut self, white: f64) -> f64 {
        let b = &mut self.b;
        b[0] = 0.99886 * b[0] + white * 0.0555179;
        b[1] = 0.99332 * b[1] + white * 0.0750759;
        b[2] = 0.969 * b[2] + white * 0.153852;
        b[3] = 0.8665 * b[3] + white * 0.3104856;
        b[4] = 0.55 * b[4] + white * 0.5329522;
        b[5] = -0.7616 * b[5] - white * 0.016898;
        let out = (b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362) * 0.11;
        b[6] = white * 0.115926;
        out
    }
}

/// Generate `sample_count` samples of `color` noise with fresh randomness.
///
/// The sample rate is accepted for interface symmetry with the renderer; the
/// recurrences themselves are rate-independent.
pub fn generate(color: NoiseColor, sample_count: usize, _sample_rate: f64) -> Vec<f32> {
    generate_with(color, sample_count, &mut rand::thread_rng())
}

/// Generate noise from an explicit uniform source.
pub fn generate_with<R: Rng + ?Sized>(color: NoiseColor, sample_count: usize, rng: &mut R) -> Vec<f32> {
    let white = (0..sample_count).map(|_| rng.gen_range(-1.0..=1.0));
    color_white(color, white)
}

/// Apply the coloring recurrence of `color` to a white-noise sequence.
pub fn color_white(color: NoiseColor, white: impl IntoIterator<Item = f64>) -> Vec<f32> {
    let white = white.into_iter();
    let mut out = Vec::with_capacity(white.size_hint().0);
    let mut last = 0.0_f64;

    match color {
        NoiseColor::White | NoiseColor::Grey => out.extend(white.map(|w| w as f32)),
        NoiseColor::Pink => {
            let mut pink = PinkState::default();
            out.extend(white.map(|w| pink.next(w) as f32));
        }
        NoiseColor::Brown => {
            for w in white {
                last = (last + 0.02 * w) / 1.02;
                out.push((last * 3.5) as f32);
            }
        }
        NoiseColor::Violet => {
            for w in white {
                // Differentiates against the previous raw white sample
                out.push(((w - last) * 0.3) as f32);
                last = w;
            }
        }
        NoiseColor::Blue => {
            for w in white {
                let avg = (w + last) / 2.0;
                out.push(((avg - last) * 0.5) as f32);
                last = avg;
            }
        }
    }

    for s in &mut out {
        *s = s.clamp(-1.0, 1.0);
    }
    out
}

/// Number of frames in a buffer of `secs` seconds at `sample_rate`
pub fn buffer_len(secs: f64, sample_rate: f64) -> usize {
    (secs * sample_rate).round().max(1.0) as usize
}
