//! Coordinated-reset tone sequencing.
//!
//! Four tones detuned symmetrically around a base frequency are played one
//! at a time in a shuffled order. When the order is used up it is shuffled
//! again, so the sequence never ends on its own and no position favours any
//! tone.

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MIN_FREQUENCY_HZ: f64 = 50.0;
pub const MAX_FREQUENCY_HZ: f64 = 20_000.0;

/// Offsets from the base frequency in units of the spread
const OFFSETS: [f64; 4] = [-1.5, -0.5, 0.5, 1.5];

/// The four tones for base `frequency` and `spread_percent` of it
pub fn cr_frequencies(frequency: f64, spread_percent: f64) -> [f64; 4] {
    let spread = frequency * spread_percent / 100.0;
    OFFSETS.map(|k| (frequency + k * spread).clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ))
}

/// Uniform in-place permutation (Fisher–Yates)
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Snapshot of the sequencer for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrState {
    pub base_frequency: f64,
    pub spread_percent: f64,
    pub frequencies: [f64; 4],
    pub order: [usize; 4],
    pub index: usize,
    pub playing: bool,
}

#[derive(Debug, Clone)]
pub struct CrSequencer {
    base_frequency: f64,
    spread_percent: f64,
    frequencies: [f64; 4],
    order: [usize; 4],
    index: usize,
    playing: bool,
}

impl CrSequencer {
    pub fn new(base_frequency: f64, spread_percent: f64) -> Self {
        Self {
            base_frequency,
            spread_percent,
            frequencies: cr_frequencies(base_frequency, spread_percent),
            order: [0, 1, 2, 3],
            index: 0,
            playing: false,
        }
    }

    /// Idle → Sequencing with a fresh shuffle
    pub fn start<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.playing = true;
        self.restart(rng);
    }

    /// Sequencing → Idle
    pub fn stop(&mut self) {
        self.playing = false;
        self.index = 0;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Frequency of the next tone, advancing the order and reshuffling at
    /// its end.
    pub fn next_frequency<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        if self.index >= self.order.len() {
            self.reshuffle(rng);
        }
        let frequency = self.frequencies[self.order[self.index]];
        self.index += 1;
        frequency
    }

    pub fn set_spread<R: Rng + ?Sized>(&mut self, spread_percent: f64, rng: &mut R) {
        self.spread_percent = spread_percent;
        self.restart(rng);
    }

    pub fn set_base<R: Rng + ?Sized>(&mut self, base_frequency: f64, rng: &mut R) {
        self.base_frequency = base_frequency;
        self.restart(rng);
    }

    pub fn frequencies(&self) -> [f64; 4] {
        self.frequencies
    }

    pub fn state(&self) -> CrState {
        CrState {
            base_frequency: self.base_frequency,
            spread_percent: self.spread_percent,
            frequencies: self.frequencies,
            order: self.order,
            index: self.index,
            playing: self.playing,
        }
    }

    fn restart<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.frequencies = cr_frequencies(self.base_frequency, self.spread_percent);
        self.reshuffle(rng);
        log::debug!(
            "op=cr_regenerate base={} spread={} frequencies={:?}",
            self.base_frequency,
            self.spread_percent,
            self.frequencies
        );
    }

    fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order = [0, 1, 2, 3];
        shuffle(&mut self.order, rng);
        self.index = 0;
    }
}
