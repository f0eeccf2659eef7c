//! Fixed-frequency biquad banks for spectral shaping and notch therapy.
//!
//! Two layouts exist. The shaping bank is eight peaking filters. The
//! notch-therapy bank is ten pairs, each a peaking filter followed by a
//! notch at the same center that carves a narrow dip while the band around
//! it stays shapeable. Every filter is chained in series.

use crate::error::EngineError;
use crate::graph::{NodeHandle, NodeId, Patch, PortRef};
use crate::nodes::Biquad;

/// Centers of the 8-band shaping bank (Hz)
pub const SHAPING_CENTERS: [f64; 8] = [32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0];

/// Centers of the 10-band notch-therapy bank (Hz)
pub const NOTCH_CENTERS: [f64; 10] = [
    60.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 12000.0, 16000.0,
];

/// dB per slider step away from the neutral 50 during live playback
pub const INTERACTIVE_GAIN_SCALE: f64 = 0.4;

/// dB per slider step in offline export; deliberately gentler than live playback
pub const EXPORT_GAIN_SCALE: f64 = 0.24;

pub const PEAKING_Q: f64 = 1.0;
pub const NOTCH_Q: f64 = 2.0;

/// Slider value (0–100, neutral 50) to peaking gain in dB
pub fn band_gain_db(value: f64, scale: f64) -> f64 {
    (value.clamp(0.0, 100.0) - 50.0) * scale
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankLayout {
    /// 8 peaking filters
    Shaping,
    /// 10 peaking + notch pairs
    NotchTherapy,
}

impl BankLayout {
    pub fn centers(&self) -> &'static [f64] {
        match self {
            BankLayout::Shaping => &SHAPING_CENTERS,
            BankLayout::NotchTherapy => &NOTCH_CENTERS,
        }
    }

    pub fn band_count(&self) -> usize {
        self.centers().len()
    }

    fn has_notches(&self) -> bool {
        matches!(self, BankLayout::NotchTherapy)
    }
}

#[derive(Debug, Clone)]
pub struct Band {
    pub center: f64,
    pub peaking: NodeHandle,
    pub notch: Option<NodeHandle>,
}

/// A built filter chain living inside a [`Patch`].
#[derive(Debug, Clone)]
pub struct FilterBank {
    gain_scale: f64,
    bands: Vec<Band>,
}

impl FilterBank {
    /// Add every filter of `layout` to `patch` and chain them in series.
    pub fn build(
        patch: &mut Patch,
        layout: BankLayout,
        band_values: &[u8],
        gain_scale: f64,
    ) -> Result<Self, EngineError> {
        if band_values.len() != layout.band_count() {
            return Err(EngineError::invalid("band_gains", format!(
                "expected {} bands, got {}",
                layout.band_count(),
                band_values.len()
            )));
        }

        let mut bands: Vec<Band> = Vec::with_capacity(layout.band_count());
        let mut previous: Option<PortRef> = None;

        for (i, (&center, &value)) in layout.centers().iter().zip(band_values).enumerate() {
            let gain_db = band_gain_db(value as f64, gain_scale);
            let peaking = patch.add(format!("band{i}_peak"), Biquad::peaking(center, PEAKING_Q, gain_db));
            if let Some(prev) = previous {
                patch.connect(prev, peaking.in_("in"))?;
            }
            previous = Some(peaking.out("out"));

            let notch = if layout.has_notches() {
                let notch = patch.add(format!("band{i}_notch"), Biquad::notch(center, NOTCH_Q));
                patch.connect(peaking.out("out"), notch.in_("in"))?;
                previous = Some(notch.out("out"));
                Some(notch)
            } else {
                None
            };

            bands.push(Band { center, peaking, notch });
        }

        Ok(Self {
            gain_scale,
            bands,
        })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// Where the source feeds the bank
    pub fn input(&self) -> Option<PortRef> {
        self.bands.first().map(|b| b.peaking.in_("in"))
    }

    /// Where the bank feeds the gain stage
    pub fn output(&self) -> Option<PortRef> {
        self.bands
            .last()
            .map(|b| b.notch.as_ref().unwrap_or(&b.peaking).out("out"))
    }

    /// Every node the bank owns
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.bands.iter().flat_map(|b| {
            std::iter::once(b.peaking.id()).chain(b.notch.as_ref().map(NodeHandle::id))
        })
    }

    fn band(&self, index: usize) -> Result<&Band, EngineError> {
        self.bands
            .get(index)
            .ok_or_else(|| EngineError::invalid("band_index", index))
    }

    /// Ramp one band's peaking gain to the slider `value`
    pub fn set_band_gain(
        &self,
        patch: &mut Patch,
        index: usize,
        value: f64,
        window: f64,
    ) -> Result<(), EngineError> {
        let band = self.band(index)?;
        let target = band_gain_db(value, self.gain_scale);
        patch.ramp_param(band.peaking.in_(Biquad::GAIN), target, window)?;
        Ok(())
    }

    /// Ramp one band's center (both filters of a pair) to `frequency`
    pub fn set_band_frequency(
        &self,
        patch: &mut Patch,
        index: usize,
        frequency: f64,
        window: f64,
    ) -> Result<(), EngineError> {
        if !(20.0..=20_000.0).contains(&frequency) {
            return Err(EngineError::invalid("band_frequency", frequency));
        }
        let band = self.band(index)?;
        patch.ramp_param(band.peaking.in_(Biquad::FREQUENCY), frequency, window)?;
        if let Some(notch) = &band.notch {
            patch.ramp_param(notch.in_(Biquad::FREQUENCY), frequency, window)?;
        }
        Ok(())
    }

    /// Scheduled peaking gain (dB) of a band
    pub fn band_gain_target(&self, patch: &Patch, index: usize) -> Option<f64> {
        let band = self.bands.get(index)?;
        patch
            .param(band.peaking.in_(Biquad::GAIN))
            .map(|p| p.scheduled_target())
    }
}
