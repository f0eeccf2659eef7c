//! Colored noise through the 8-band shaping bank.

use super::{build_noise_chain, check_volume, volume_gain, NoiseShape, NoiseSpec, NoiseVoice};
use crate::assembler::{Chain, ChainSlot, Rebuild};
use crate::config::EngineConfig;
use crate::context::{AudioContext, Frame};
use crate::device::OutputDevice;
use crate::error::EngineError;
use crate::export;
use crate::filter_bank::{BankLayout, INTERACTIVE_GAIN_SCALE};
use crate::noise::{self, NoiseColor};
use crate::nodes::Gain;
use crate::session::{self, Driven};
use crate::timer::{LoopToken, TimerQueue};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

const LAYOUT: BankLayout = BankLayout::Shaping;

#[derive(Debug, Clone, Copy)]
pub enum NoiseEvent {
    Rebuild(LoopToken),
}

pub struct NoisePlayer {
    ctx: AudioContext,
    timers: TimerQueue<NoiseEvent>,
    slot: ChainSlot,
    voice: Option<NoiseVoice>,
    rebuild: Rebuild,
    spec: Option<NoiseSpec>,
    playing: bool,
    rng: StdRng,
}

impl NoisePlayer {
    pub fn new(config: EngineConfig, device: Box<dyn OutputDevice>) -> Result<Self, EngineError> {
        Ok(Self {
            ctx: AudioContext::new(config, device)?,
            timers: TimerQueue::new(),
            slot: ChainSlot::new(),
            voice: None,
            rebuild: Rebuild::new(),
            spec: None,
            playing: false,
            rng: StdRng::from_entropy(),
        })
    }

    /// Use a fixed seed for the noise source
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn spec(&self) -> Option<&NoiseSpec> {
        self.spec.as_ref()
    }

    pub fn live_node_count(&self) -> usize {
        self.ctx.live_node_count()
    }

    pub fn play(&mut self, spec: NoiseSpec) -> Result<(), EngineError> {
        spec.validate(LAYOUT)?;
        self.ctx.resume()?;
        self.halt();
        self.spec = Some(spec);
        self.build()?;
        self.playing = true;
        log::debug!("op=noise_play color={:?}", self.spec.as_ref().map(|s| s.color));
        Ok(())
    }

    pub fn stop(&mut self) {
        self.halt();
        self.playing = false;
    }

    pub fn toggle(&mut self, spec: NoiseSpec) -> Result<(), EngineError> {
        if self.playing {
            self.stop();
            Ok(())
        } else {
            self.play(spec)
        }
    }

    pub fn update_band_gain(&mut self, index: usize, value: u8) -> Result<(), EngineError> {
        if value > 100 {
            return Err(EngineError::invalid("band_gain", value));
        }
        let spec = self.spec.as_mut().ok_or(EngineError::invalid("band_gain", "no session"))?;
        if index >= spec.band_gains.len() {
            return Err(EngineError::invalid("band_index", index));
        }
        spec.band_gains[index] = value;
        if let Some(voice) = &self.voice {
            let window = self.ctx.config().user_ramp();
            voice.bank.set_band_gain(self.ctx.patch_mut(), index, value as f64, window)?;
        }
        Ok(())
    }

    pub fn update_band_gains(&mut self, values: &[u8]) -> Result<(), EngineError> {
        if values.len() != LAYOUT.band_count() {
            return Err(EngineError::invalid("band_gains", values.len()));
        }
        if let Some(&bad) = values.iter().find(|&&v| v > 100) {
            return Err(EngineError::invalid("band_gain", bad));
        }
        if self.spec.is_none() {
            return Err(EngineError::invalid("band_gains", "no session"));
        }
        for (index, &value) in values.iter().enumerate() {
            self.update_band_gain(index, value)?;
        }
        Ok(())
    }

    pub fn update_volume(&mut self, volume: f64) -> Result<(), EngineError> {
        check_volume(volume)?;
        if let Some(spec) = &mut self.spec {
            spec.volume = volume;
        }
        if let Some(voice) = &self.voice {
            let target = volume_gain(volume, self.ctx.config().noise_headroom);
            let window = self.ctx.config().user_ramp();
            self.ctx.patch_mut().ramp_param(voice.gain.in_(Gain::GAIN), target, window)?;
        }
        Ok(())
    }

    /// Change color: tear down, settle, rebuild
    pub fn update_color(&mut self, color: NoiseColor) -> Result<(), EngineError> {
        let Some(spec) = &mut self.spec else {
            return Err(EngineError::invalid("color", "no session"));
        };
        if spec.color == color {
            return Ok(());
        }
        spec.color = color;
        if self.playing {
            self.schedule_rebuild();
        }
        Ok(())
    }

    /// Scheduled gain of the volume stage
    pub fn gain_target(&self) -> Option<f64> {
        let voice = self.voice.as_ref()?;
        self.ctx
            .patch()
            .param(voice.gain.in_(Gain::GAIN))
            .map(|p| p.scheduled_target())
    }

    /// Scheduled peaking gain (dB) of band `index`
    pub fn band_gain_db(&self, index: usize) -> Option<f64> {
        self.voice.as_ref()?.bank.band_gain_target(self.ctx.patch(), index)
    }

    /// Render the current settings offline to WAV bytes
    pub fn export_wav(&mut self, duration_secs: Option<f64>) -> Result<Vec<u8>, EngineError> {
        let spec = self
            .spec
            .clone()
            .ok_or(EngineError::Export("nothing to export".into()))?;
        let secs = duration_secs.unwrap_or(self.ctx.config().export_secs);
        export::render_noise(&spec, LAYOUT, self.ctx.config(), secs, &mut self.rng)
    }

    pub fn process(&mut self, frames: usize) -> Vec<Frame> {
        session::drive(self, frames)
    }

    fn build(&mut self) -> Result<(), EngineError> {
        let Some(spec) = self.spec.clone() else {
            return Ok(());
        };
        let sample_rate = self.ctx.sample_rate();
        let samples = noise::generate_with(
            spec.color,
            noise::buffer_len(self.ctx.config().noise_buffer_secs, sample_rate),
            &mut self.rng,
        );
        let shape = NoiseShape {
            layout: LAYOUT,
            gain_scale: INTERACTIVE_GAIN_SCALE,
            headroom: self.ctx.config().noise_headroom,
        };

        let (patch, destination) = self.ctx.graph();
        let mut chain = Chain::new();
        let built = build_noise_chain(patch, destination, &mut chain, Arc::from(samples), shape, &spec)
            .and_then(|voice| chain.start_now(patch).map(|()| voice));
        let voice = match built {
            Ok(voice) => voice,
            Err(e) => {
                chain.teardown(patch);
                return Err(e);
            }
        };
        self.slot.install(patch, chain);
        self.voice = Some(voice);
        Ok(())
    }

    fn schedule_rebuild(&mut self) {
        self.slot.clear(self.ctx.patch_mut());
        self.voice = None;
        let token = self.rebuild.request();
        let settle = self.ctx.frames_for_ms(self.ctx.config().rebuild_settle_ms);
        let due = Rebuild::due(self.ctx.current_frame(), settle);
        self.timers.schedule_at(due, NoiseEvent::Rebuild(token));
        log::debug!("op=noise_rebuild due_frame={due}");
    }

    fn halt(&mut self) {
        self.rebuild.cancel();
        self.timers.clear();
        self.slot.clear(self.ctx.patch_mut());
        self.voice = None;
    }
}

impl Driven for NoisePlayer {
    type Event = NoiseEvent;

    fn context(&mut self) -> &mut AudioContext {
        &mut self.ctx
    }

    fn timers(&mut self) -> &mut TimerQueue<NoiseEvent> {
        &mut self.timers
    }

    fn on_timer(&mut self, event: NoiseEvent) {
        match event {
            NoiseEvent::Rebuild(token) => {
                if self.rebuild.complete(token) && self.playing {
                    if let Err(e) = self.build() {
                        log::error!("op=noise_rebuild error={e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PulledDevice;
    use approx::assert_relative_eq;

    fn player() -> NoisePlayer {
        let config = EngineConfig {
            sample_rate: 8000.0,
            noise_buffer_secs: 0.25,
            ..EngineConfig::default()
        };
        NoisePlayer::new(config, Box::new(PulledDevice::new())).unwrap().with_seed(1)
    }

    #[test]
    fn test_play_builds_bank_chain() {
        let mut player = player();
        player
            .play(NoiseSpec::flat(NoiseColor::Pink, LAYOUT, 100.0))
            .unwrap();
        // noise + 8 bands + gain
        assert_eq!(player.live_node_count(), 10);
        assert_relative_eq!(player.gain_target().unwrap(), 0.5);
        let out = player.process(800);
        assert!(out.iter().any(|f| f[0] != 0.0));
    }

    #[test]
    fn test_band_update_ramps_peaking_gain() {
        let mut player = player();
        player
            .play(NoiseSpec::flat(NoiseColor::White, LAYOUT, 50.0))
            .unwrap();
        player.update_band_gain(0, 100).unwrap();
        assert_relative_eq!(player.band_gain_db(0).unwrap(), 20.0);
        assert!(player.update_band_gain(8, 50).is_err());
        assert!(player.update_band_gain(0, 101).is_err());
    }

    #[test]
    fn test_out_of_range_band_leaves_every_band_alone() {
        let mut player = player();
        player
            .play(NoiseSpec::flat(NoiseColor::White, LAYOUT, 60.0))
            .unwrap();
        assert!(player
            .update_band_gains(&[80, 80, 80, 101, 80, 80, 80, 80])
            .is_err());
        for band in 0..LAYOUT.band_count() {
            assert_relative_eq!(player.band_gain_db(band).unwrap(), 0.0);
        }
        assert_eq!(player.spec().unwrap().band_gains, vec![50; 8]);
    }

    #[test]
    fn test_color_change_rebuilds_after_settle() {
        let mut player = player();
        player
            .play(NoiseSpec::flat(NoiseColor::White, LAYOUT, 50.0))
            .unwrap();
        player.update_color(NoiseColor::Brown).unwrap();
        assert_eq!(player.live_node_count(), 0);

        // 50 ms at 8 kHz
        player.process(399);
        assert_eq!(player.live_node_count(), 0);
        player.process(2);
        assert_eq!(player.live_node_count(), 10);
        assert_eq!(player.spec().map(|s| s.color), Some(NoiseColor::Brown));
    }

    #[test]
    fn test_stop_during_settle_cancels_rebuild() {
        let mut player = player();
        player
            .play(NoiseSpec::flat(NoiseColor::White, LAYOUT, 50.0))
            .unwrap();
        player.update_color(NoiseColor::Blue).unwrap();
        player.stop();
        player.process(1000);
        assert_eq!(player.live_node_count(), 0);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_export_uses_current_spec() {
        let mut player = player();
        assert!(player.export_wav(Some(1.0)).is_err());
        player
            .play(NoiseSpec::flat(NoiseColor::Pink, LAYOUT, 50.0))
            .unwrap();
        let bytes = player.export_wav(Some(0.5)).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
    }
}
