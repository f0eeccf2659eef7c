//! Notched noise: colored noise through ten peaking + notch pairs, placed
//! in the stereo field by a panner.
//!
//! Color changes are live: a freshly generated source is patched into the
//! running filter chain before the old one is dropped.

use super::{build_noise_chain, check_volume, volume_gain, NoiseShape, NoiseSpec, NoiseVoice};
use crate::assembler::{replace_source, Chain, ChainSlot, StereoWidth};
use crate::config::EngineConfig;
use crate::context::{AudioContext, Frame};
use crate::device::OutputDevice;
use crate::error::EngineError;
use crate::filter_bank::{BankLayout, INTERACTIVE_GAIN_SCALE};
use crate::noise::{self, NoiseColor};
use crate::nodes::{BufferSource, Gain, StereoPanner};
use crate::session::{self, Driven};
use crate::timer::TimerQueue;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

const LAYOUT: BankLayout = BankLayout::NotchTherapy;

/// The notched tool schedules nothing; its queue stays empty
#[derive(Debug, Clone, Copy)]
pub enum NotchedEvent {}

pub struct NotchedNoisePlayer {
    ctx: AudioContext,
    timers: TimerQueue<NotchedEvent>,
    slot: ChainSlot,
    voice: Option<NoiseVoice>,
    spec: Option<NoiseSpec>,
    playing: bool,
    rng: StdRng,
}

impl NotchedNoisePlayer {
    pub fn new(config: EngineConfig, device: Box<dyn OutputDevice>) -> Result<Self, EngineError> {
        Ok(Self {
            ctx: AudioContext::new(config, device)?,
            timers: TimerQueue::new(),
            slot: ChainSlot::new(),
            voice: None,
            spec: None,
            playing: false,
            rng: StdRng::from_entropy(),
        })
    }

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

    pub fn play(&mut self, mut spec: NoiseSpec) -> Result<(), EngineError> {
        spec.validate(LAYOUT)?;
        spec.stereo_width.get_or_insert(StereoWidth::default());
        self.ctx.resume()?;
        self.halt();

        let buffer = self.noise_buffer(spec.color);
        let shape = NoiseShape {
            layout: LAYOUT,
            gain_scale: INTERACTIVE_GAIN_SCALE,
            headroom: self.ctx.config().noise_headroom,
        };
        let (patch, destination) = self.ctx.graph();
        let mut chain = Chain::new();
        let built = build_noise_chain(patch, destination, &mut chain, buffer, shape, &spec)
            .and_then(|voice| chain.start_now(patch).map(|()| voice));
        let voice = match built {
            Ok(voice) => voice,
            Err(e) => {
                chain.teardown(patch);
                return Err(e);
            }
        };
        self.slot.install(patch, chain);

        log::debug!("op=notched_play color={:?} width={:?}", spec.color, spec.stereo_width);
        self.voice = Some(voice);
        self.spec = Some(spec);
        self.playing = true;
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

    /// Retune both filters of a pair, e.g. to a newly matched tinnitus pitch
    pub fn update_band_frequency(&mut self, index: usize, frequency: f64) -> Result<(), EngineError> {
        let Some(voice) = &self.voice else {
            return Err(EngineError::invalid("band_frequency", "not playing"));
        };
        let window = self.ctx.config().user_ramp();
        voice.bank.set_band_frequency(self.ctx.patch_mut(), index, frequency, window)
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

    pub fn update_stereo_width(&mut self, width: StereoWidth) -> Result<(), EngineError> {
        if let Some(spec) = &mut self.spec {
            spec.stereo_width = Some(width);
        }
        if let Some(panner) = self.voice.as_ref().and_then(|v| v.panner.as_ref()) {
            let window = self.ctx.config().user_ramp();
            self.ctx
                .patch_mut()
                .ramp_param(panner.in_(StereoPanner::PAN), width.pan(), window)?;
        }
        Ok(())
    }

    /// Swap the noise color without interrupting playback
    pub fn update_color(&mut self, color: NoiseColor) -> Result<(), EngineError> {
        let Some(spec) = &mut self.spec else {
            return Err(EngineError::invalid("color", "no session"));
        };
        spec.color = color;
        if self.voice.is_none() {
            return Ok(());
        }

        let buffer = self.noise_buffer(color);
        let (Some(voice), Some(chain)) = (self.voice.as_mut(), self.slot.chain_mut()) else {
            return Ok(());
        };
        let Some(bank_in) = voice.bank.input() else {
            return Ok(());
        };
        let patch = self.ctx.patch_mut();
        voice.source = replace_source(
            patch,
            chain,
            voice.source.id(),
            "noise",
            BufferSource::looping(buffer),
            &[bank_in],
        )?;
        log::debug!("op=notched_color color={color:?}");
        Ok(())
    }

    pub fn gain_target(&self) -> Option<f64> {
        let voice = self.voice.as_ref()?;
        self.ctx
            .patch()
            .param(voice.gain.in_(Gain::GAIN))
            .map(|p| p.scheduled_target())
    }

    pub fn pan_target(&self) -> Option<f64> {
        let panner = self.voice.as_ref()?.panner.as_ref()?;
        self.ctx
            .patch()
            .param(panner.in_(StereoPanner::PAN))
            .map(|p| p.scheduled_target())
    }

    /// Scheduled peaking gain (dB) of band `index`
    pub fn band_gain_db(&self, index: usize) -> Option<f64> {
        self.voice.as_ref()?.bank.band_gain_target(self.ctx.patch(), index)
    }

    pub fn process(&mut self, frames: usize) -> Vec<Frame> {
        session::drive(self, frames)
    }

    fn noise_buffer(&mut self, color: NoiseColor) -> Arc<[f32]> {
        let len = noise::buffer_len(self.ctx.config().noise_buffer_secs, self.ctx.sample_rate());
        Arc::from(noise::generate_with(color, len, &mut self.rng))
    }

    fn halt(&mut self) {
        self.slot.clear(self.ctx.patch_mut());
        self.voice = None;
    }
}

impl Driven for NotchedNoisePlayer {
    type Event = NotchedEvent;

    fn context(&mut self) -> &mut AudioContext {
        &mut self.ctx
    }

    fn timers(&mut self) -> &mut TimerQueue<NotchedEvent> {
        &mut self.timers
    }

    fn on_timer(&mut self, event: NotchedEvent) {
        match event {}
    }
}
