//! Tone generator and tinnitus matcher.
//!
//! A carrier tone with optional AM/FM modulation, or a coordinated-reset
//! sequence of four detuned tones, panned to one or both ears. An optional
//! background ambience plays beside the tone at its own volume.
//!
//! Waveform and modulation-type changes rebuild the chain after a short
//! settle period. Everything else ramps live.

use super::{check_frequency, check_volume, volume_gain};
use crate::ambience::{AmbienceLibrary, AssetStore, BackgroundPlayer, BackgroundSound, NoAssets};
use crate::assembler::{attach_panner, tone_source, Chain, ChainSlot, Ear, Rebuild, Waveform};
use crate::config::EngineConfig;
use crate::context::{AudioContext, Frame};
use crate::cr::{CrSequencer, CrState};
use crate::device::OutputDevice;
use crate::error::EngineError;
use crate::graph::{NodeHandle, Patch, PortRef};
use crate::modulation::{self, Carrier, ModulationSpec, ModulationType, Modulator};
use crate::nodes::{Gain, Oscillator, StereoPanner};
use crate::session::{self, Driven};
use crate::timer::{self, LoopGuard, LoopToken, TimerQueue};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Fade in/out of each coordinated-reset tone
const CR_FADE_SECS: f64 = 0.005;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSettings {
    pub frequency: f64,
    /// 0–100
    pub volume: f64,
    pub waveform: Waveform,
    pub ear: Ear,
    pub modulation: Option<ModulationSpec>,
    pub background: Option<BackgroundSound>,
    /// 0–100
    pub background_volume: f64,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            volume: 50.0,
            waveform: Waveform::Sine,
            ear: Ear::Both,
            modulation: None,
            background: None,
            background_volume: 30.0,
        }
    }
}

impl ToneSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        check_frequency(self.frequency)?;
        check_volume(self.volume)?;
        check_volume(self.background_volume)?;
        if let Some(modulation) = &self.modulation {
            modulation.validate()?;
        }
        Ok(())
    }

    fn is_cr(&self) -> bool {
        self.modulation.as_ref().is_some_and(|m| m.kind == ModulationType::Cr)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ToneEvent {
    Rebuild(LoopToken),
    Randomize(LoopToken),
    CrTone(LoopToken),
    CrGap(LoopToken),
}

/// Handles into the built tone chain
#[derive(Debug)]
struct ToneVoice {
    /// Absent while a coordinated-reset sequence supplies the tones
    carrier: Option<NodeHandle>,
    gain: NodeHandle,
    panner: NodeHandle,
    modulator: Option<Modulator>,
}

/// Gain → panner → sink, fed by a carrier (and modulator) unless the
/// settings ask for coordinated reset.
fn assemble_tone(
    patch: &mut Patch,
    destination: &NodeHandle,
    chain: &mut Chain,
    settings: &ToneSettings,
    gain: f64,
) -> Result<ToneVoice, EngineError> {
    let gain = chain.add(patch, "gain", Gain::new(gain));
    let panner = attach_panner(patch, chain, gain.out("out"), settings.ear.pan(), destination)?;
    if settings.is_cr() {
        return Ok(ToneVoice {
            carrier: None,
            gain,
            panner,
            modulator: None,
        });
    }

    let (carrier, signal) = tone_source(patch, chain, settings.waveform, settings.frequency)?;
    let (modulator, out) = match &settings.modulation {
        Some(m) => {
            let (modulator, out) = Modulator::attach(
                patch,
                chain,
                m.kind,
                m.rate,
                m.depth,
                Carrier {
                    node: &carrier,
                    frequency: settings.frequency,
                    signal,
                },
            )?;
            (Some(modulator), out)
        }
        None => (None, signal),
    };
    patch.connect(out, gain.in_("in"))?;

    Ok(ToneVoice {
        carrier: Some(carrier),
        gain,
        panner,
        modulator,
    })
}

pub struct ToneGenerator {
    ctx: AudioContext,
    timers: TimerQueue<ToneEvent>,
    slot: ChainSlot,
    voice: Option<ToneVoice>,
    rebuild: Rebuild,
    randomizer: LoopGuard,
    cr_loop: LoopGuard,
    cr: CrSequencer,
    /// Oscillator and envelope of the sounding CR tone
    cr_tone: Option<Chain>,
    background: BackgroundPlayer,
    settings: Option<ToneSettings>,
    playing: bool,
    rng: StdRng,
}

impl ToneGenerator {
    pub fn new(config: EngineConfig, device: Box<dyn OutputDevice>) -> Result<Self, EngineError> {
        let library = AmbienceLibrary::new(
            Box::new(NoAssets),
            config.ambience_cache_capacity,
            config.ambience_buffer_secs,
        );
        Ok(Self {
            ctx: AudioContext::new(config, device)?,
            timers: TimerQueue::new(),
            slot: ChainSlot::new(),
            voice: None,
            rebuild: Rebuild::new(),
            randomizer: LoopGuard::new(),
            cr_loop: LoopGuard::new(),
            cr: CrSequencer::new(1000.0, 10.0),
            cr_tone: None,
            background: BackgroundPlayer::new(library),
            settings: None,
            playing: false,
            rng: StdRng::from_entropy(),
        })
    }

    /// Load background sounds from `store` instead of generating them
    pub fn with_assets(mut self, store: Box<dyn AssetStore>) -> Self {
        let config = self.ctx.config();
        let library = AmbienceLibrary::new(store, config.ambience_cache_capacity, config.ambience_buffer_secs);
        self.background.stop(self.ctx.patch_mut());
        self.background = BackgroundPlayer::new(library);
        self
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

    pub fn settings(&self) -> Option<&ToneSettings> {
        self.settings.as_ref()
    }

    pub fn live_node_count(&self) -> usize {
        self.ctx.live_node_count()
    }

    pub fn play(&mut self, settings: ToneSettings) -> Result<(), EngineError> {
        settings.validate()?;
        self.ctx.resume()?;
        self.halt();
        self.settings = Some(settings);
        self.build()?;
        self.playing = true;
        self.sync_background();
        log::debug!(
            "op=tone_play frequency={} modulation={:?}",
            self.settings.as_ref().map_or(0.0, |s| s.frequency),
            self.settings.as_ref().and_then(|s| s.modulation.as_ref()).map(|m| m.kind),
        );
        Ok(())
    }

    /// Stop the tone, every loop and the background
    pub fn stop(&mut self) {
        self.halt();
        self.background.stop(self.ctx.patch_mut());
        self.playing = false;
    }

    pub fn toggle(&mut self, settings: ToneSettings) -> Result<(), EngineError> {
        if self.playing {
            self.stop();
            Ok(())
        } else {
            self.play(settings)
        }
    }

    pub fn update_frequency(&mut self, frequency: f64) -> Result<(), EngineError> {
        check_frequency(frequency)?;
        let settings = self.settings_mut("frequency")?;
        settings.frequency = frequency;
        let is_cr = settings.is_cr();

        if is_cr {
            if self.cr.is_playing() {
                self.cr.set_base(frequency, &mut self.rng);
            }
            return Ok(());
        }
        let window = self.ctx.config().user_ramp();
        if let Some(voice) = &mut self.voice {
            let patch = self.ctx.patch_mut();
            if let Some(carrier) = &voice.carrier {
                patch.ramp_param(carrier.in_(Oscillator::FREQUENCY), frequency, window)?;
            }
            if let Some(modulator) = &mut voice.modulator {
                modulator.set_carrier_frequency(patch, frequency, window)?;
            }
        }
        Ok(())
    }

    pub fn update_volume(&mut self, volume: f64) -> Result<(), EngineError> {
        check_volume(volume)?;
        self.settings_mut("volume")?.volume = volume;
        if let Some(voice) = &self.voice {
            let target = volume_gain(volume, self.ctx.config().tone_headroom);
            let window = self.ctx.config().user_ramp();
            self.ctx.patch_mut().ramp_param(voice.gain.in_(Gain::GAIN), target, window)?;
        }
        Ok(())
    }

    /// Swap the carrier waveform; rebuilds unless a CR sequence is running,
    /// which picks it up on its next tone
    pub fn update_waveform(&mut self, waveform: Waveform) -> Result<(), EngineError> {
        let settings = self.settings_mut("waveform")?;
        if settings.waveform == waveform {
            return Ok(());
        }
        settings.waveform = waveform;
        let is_cr = settings.is_cr();
        if self.playing && !is_cr {
            self.schedule_rebuild();
        }
        Ok(())
    }

    pub fn update_ear(&mut self, ear: Ear) -> Result<(), EngineError> {
        self.settings_mut("ear")?.ear = ear;
        if let Some(voice) = &self.voice {
            let window = self.ctx.config().user_ramp();
            self.ctx
                .patch_mut()
                .ramp_param(voice.panner.in_(StereoPanner::PAN), ear.pan(), window)?;
        }
        Ok(())
    }

    /// Replace the modulation settings.
    ///
    /// A change of type (including on/off) rebuilds the chain; otherwise
    /// rate, depth, spread and randomization are applied live.
    pub fn update_modulation(&mut self, modulation: Option<ModulationSpec>) -> Result<(), EngineError> {
        if let Some(m) = &modulation {
            m.validate()?;
        }
        let settings = self.settings_mut("modulation")?;
        let old_kind = settings.modulation.as_ref().map(|m| m.kind);
        let new_kind = modulation.as_ref().map(|m| m.kind);
        settings.modulation = modulation.clone();
        if !self.playing {
            return Ok(());
        }
        if old_kind != new_kind {
            self.schedule_rebuild();
            return Ok(());
        }

        let Some(m) = modulation else {
            return Ok(());
        };
        if m.kind == ModulationType::Cr {
            if self.cr.state().spread_percent != m.frequency_spread_percent {
                self.cr.set_spread(m.frequency_spread_percent, &mut self.rng);
            }
            return Ok(());
        }
        let window = self.ctx.config().user_ramp();
        if let Some(modulator) = self.voice.as_mut().and_then(|v| v.modulator.as_mut()) {
            let patch = self.ctx.patch_mut();
            modulator.set_rate(patch, m.rate, window)?;
            modulator.set_depth(patch, m.depth, window)?;
        }
        self.sync_randomization();
        Ok(())
    }

    pub fn update_modulation_rate(&mut self, rate: f64) -> Result<(), EngineError> {
        modulation::check_rate(rate)?;
        if let Some(m) = &mut self.settings_mut("modulation_rate")?.modulation {
            m.rate = rate;
        }
        let window = self.ctx.config().user_ramp();
        if let Some(modulator) = self.voice.as_mut().and_then(|v| v.modulator.as_mut()) {
            modulator.set_rate(self.ctx.patch_mut(), rate, window)?;
        }
        Ok(())
    }

    pub fn update_modulation_depth(&mut self, depth_percent: f64) -> Result<(), EngineError> {
        modulation::check_depth(depth_percent)?;
        if let Some(m) = &mut self.settings_mut("modulation_depth")?.modulation {
            m.depth = depth_percent;
        }
        let window = self.ctx.config().user_ramp();
        if let Some(modulator) = self.voice.as_mut().and_then(|v| v.modulator.as_mut()) {
            modulator.set_depth(self.ctx.patch_mut(), depth_percent, window)?;
        }
        Ok(())
    }

    /// Tone and gap lengths of the CR sequence, used from the next tone on
    pub fn update_cr_timing(&mut self, tone_duration_ms: f64, gap_ms: f64) -> Result<(), EngineError> {
        let bounded = timer::check_delay_ms("tone_duration_ms", tone_duration_ms)
            .and(timer::check_delay_ms("gap_ms", gap_ms));
        if bounded.is_err() || tone_duration_ms == 0.0 {
            return Err(EngineError::invalid(
                "cr_timing",
                format!("{tone_duration_ms}ms tone / {gap_ms}ms gap"),
            ));
        }
        if let Some(m) = &mut self.settings_mut("cr_timing")?.modulation {
            m.tone_duration_ms = tone_duration_ms;
            m.gap_ms = gap_ms;
        }
        Ok(())
    }

    /// Regenerate the four CR frequencies and reshuffle
    pub fn update_cr_spread(&mut self, spread_percent: f64) -> Result<(), EngineError> {
        if !(0.0..=100.0).contains(&spread_percent) {
            return Err(EngineError::invalid("frequency_spread_percent", spread_percent));
        }
        if let Some(m) = &mut self.settings_mut("cr_spread")?.modulation {
            m.frequency_spread_percent = spread_percent;
        }
        if self.cr.is_playing() {
            self.cr.set_spread(spread_percent, &mut self.rng);
        }
        Ok(())
    }

    /// Turn periodic rate/depth drift on or off.
    ///
    /// Turning it off leaves the last drawn values in place.
    pub fn set_randomization(&mut self, enabled: bool) -> Result<(), EngineError> {
        if let Some(m) = &mut self.settings_mut("randomize")?.modulation {
            m.randomize = enabled;
        }
        self.sync_randomization();
        Ok(())
    }

    pub fn set_randomization_ranges(&mut self, rate_range: (f64, f64), depth_range: (f64, f64)) -> Result<(), EngineError> {
        modulation::check_rate_range(rate_range)?;
        modulation::check_depth_range(depth_range)?;
        if let Some(m) = &mut self.settings_mut("randomization_ranges")?.modulation {
            m.rate_range = rate_range;
            m.depth_range = depth_range;
        }
        Ok(())
    }

    pub fn set_randomization_interval(&mut self, interval_ms: f64) -> Result<(), EngineError> {
        timer::check_delay_ms("randomization_interval_ms", interval_ms)?;
        if interval_ms == 0.0 {
            return Err(EngineError::invalid("randomization_interval_ms", interval_ms));
        }
        if let Some(m) = &mut self.settings_mut("randomization_interval_ms")?.modulation {
            m.randomization_interval_ms = interval_ms;
        }
        if self.randomizer.is_running() {
            self.randomizer.cancel();
            self.sync_randomization();
        }
        Ok(())
    }

    /// Choose the background sound; `None` silences it
    pub fn set_background(&mut self, sound: Option<BackgroundSound>) -> Result<(), EngineError> {
        self.settings_mut("background")?.background = sound;
        self.sync_background();
        Ok(())
    }

    pub fn set_background_volume(&mut self, volume: f64) -> Result<(), EngineError> {
        check_volume(volume)?;
        self.settings_mut("background_volume")?.background_volume = volume;
        let gain = volume_gain(volume, self.ctx.config().noise_headroom);
        let window = self.ctx.config().user_ramp();
        self.background.set_gain(self.ctx.patch_mut(), gain, window)
    }

    pub fn background(&self) -> Option<BackgroundSound> {
        self.background.current()
    }

    pub fn background_gain_target(&self) -> Option<f64> {
        self.background.gain_target(self.ctx.patch())
    }

    pub fn gain_target(&self) -> Option<f64> {
        let voice = self.voice.as_ref()?;
        self.target(voice.gain.in_(Gain::GAIN))
    }

    pub fn pan_target(&self) -> Option<f64> {
        let voice = self.voice.as_ref()?;
        self.target(voice.panner.in_(StereoPanner::PAN))
    }

    pub fn carrier_frequency_target(&self) -> Option<f64> {
        let carrier = self.voice.as_ref()?.carrier.as_ref()?;
        self.target(carrier.in_(Oscillator::FREQUENCY))
    }

    pub fn modulator(&self) -> Option<&Modulator> {
        self.voice.as_ref()?.modulator.as_ref()
    }

    /// Scheduled (offset, scale) of the AM stage
    pub fn am_targets(&self) -> Option<(f64, f64)> {
        self.modulator()?.am_targets(self.ctx.patch())
    }

    /// Scheduled FM excursion (Hz)
    pub fn fm_target(&self) -> Option<f64> {
        self.modulator()?.fm_target(self.ctx.patch())
    }

    pub fn is_randomizing(&self) -> bool {
        self.randomizer.is_running()
    }

    pub fn cr_state(&self) -> Option<CrState> {
        self.cr.is_playing().then(|| self.cr.state())
    }

    pub fn process(&mut self, frames: usize) -> Vec<Frame> {
        session::drive(self, frames)
    }

    fn target(&self, port: PortRef) -> Option<f64> {
        self.ctx.patch().param(port).map(|p| p.scheduled_target())
    }

    fn settings_mut(&mut self, name: &'static str) -> Result<&mut ToneSettings, EngineError> {
        self.settings
            .as_mut()
            .ok_or(EngineError::invalid(name, "no session"))
    }

    fn build(&mut self) -> Result<(), EngineError> {
        let Some(settings) = self.settings.clone() else {
            return Ok(());
        };
        let gain = volume_gain(settings.volume, self.ctx.config().tone_headroom);
        let (patch, destination) = self.ctx.graph();
        let mut chain = Chain::new();
        let built = assemble_tone(patch, destination, &mut chain, &settings, gain)
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

        if let Some(m) = settings.modulation.as_ref().filter(|m| m.kind == ModulationType::Cr) {
            self.cr = CrSequencer::new(settings.frequency, m.frequency_spread_percent);
            self.cr.start(&mut self.rng);
            let token = self.cr_loop.begin();
            self.timers.schedule_at(self.ctx.current_frame(), ToneEvent::CrTone(token));
        }
        self.sync_randomization();
        Ok(())
    }

    /// Start or cancel the randomization loop to match the settings
    fn sync_randomization(&mut self) {
        let wanted = self.modulator().is_some()
            && self
                .settings
                .as_ref()
                .and_then(|s| s.modulation.as_ref())
                .is_some_and(ModulationSpec::randomizes);

        if !wanted {
            if self.randomizer.is_running() {
                log::debug!("op=randomization_stop");
            }
            self.randomizer.cancel();
            return;
        }
        if self.randomizer.is_running() {
            return;
        }
        let token = self.randomizer.begin();
        self.schedule_randomize(token);
    }

    fn schedule_randomize(&mut self, token: LoopToken) {
        let interval = self
            .settings
            .as_ref()
            .and_then(|s| s.modulation.as_ref())
            .map_or(0.0, |m| m.randomization_interval_ms);
        let due = self.ctx.current_frame().saturating_add(self.ctx.frames_for_ms(interval).max(1));
        self.timers.schedule_at(due, ToneEvent::Randomize(token));
    }

    fn randomize(&mut self, token: LoopToken) -> Result<(), EngineError> {
        let Some(m) = self.settings.as_ref().and_then(|s| s.modulation.clone()) else {
            return Ok(());
        };
        let (rate, depth) = modulation::draw(&mut self.rng, m.rate_range, m.depth_range);
        let window = self.ctx.config().randomization_ramp();
        if let Some(modulator) = self.voice.as_mut().and_then(|v| v.modulator.as_mut()) {
            let patch = self.ctx.patch_mut();
            modulator.set_rate(patch, rate, window)?;
            modulator.set_depth(patch, depth, window)?;
        }
        log::debug!("op=randomize rate={rate:.3} depth={depth:.1}");
        self.schedule_randomize(token);
        Ok(())
    }

    /// Start the next CR tone and schedule the gap after it
    fn cr_tone(&mut self, token: LoopToken) -> Result<(), EngineError> {
        let Some(settings) = self.settings.clone() else {
            return Ok(());
        };
        let Some(m) = settings.modulation.as_ref() else {
            return Ok(());
        };
        let Some(input) = self.voice.as_ref().map(|v| v.gain.in_("in")) else {
            return Ok(());
        };
        self.clear_cr_tone();

        let frequency = self.cr.next_frequency(&mut self.rng);
        let tone_frames = self.ctx.frames_for_ms(m.tone_duration_ms).max(1);
        let sample_rate = self.ctx.sample_rate();
        let start = self.ctx.current_time();
        let end = start + tone_frames as f64 / sample_rate;
        let fade = CR_FADE_SECS.min((end - start) / 4.0);

        let patch = self.ctx.patch_mut();
        let mut chain = Chain::new();
        let result = (|| {
            let (osc, signal) = tone_source(patch, &mut chain, settings.waveform, frequency)?;
            let envelope = chain.add(patch, "cr_envelope", Gain::new(0.0));
            if let Some(param) = patch.param_mut(envelope.in_(Gain::GAIN)) {
                param.set_value_at_time(0.0, start);
                param.linear_ramp_to_value_at_time(1.0, start + fade);
                param.set_value_at_time(1.0, end - fade);
                param.linear_ramp_to_value_at_time(0.0, end);
            }
            patch.connect(signal, envelope.in_("in"))?;
            patch.connect(envelope.out("out"), input)?;
            chain.start_sources(patch, start)?;
            patch.stop(osc.id(), end)?;
            Ok::<(), EngineError>(())
        })();
        if let Err(e) = result {
            chain.teardown(patch);
            return Err(e);
        }
        self.cr_tone = Some(chain);

        log::trace!("op=cr_tone frequency={frequency:.1}");
        let due = self.ctx.current_frame().saturating_add(tone_frames);
        self.timers.schedule_at(due, ToneEvent::CrGap(token));
        Ok(())
    }

    fn cr_gap(&mut self, token: LoopToken) {
        self.clear_cr_tone();
        let gap_ms = self
            .settings
            .as_ref()
            .and_then(|s| s.modulation.as_ref())
            .map_or(0.0, |m| m.gap_ms);
        let due = self.ctx.current_frame().saturating_add(self.ctx.frames_for_ms(gap_ms));
        self.timers.schedule_at(due, ToneEvent::CrTone(token));
    }

    fn clear_cr_tone(&mut self) {
        if let Some(chain) = self.cr_tone.take() {
            chain.teardown(self.ctx.patch_mut());
        }
    }

    fn sync_background(&mut self) {
        let Some(settings) = &self.settings else {
            return;
        };
        let wanted = settings.background;
        let gain = volume_gain(settings.background_volume, self.ctx.config().noise_headroom);

        match wanted {
            None => self.background.stop(self.ctx.patch_mut()),
            Some(sound) if self.background.current() == Some(sound) => {}
            Some(sound) => {
                // Ambience is best effort
                if let Err(e) = self.ctx.resume() {
                    log::warn!("op=background_resume sound={sound:?} error={e}");
                    return;
                }
                let (patch, destination) = self.ctx.graph();
                if let Err(e) = self.background.start(patch, destination, sound, gain, &mut self.rng) {
                    log::warn!("op=background_start sound={sound:?} error={e}");
                }
            }
        }
    }

    fn schedule_rebuild(&mut self) {
        self.stop_loops();
        self.slot.clear(self.ctx.patch_mut());
        self.voice = None;
        let token = self.rebuild.request();
        let settle = self.ctx.frames_for_ms(self.ctx.config().rebuild_settle_ms);
        let due = Rebuild::due(self.ctx.current_frame(), settle);
        self.timers.schedule_at(due, ToneEvent::Rebuild(token));
        log::debug!("op=tone_rebuild due_frame={due}");
    }

    fn stop_loops(&mut self) {
        self.randomizer.cancel();
        self.cr_loop.cancel();
        self.cr.stop();
        self.clear_cr_tone();
    }

    fn halt(&mut self) {
        self.rebuild.cancel();
        self.stop_loops();
        self.timers.clear();
        self.slot.clear(self.ctx.patch_mut());
        self.voice = None;
    }
}

impl Driven for ToneGenerator {
    type Event = ToneEvent;

    fn context(&mut self) -> &mut AudioContext {
        &mut self.ctx
    }

    fn timers(&mut self) -> &mut TimerQueue<ToneEvent> {
        &mut self.timers
    }

    fn on_timer(&mut self, event: ToneEvent) {
        match event {
            ToneEvent::Rebuild(token) => {
                if self.rebuild.complete(token) && self.playing {
                    if let Err(e) = self.build() {
                        log::error!("op=tone_rebuild error={e}");
                    }
                }
            }
            ToneEvent::Randomize(token) => {
                if self.randomizer.is_current(token) {
                    if let Err(e) = self.randomize(token) {
                        log::warn!("op=randomize error={e}");
                        self.randomizer.cancel();
                    }
                }
            }
            ToneEvent::CrTone(token) => {
                if self.cr_loop.is_current(token) && self.playing {
                    if let Err(e) = self.cr_tone(token) {
                        log::error!("op=cr_tone error={e}");
                        self.cr_loop.cancel();
                    }
                }
            }
            ToneEvent::CrGap(token) => {
                if self.cr_loop.is_current(token) {
                    self.cr_gap(token);
                }
            }
        }
    }
}
