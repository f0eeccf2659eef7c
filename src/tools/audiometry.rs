//! Audiometric tone player.
//!
//! Plays one calibrated tone per [`ToneRequest`] for a fixed duration and
//! then returns to idle on its own. A new request always supersedes the
//! tone before it.

use super::check_frequency;
use crate::assembler::{attach_panner, Chain, ChainSlot, Ear};
use crate::config::EngineConfig;
use crate::context::{AudioContext, Frame};
use crate::device::OutputDevice;
use crate::error::EngineError;
use crate::graph::NodeHandle;
use crate::level::{self, CALIBRATION_RANGE, MAX_LEVEL_DB, MIN_LEVEL_DB};
use crate::modulation::attach_warble;
use crate::nodes::{Gain, Oscillator, StereoPanner};
use crate::session::{self, Driven};
use crate::timer::{self, LoopGuard, LoopToken, TimerQueue};
use serde::{Deserialize, Serialize};

/// Attack and release of the tone envelope
const ENVELOPE_SECS: f64 = 0.010;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneType {
    #[default]
    Pure,
    /// Frequency-wobbled tone for sound-field testing
    Warble,
}

/// One test-cell presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneRequest {
    pub frequency: f64,
    pub hearing_level_db: i32,
    #[serde(default)]
    pub ear: Ear,
    pub duration_ms: f64,
    #[serde(default)]
    pub tone_type: ToneType,
    #[serde(default)]
    pub calibration_gain: Option<f64>,
}

impl ToneRequest {
    pub fn validate(&self) -> Result<(), EngineError> {
        check_frequency(self.frequency)?;
        let level = self.hearing_level_db as f64;
        if !(MIN_LEVEL_DB..=MAX_LEVEL_DB).contains(&level) {
            return Err(EngineError::invalid("hearing_level_db", self.hearing_level_db));
        }
        timer::check_delay_ms("duration_ms", self.duration_ms)?;
        if self.duration_ms == 0.0 {
            return Err(EngineError::invalid("duration_ms", self.duration_ms));
        }
        if let Some(calibration) = self.calibration_gain {
            check_calibration(calibration)?;
        }
        Ok(())
    }
}

fn check_calibration(calibration: f64) -> Result<(), EngineError> {
    if (CALIBRATION_RANGE.0..=CALIBRATION_RANGE.1).contains(&calibration) {
        Ok(())
    } else {
        Err(EngineError::invalid("calibration_gain", calibration))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudiometricState {
    Idle,
    Playing,
}

#[derive(Debug, Clone, Copy)]
pub enum AudiometryEvent {
    ToneFinished(LoopToken),
}

#[derive(Debug)]
struct ActiveTone {
    request: ToneRequest,
    gain: f64,
    panner: NodeHandle,
}

pub struct AudiometricPlayer {
    ctx: AudioContext,
    timers: TimerQueue<AudiometryEvent>,
    slot: ChainSlot,
    tone: LoopGuard,
    active: Option<ActiveTone>,
    calibration: Option<f64>,
}

impl AudiometricPlayer {
    pub fn new(config: EngineConfig, device: Box<dyn OutputDevice>) -> Result<Self, EngineError> {
        Ok(Self {
            ctx: AudioContext::new(config, device)?,
            timers: TimerQueue::new(),
            slot: ChainSlot::new(),
            tone: LoopGuard::new(),
            active: None,
            calibration: None,
        })
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    /// Persisted calibration multiplier, used when a request carries none
    pub fn set_calibration(&mut self, calibration: Option<f64>) -> Result<(), EngineError> {
        if let Some(c) = calibration {
            check_calibration(c)?;
        }
        self.calibration = calibration;
        Ok(())
    }

    pub fn calibration(&self) -> Option<f64> {
        self.calibration
    }

    pub fn state(&self) -> AudiometricState {
        if self.active.is_some() {
            AudiometricState::Playing
        } else {
            AudiometricState::Idle
        }
    }

    /// Linear gain of the sounding tone
    pub fn current_gain(&self) -> Option<f64> {
        self.active.as_ref().map(|a| a.gain)
    }

    pub fn current_request(&self) -> Option<&ToneRequest> {
        self.active.as_ref().map(|a| &a.request)
    }

    pub fn pan_target(&self) -> Option<f64> {
        let active = self.active.as_ref()?;
        self.ctx
            .patch()
            .param(active.panner.in_(StereoPanner::PAN))
            .map(|p| p.scheduled_target())
    }

    pub fn live_node_count(&self) -> usize {
        self.ctx.live_node_count()
    }

    /// Present `request`, cutting off any tone still sounding
    pub fn play(&mut self, request: ToneRequest) -> Result<(), EngineError> {
        request.validate()?;
        self.ctx.resume().inspect_err(|e| {
            log::error!("op=audiometry_play frequency={} error={e}", request.frequency);
        })?;
        self.stop();

        let calibration = request.calibration_gain.or(self.calibration);
        let gain = level::tone_gain(request.hearing_level_db as f64, calibration);
        let duration_frames = self.ctx.frames_for_ms(request.duration_ms).max(1);
        let start = self.ctx.current_time();
        let end = start + duration_frames as f64 / self.ctx.sample_rate();
        let fade = ENVELOPE_SECS.min((end - start) / 4.0);

        let (patch, destination) = self.ctx.graph();
        let mut chain = Chain::new();
        let built = (|| {
            let osc = chain.add(patch, "tone", Oscillator::sine(request.frequency));
            if request.tone_type == ToneType::Warble {
                attach_warble(patch, &mut chain, &osc, request.frequency)?;
            }
            let envelope = chain.add(patch, "envelope", Gain::new(0.0));
            if let Some(param) = patch.param_mut(envelope.in_(Gain::GAIN)) {
                param.set_value_at_time(0.0, start);
                param.linear_ramp_to_value_at_time(gain, start + fade);
                param.set_value_at_time(gain, end - fade);
                param.linear_ramp_to_value_at_time(0.0, end);
            }
            patch.connect(osc.out("out"), envelope.in_("in"))?;
            let panner = attach_panner(patch, &mut chain, envelope.out("out"), request.ear.pan(), destination)?;
            chain.start_sources(patch, start)?;
            patch.stop(osc.id(), end)?;
            Ok::<NodeHandle, EngineError>(panner)
        })();
        let panner = match built {
            Ok(panner) => panner,
            Err(e) => {
                chain.teardown(patch);
                return Err(e);
            }
        };
        self.slot.install(patch, chain);

        let token = self.tone.begin();
        let due = self.ctx.current_frame().saturating_add(duration_frames);
        self.timers.schedule_at(due, AudiometryEvent::ToneFinished(token));
        log::debug!(
            "op=audiometry_play frequency={} level_db={} ear={:?} gain={gain:.4}",
            request.frequency,
            request.hearing_level_db,
            request.ear
        );
        self.active = Some(ActiveTone { request, gain, panner });
        Ok(())
    }

    /// Silence the tone now; a no-op when idle
    pub fn stop(&mut self) {
        self.tone.cancel();
        self.timers.clear();
        self.slot.clear(self.ctx.patch_mut());
        self.active = None;
    }

    pub fn toggle(&mut self, request: ToneRequest) -> Result<(), EngineError> {
        if self.active.is_some() {
            self.stop();
            Ok(())
        } else {
            self.play(request)
        }
    }

    pub fn process(&mut self, frames: usize) -> Vec<Frame> {
        session::drive(self, frames)
    }
}

impl Driven for AudiometricPlayer {
    type Event = AudiometryEvent;

    fn context(&mut self) -> &mut AudioContext {
        &mut self.ctx
    }

    fn timers(&mut self) -> &mut TimerQueue<AudiometryEvent> {
        &mut self.timers
    }

    fn on_timer(&mut self, event: AudiometryEvent) {
        match event {
            AudiometryEvent::ToneFinished(token) => {
                if self.tone.is_current(token) {
                    log::debug!("op=audiometry_finished");
                    self.stop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PulledDevice;
    use crate::graph::{PlaybackState, PortRef};
    use crate::timer::MAX_DELAY_MS;
    use approx::assert_relative_eq;

    fn player() -> AudiometricPlayer {
        let config = EngineConfig {
            sample_rate: 8000.0,
            ..EngineConfig::default()
        };
        AudiometricPlayer::new(config, Box::new(PulledDevice::new())).unwrap()
    }

    fn request(frequency: f64, level: i32) -> ToneRequest {
        ToneRequest {
            frequency,
            hearing_level_db: level,
            ear: Ear::Both,
            duration_ms: 1000.0,
            tone_type: ToneType::Pure,
            calibration_gain: None,
        }
    }

    #[test]
    fn test_tone_finishes_on_time() {
        let mut player = player();
        player.play(request(1000.0, 40)).unwrap();
        assert_eq!(player.state(), AudiometricState::Playing);
        assert_relative_eq!(player.current_gain().unwrap(), 0.1, epsilon = 1e-12);
        // tone + envelope + panner
        assert_eq!(player.live_node_count(), 3);

        player.process(7999);
        assert_eq!(player.state(), AudiometricState::Playing);
        player.process(1);
        assert_eq!(player.state(), AudiometricState::Idle);
        assert_eq!(player.live_node_count(), 0);
    }

    #[test]
    fn test_envelope_reaches_level() {
        let mut player = player();
        player.play(request(1000.0, 100)).unwrap();
        let out = player.process(4000);
        let peak = out.iter().map(|f| f[0].abs()).fold(0.0_f32, f32::max);
        // 0.5 through the centre pan law
        assert!(peak > 0.3 && peak <= 0.36, "peak {peak}");
        assert_eq!(out[0], [0.0, 0.0]);
    }

    #[test]
    fn test_new_request_supersedes() {
        let mut player = player();
        player.play(request(1000.0, 40)).unwrap();
        player.process(4000);
        player.play(request(2000.0, 20)).unwrap();
        assert_eq!(player.live_node_count(), 3);
        assert_eq!(player.current_request().map(|r| r.frequency), Some(2000.0));

        // The first tone's timer must not end the second
        player.process(4001);
        assert_eq!(player.state(), AudiometricState::Playing);
        player.process(4000);
        assert_eq!(player.state(), AudiometricState::Idle);
    }

    #[test]
    fn test_warble_and_ear() {
        let mut player = player();
        let req = ToneRequest {
            ear: Ear::Left,
            tone_type: ToneType::Warble,
            ..request(500.0, 30)
        };
        player.play(req).unwrap();
        assert_eq!(player.live_node_count(), 5);
        assert_relative_eq!(player.pan_target().unwrap(), -1.0);
    }

    fn param_target(player: &AudiometricPlayer, node: &str, param: &str) -> Option<f64> {
        let patch = player.ctx.patch();
        let (id, _, module) = patch.nodes().find(|(_, name, _)| *name == node)?;
        let port = module.port_spec().input_by_name(param)?.id;
        patch.param(PortRef { node: id, port }).map(|p| p.scheduled_target())
    }

    #[test]
    fn test_warble_sweeps_five_percent_for_whole_tone() {
        let mut player = player();
        player
            .play(ToneRequest {
                tone_type: ToneType::Warble,
                ..request(2000.0, 40)
            })
            .unwrap();
        assert_relative_eq!(param_target(&player, "warble_lfo", Oscillator::FREQUENCY).unwrap(), 4.5);
        assert_relative_eq!(param_target(&player, "warble_scale", Gain::GAIN).unwrap(), 100.0);
        assert_relative_eq!(param_target(&player, "tone", Oscillator::FREQUENCY).unwrap(), 2000.0);

        let lfo = player
            .ctx
            .patch()
            .nodes()
            .find(|(_, name, _)| *name == "warble_lfo")
            .map(|(id, _, _)| id)
            .unwrap();
        for _ in 0..7 {
            player.process(1000);
            assert_eq!(player.ctx.patch().playback_state(lfo), Some(PlaybackState::Scheduled));
        }
        player.process(1000);
        assert_eq!(player.state(), AudiometricState::Idle);
    }

    #[test]
    fn test_unbounded_duration_is_rejected() {
        let mut player = player();
        player.play(request(1000.0, 40)).unwrap();
        player.process(100);

        for duration_ms in [1e20, f64::INFINITY, f64::NAN, 0.0] {
            let req = ToneRequest {
                duration_ms,
                ..request(1000.0, 40)
            };
            assert!(player.play(req).is_err(), "accepted {duration_ms}");
        }
        // The tone that was playing is untouched
        assert_eq!(player.state(), AudiometricState::Playing);

        let long = ToneRequest {
            duration_ms: MAX_DELAY_MS,
            ..request(1000.0, 40)
        };
        player.play(long).unwrap();
        player.process(800);
        assert_eq!(player.state(), AudiometricState::Playing);
    }

    #[test]
    fn test_calibration() {
        let mut player = player();
        assert!(player.set_calibration(Some(3.0)).is_err());
        player.set_calibration(Some(2.0)).unwrap();
        player.play(request(1000.0, 40)).unwrap();
        assert_relative_eq!(player.current_gain().unwrap(), 0.2, epsilon = 1e-12);

        // A request's own calibration wins; the ceiling still applies
        let req = ToneRequest {
            calibration_gain: Some(1.5),
            ..request(1000.0, 100)
        };
        player.play(req).unwrap();
        assert_relative_eq!(player.current_gain().unwrap(), 0.5);
    }

    #[test]
    fn test_rejects_bad_requests() {
        let mut player = player();
        assert!(player.play(request(20.0, 40)).is_err());
        assert!(player.play(request(1000.0, 120)).is_err());
        let req = ToneRequest {
            duration_ms: 0.0,
            ..request(1000.0, 40)
        };
        assert!(player.play(req).is_err());
        assert_eq!(player.state(), AudiometricState::Idle);
    }

    #[test]
    fn test_request_json() {
        let req: ToneRequest = serde_json::from_str(
            r#"{ "frequency": 4000, "hearingLevelDb": 25, "ear": "right", "durationMs": 1500, "toneType": "warble" }"#,
        )
        .unwrap();
        assert_eq!(req.ear, Ear::Right);
        assert_eq!(req.tone_type, ToneType::Warble);
        assert_eq!(req.calibration_gain, None);
    }

    #[test]
    fn test_stop_twice() {
        let mut player = player();
        player.stop();
        player.play(request(1000.0, 40)).unwrap();
        player.stop();
        player.stop();
        assert_eq!(player.live_node_count(), 0);
        assert_eq!(player.state(), AudiometricState::Idle);
    }
}
