//! Background ambience.
//!
//! Nature sounds are loaded by file name from an [`AssetStore`], decoded from
//! WAV, mixed down to mono and resampled to the context rate. Decoded
//! buffers live in a small LRU [`AmbienceCache`]. Any load or decode failure
//! is logged and replaced by a procedurally generated approximation, so
//! background playback never fails.

use crate::assembler::Chain;
use crate::error::EngineError;
use crate::graph::{NodeHandle, Patch};
use crate::noise::{self, NoiseColor};
use crate::nodes::{BiquadFilter, BufferSource, FilterType, Gain};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::{PI, TAU};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

/// Peak level of procedurally generated ambience
const PROCEDURAL_PEAK: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundSound {
    Cicadas,
    Birds,
    Ocean,
    Rain,
}

impl BackgroundSound {
    pub const ALL: [BackgroundSound; 4] = [
        BackgroundSound::Cicadas,
        BackgroundSound::Birds,
        BackgroundSound::Ocean,
        BackgroundSound::Rain,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            BackgroundSound::Cicadas => "cicadas.wav",
            BackgroundSound::Birds => "birds.wav",
            BackgroundSound::Ocean => "ocean.wav",
            BackgroundSound::Rain => "rain.wav",
        }
    }
}

/// Source of raw asset bytes
pub trait AssetStore: Send {
    fn load(&self, name: &str) -> Result<Vec<u8>, EngineError>;
}

/// Assets read from files under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetStore for DirectoryAssets {
    fn load(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        std::fs::read(self.root.join(name)).map_err(|e| EngineError::AssetLoad {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// A store with nothing in it; every sound comes from the fallback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssets;

impl AssetStore for NoAssets {
    fn load(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::AssetLoad {
            name: name.to_string(),
            reason: "no asset store configured".into(),
        })
    }
}

/// Decode WAV bytes to mono samples at `sample_rate`
pub fn decode_wav(name: &str, bytes: &[u8], sample_rate: f64) -> Result<Vec<f32>, EngineError> {
    let asset_error = |reason: String| EngineError::AssetLoad {
        name: name.to_string(),
        reason,
    };
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| asset_error(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| asset_error(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| asset_error(e.to_string()))?
        }
    };

    if interleaved.is_empty() {
        return Err(asset_error("no samples".into()));
    }

    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(resample_linear(&mono, spec.sample_rate as f64, sample_rate))
}

/// Linear-interpolation resampler
pub fn resample_linear(input: &[f32], from_rate: f64, to_rate: f64) -> Vec<f32> {
    if input.is_empty() || from_rate <= 0.0 || to_rate <= 0.0 || (from_rate - to_rate).abs() < 1e-9 {
        return input.to_vec();
    }
    let ratio = from_rate / to_rate;
    let out_len = ((input.len() as f64) / ratio).floor().max(1.0) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx.min(input.len() - 1)];
            let b = input[(idx + 1).min(input.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Generate an approximation of `sound` lasting `secs` seconds.
pub fn procedural<R: Rng + ?Sized>(sound: BackgroundSound, secs: f64, sample_rate: f64, rng: &mut R) -> Vec<f32> {
    let len = (secs * sample_rate).round().max(1.0) as usize;
    let mut out = match sound {
        BackgroundSound::Cicadas => cicadas(len, sample_rate, rng),
        BackgroundSound::Birds => birds(len, sample_rate, rng),
        BackgroundSound::Ocean => ocean(len, sample_rate, rng),
        BackgroundSound::Rain => rain(len, sample_rate, rng),
    };
    normalize(&mut out, PROCEDURAL_PEAK);
    out.into_iter().map(|s| s as f32).collect()
}

// Chirp bursts: a pulsed high carrier gated on and off
fn cicadas<R: Rng + ?Sized>(len: usize, sr: f64, rng: &mut R) -> Vec<f64> {
    let carrier = rng.gen_range(4000.0..5000.0);
    let pulse_rate = rng.gen_range(35.0..50.0);
    let burst_period = 1.2;
    let burst_len = 0.6;
    (0..len)
        .map(|i| {
            let t = i as f64 / sr;
            let pos = t % burst_period;
            if pos >= burst_len {
                return 0.0;
            }
            let envelope = (PI * pos / burst_len).sin();
            let pulse = (PI * pulse_rate * t).sin().abs();
            let hiss = rng.gen_range(-0.1..0.1);
            envelope * pulse * ((TAU * carrier * t).sin() + hiss)
        })
        .collect()
}

// Short melodic sweeps at random intervals
fn birds<R: Rng + ?Sized>(len: usize, sr: f64, rng: &mut R) -> Vec<f64> {
    let mut out = vec![0.0; len];
    let mut start = (rng.gen_range(0.05..0.3) * sr) as usize;
    while start < len {
        let notes = rng.gen_range(1..=3);
        let mut cursor = start;
        for _ in 0..notes {
            let dur = (rng.gen_range(0.08..0.25) * sr) as usize;
            let f0: f64 = rng.gen_range(2000.0..4000.0);
            let f1 = (f0 + rng.gen_range(-1500.0..1500.0)).max(800.0);
            let mut phase = 0.0;
            for k in 0..dur {
                let Some(slot) = out.get_mut(cursor + k) else {
                    break;
                };
                let x = k as f64 / dur as f64;
                phase += (f0 + (f1 - f0) * x) / sr;
                *slot += (PI * x).sin() * (TAU * phase).sin();
            }
            cursor += dur + (0.04 * sr) as usize;
        }
        start = cursor + (rng.gen_range(0.4..1.5) * sr) as usize;
    }
    out
}

// Low-frequency swell over lowpassed brown and white noise
fn ocean<R: Rng + ?Sized>(len: usize, sr: f64, rng: &mut R) -> Vec<f64> {
    let brown = noise::generate_with(NoiseColor::Brown, len, rng);
    let white = noise::generate_with(NoiseColor::White, len, rng);
    let mut rumble = BiquadFilter::new(FilterType::Lowpass, 400.0, 0.7, sr);
    let mut wash = BiquadFilter::new(FilterType::Lowpass, 1200.0, 0.7, sr);
    let period = len as f64 / sr;
    (0..len)
        .map(|i| {
            let t = i as f64 / sr;
            let swell = 0.35 + 0.65 * (0.5 - 0.5 * (TAU * t / period).cos());
            let body = rumble.process(brown[i] as f64);
            let foam = wash.process(white[i] as f64) * 0.3;
            swell * (body + foam)
        })
        .collect()
}

// High-passed hiss plus sparse decaying drop transients
fn rain<R: Rng + ?Sized>(len: usize, sr: f64, rng: &mut R) -> Vec<f64> {
    let white = noise::generate_with(NoiseColor::White, len, rng);
    let mut lowpass = BiquadFilter::new(FilterType::Lowpass, 2000.0, 0.7, sr);
    let mut out: Vec<f64> = white
        .iter()
        .map(|&w| {
            let w = w as f64;
            (w - lowpass.process(w)) * 0.4
        })
        .collect();

    let drops = (len as f64 / sr * 15.0) as usize;
    let decay = (0.005 * sr).max(1.0);
    for _ in 0..drops {
        let at = rng.gen_range(0..len);
        let amplitude = rng.gen_range(0.3..0.8);
        for k in 0..(decay * 6.0) as usize {
            let Some(slot) = out.get_mut(at + k) else {
                break;
            };
            *slot += amplitude * (-(k as f64) / decay).exp() * rng.gen_range(-1.0..1.0);
        }
    }
    out
}

fn normalize(samples: &mut [f64], peak: f32) {
    let max = samples.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
    if max > 0.0 {
        let scale = peak as f64 / max;
        samples.iter_mut().for_each(|s| *s *= scale);
    }
}

/// Bounded least-recently-used cache of decoded ambience buffers.
#[derive(Debug)]
pub struct AmbienceCache {
    capacity: usize,
    entries: VecDeque<((BackgroundSound, u32), Arc<[f32]>)>,
}

impl AmbienceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn get(&mut self, sound: BackgroundSound, sample_rate: u32) -> Option<Arc<[f32]>> {
        let key = (sound, sample_rate);
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        let entry = self.entries.remove(index)?;
        let buffer = Arc::clone(&entry.1);
        self.entries.push_back(entry);
        Some(buffer)
    }

    pub fn insert(&mut self, sound: BackgroundSound, sample_rate: u32, buffer: Arc<[f32]>) {
        let key = (sound, sample_rate);
        self.entries.retain(|(k, _)| *k != key);
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((key, buffer));
    }
}

/// Asset store plus cache; always yields a playable buffer.
pub struct AmbienceLibrary {
    store: Box<dyn AssetStore>,
    cache: AmbienceCache,
    fallback_secs: f64,
}

impl AmbienceLibrary {
    pub fn new(store: Box<dyn AssetStore>, capacity: usize, fallback_secs: f64) -> Self {
        Self {
            store,
            cache: AmbienceCache::new(capacity),
            fallback_secs,
        }
    }

    pub fn cache(&self) -> &AmbienceCache {
        &self.cache
    }

    pub fn buffer<R: Rng + ?Sized>(&mut self, sound: BackgroundSound, sample_rate: f64, rng: &mut R) -> Arc<[f32]> {
        let rate_key = sample_rate.round() as u32;
        if let Some(buffer) = self.cache.get(sound, rate_key) {
            return buffer;
        }

        let name = sound.file_name();
        let samples = match self
            .store
            .load(name)
            .and_then(|bytes| decode_wav(name, &bytes, sample_rate))
        {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("op=ambience_load sound={sound:?} fallback=procedural error={e}");
                procedural(sound, self.fallback_secs, sample_rate, rng)
            }
        };

        let buffer: Arc<[f32]> = Arc::from(samples);
        self.cache.insert(sound, rate_key, Arc::clone(&buffer));
        buffer
    }
}

struct ActiveBackground {
    sound: BackgroundSound,
    chain: Chain,
    gain: NodeHandle,
}

/// Looping background sound with its own volume, beside the main chain.
pub struct BackgroundPlayer {
    library: AmbienceLibrary,
    active: Option<ActiveBackground>,
}

impl BackgroundPlayer {
    pub fn new(library: AmbienceLibrary) -> Self {
        Self { library, active: None }
    }

    pub fn library(&self) -> &AmbienceLibrary {
        &self.library
    }

    pub fn current(&self) -> Option<BackgroundSound> {
        self.active.as_ref().map(|a| a.sound)
    }

    /// Start `sound` at linear `gain`, replacing any current background
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        patch: &mut Patch,
        destination: &NodeHandle,
        sound: BackgroundSound,
        gain: f64,
        rng: &mut R,
    ) -> Result<(), EngineError> {
        self.stop(patch);
        let buffer = self.library.buffer(sound, patch.sample_rate(), rng);

        let mut chain = Chain::new();
        let source = chain.add(patch, "background", BufferSource::looping(buffer));
        let level = chain.add(patch, "background_gain", Gain::new(gain));
        patch.connect(source.out("out"), level.in_("in"))?;
        patch.mult(level.out("out"), &[destination.in_("left"), destination.in_("right")])?;
        chain.start_now(patch)?;

        log::debug!("op=background_start sound={sound:?} gain={gain}");
        self.active = Some(ActiveBackground {
            sound,
            chain,
            gain: level,
        });
        Ok(())
    }

    pub fn set_gain(&self, patch: &mut Patch, gain: f64, window: f64) -> Result<(), EngineError> {
        if let Some(active) = &self.active {
            patch.ramp_param(active.gain.in_(Gain::GAIN), gain, window)?;
        }
        Ok(())
    }

    pub fn gain_target(&self, patch: &Patch) -> Option<f64> {
        let active = self.active.as_ref()?;
        patch.param(active.gain.in_(Gain::GAIN)).map(|p| p.scheduled_target())
    }

    pub fn stop(&mut self, patch: &mut Patch) {
        if let Some(active) = self.active.take() {
            active.chain.teardown(patch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::Destination;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    struct MemoryAssets {
        bytes: Vec<u8>,
        loads: Arc<AtomicUsize>,
    }

    impl AssetStore for MemoryAssets {
        fn load(&self, _name: &str) -> Result<Vec<u8>, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    #[test]
    fn test_decode_mixes_stereo_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &[16384, 0, -16384, -16384]);
        let mono = decode_wav("test.wav", &bytes, 8000.0).unwrap();
        assert_eq!(mono, vec![0.25, -0.5]);
    }

    #[test]
    fn test_decode_resamples() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &vec![1000; 2205]);
        let samples = decode_wav("test.wav", &bytes, 44100.0).unwrap();
        assert_eq!(samples.len(), 4410);
    }

    #[test]
    fn test_garbage_is_asset_error() {
        let result = decode_wav("broken.wav", b"not a wav file", 44100.0);
        assert!(matches!(result, Err(EngineError::AssetLoad { .. })));
    }

    #[test]
    fn test_procedural_fallback_is_bounded() {
        let mut rng = StdRng::seed_from_u64(1);
        for sound in BackgroundSound::ALL {
            let buffer = procedural(sound, 1.0, 8000.0, &mut rng);
            assert_eq!(buffer.len(), 8000);
            assert!(buffer.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
            assert!(buffer.iter().any(|&s| s != 0.0), "{sound:?} is silent");
        }
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let mut cache = AmbienceCache::new(2);
        let buf: Arc<[f32]> = Arc::from(vec![0.0_f32; 4]);
        cache.insert(BackgroundSound::Rain, 44100, Arc::clone(&buf));
        cache.insert(BackgroundSound::Ocean, 44100, Arc::clone(&buf));
        // Touch rain so ocean becomes the oldest
        assert!(cache.get(BackgroundSound::Rain, 44100).is_some());
        cache.insert(BackgroundSound::Birds, 44100, buf);

        assert!(cache.get(BackgroundSound::Ocean, 44100).is_none());
        assert!(cache.get(BackgroundSound::Rain, 44100).is_some());
        assert!(cache.get(BackgroundSound::Birds, 44100).is_some());
    }

    #[test]
    fn test_library_loads_once() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let loads = Arc::new(AtomicUsize::new(0));
        let store = MemoryAssets {
            bytes: wav_bytes(spec, &[0, 100, 200]),
            loads: Arc::clone(&loads),
        };
        let mut library = AmbienceLibrary::new(Box::new(store), 4, 1.0);
        let mut rng = StdRng::seed_from_u64(5);

        let first = library.buffer(BackgroundSound::Birds, 44100.0, &mut rng);
        let second = library.buffer(BackgroundSound::Birds, 44100.0, &mut rng);
        assert_eq!(first.len(), 3);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_asset_falls_back() {
        let mut library = AmbienceLibrary::new(Box::new(DirectoryAssets::new("/nonexistent/assets")), 4, 0.5);
        let mut rng = StdRng::seed_from_u64(5);
        let buffer = library.buffer(BackgroundSound::Ocean, 8000.0, &mut rng);
        assert_eq!(buffer.len(), 4000);
    }

    #[test]
    fn test_background_player_lifecycle() {
        let mut patch = Patch::new(8000.0);
        let sink = patch.add("destination", Destination::new());
        patch.set_output(sink.id());
        let mut player = BackgroundPlayer::new(AmbienceLibrary::new(Box::new(NoAssets), 2, 0.25));
        let mut rng = StdRng::seed_from_u64(2);

        player.start(&mut patch, &sink, BackgroundSound::Rain, 0.2, &mut rng).unwrap();
        assert_eq!(player.current(), Some(BackgroundSound::Rain));
        assert_eq!(patch.node_count(), 3);

        player.set_gain(&mut patch, 0.4, 0.010).unwrap();
        assert_eq!(player.gain_target(&patch), Some(0.4));

        player.start(&mut patch, &sink, BackgroundSound::Cicadas, 0.2, &mut rng).unwrap();
        assert_eq!(patch.node_count(), 3);

        player.stop(&mut patch);
        assert_eq!(player.current(), None);
        assert_eq!(patch.node_count(), 1);
    }
}
