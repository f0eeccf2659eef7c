//! Offline export to WAV.
//!
//! Renders the noise tool's topology through an [`OfflineContext`] for a
//! fixed duration and encodes the result as 16-bit stereo PCM.

use crate::assembler::Chain;
use crate::config::EngineConfig;
use crate::context::{Frame, OfflineContext};
use crate::error::EngineError;
use crate::filter_bank::{BankLayout, EXPORT_GAIN_SCALE};
use crate::noise;
use crate::tools::{build_noise_chain, NoiseShape, NoiseSpec};
use hound::{SampleFormat, WavSpec, WavWriter};
use rand::Rng;
use std::io::Cursor;
use std::sync::Arc;

/// Longest export accepted (seconds)
pub const MAX_EXPORT_SECS: f64 = 600.0;

/// Encode stereo frames as a 16-bit PCM WAV file
pub fn encode_wav(frames: &[Frame], sample_rate: u32) -> Result<Vec<u8>, EngineError> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + frames.len() * 4));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for frame in frames {
            for &s in frame {
                writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Render `spec` through `layout` for `duration_secs` and encode it.
///
/// Band gains use the gentler export curve.
pub fn render_noise<R: Rng + ?Sized>(
    spec: &NoiseSpec,
    layout: BankLayout,
    config: &EngineConfig,
    duration_secs: f64,
    rng: &mut R,
) -> Result<Vec<u8>, EngineError> {
    if !(duration_secs > 0.0 && duration_secs <= MAX_EXPORT_SECS) {
        return Err(EngineError::invalid("export_duration", duration_secs));
    }
    spec.validate(layout)?;

    let sample_rate = config.sample_rate;
    let buffer: Arc<[f32]> = Arc::from(noise::generate_with(
        spec.color,
        noise::buffer_len(config.noise_buffer_secs, sample_rate),
        rng,
    ));

    let mut offline = OfflineContext::new(sample_rate);
    let (patch, destination) = offline.graph();
    let mut chain = Chain::new();
    let shape = NoiseShape {
        layout,
        gain_scale: EXPORT_GAIN_SCALE,
        headroom: config.noise_headroom,
    };
    build_noise_chain(patch, destination, &mut chain, buffer, shape, spec)?;
    chain.start_sources(patch, 0.0)?;

    let frames = offline.render((duration_secs * sample_rate).round() as usize);
    let bytes = encode_wav(&frames, sample_rate.round() as u32).inspect_err(|e| {
        log::error!("op=export_wav color={:?} secs={duration_secs} error={e}", spec.color);
    })?;
    log::debug!("op=export_wav color={:?} secs={duration_secs} bytes={}", spec.color, bytes.len());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::NoiseColor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_encode_wav_header_and_length() {
        let frames = vec![[0.5_f32, -0.5]; 100];
        let bytes = encode_wav(&frames, 8000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(&bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(reader.len(), 200);
    }

    #[test]
    fn test_render_noise_duration() {
        let config = EngineConfig {
            sample_rate: 8000.0,
            noise_buffer_secs: 0.5,
            ..EngineConfig::default()
        };
        let spec = NoiseSpec::flat(NoiseColor::Pink, BankLayout::Shaping, 80.0);
        let mut rng = StdRng::seed_from_u64(11);
        let bytes = render_noise(&spec, BankLayout::Shaping, &config, 1.5, &mut rng).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(&bytes)).unwrap();
        assert_eq!(reader.duration(), 12000);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert!(samples.iter().any(|&s| s != 0));
        // Mono noise is duplicated to both channels
        assert!(samples.chunks(2).all(|f| f[0] == f[1]));
    }

    #[test]
    fn test_render_rejects_bad_duration() {
        let config = EngineConfig::default();
        let spec = NoiseSpec::flat(NoiseColor::White, BankLayout::Shaping, 50.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(render_noise(&spec, BankLayout::Shaping, &config, 0.0, &mut rng).is_err());
    }
}
