//! Engine Performance Benchmarks
//!
//! Block rendering of each tool's graph against the real-time budget:
//!
//! ```text
//! time_budget = buffer_size / sample_rate
//! ```
//!
//! | Sample Rate | Buffer 128 | Buffer 256 | Buffer 512 |
//! |-------------|------------|------------|------------|
//! | 44.1 kHz    | 2.90 ms    | 5.80 ms    | 11.61 ms   |
//! | 48 kHz      | 2.67 ms    | 5.33 ms    | 10.67 ms   |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use earkit::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

const SAMPLE_RATES: [f64; 2] = [44100.0, 48000.0];
const BUFFER_SIZES: [usize; 3] = [128, 256, 512];

fn config(sample_rate: f64) -> EngineConfig {
    EngineConfig {
        sample_rate,
        ..EngineConfig::default()
    }
}

// ============================================================================
// Building Blocks
// ============================================================================

fn bench_noise_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("noise/generate");
    let len = 88200;
    group.throughput(Throughput::Elements(len as u64));

    for color in NoiseColor::ALL {
        group.bench_with_input(BenchmarkId::new("2s_44k", color.name()), &color, |b, &color| {
            let mut rng = StdRng::seed_from_u64(1);
            b.iter(|| earkit::noise::generate_with(black_box(color), len, &mut rng));
        });
    }

    group.finish();
}

fn bench_biquad(c: &mut Criterion) {
    let mut group = c.benchmark_group("nodes/biquad");
    group.throughput(Throughput::Elements(1));

    for (name, mut filter) in [
        ("peaking", Biquad::peaking(1000.0, 1.0, 6.0)),
        ("notch", Biquad::notch(1000.0, 2.0)),
    ] {
        filter.set_sample_rate(44100.0);
        let mut inputs = PortValues::new();
        inputs.set(0, 0.5);
        inputs.set(1, 1000.0);
        inputs.set(2, 1.0);
        inputs.set(3, 6.0);
        let mut outputs = PortValues::new();

        group.bench_function(name, |b| {
            b.iter(|| {
                filter.tick(black_box(&inputs), &mut outputs);
                outputs.get(10).unwrap_or(0.0)
            });
        });
    }

    group.finish();
}

// ============================================================================
// Tool Graphs
// ============================================================================

fn bench_notched_noise(c: &mut Criterion) {
    let mut group = c.benchmark_group("tools/notched_noise");

    for sample_rate in SAMPLE_RATES {
        for buffer_size in BUFFER_SIZES {
            let id = format!("{}kHz/{}", sample_rate as u32 / 1000, buffer_size);
            group.throughput(Throughput::Elements(buffer_size as u64));
            group.bench_with_input(BenchmarkId::new("process", id), &buffer_size, |b, &size| {
                let mut player = NotchedNoisePlayer::new(config(sample_rate), Box::new(PulledDevice::new()))
                    .unwrap()
                    .with_seed(7);
                player
                    .play(NoiseSpec::flat(NoiseColor::Pink, BankLayout::NotchTherapy, 60.0))
                    .unwrap();
                b.iter(|| player.process(black_box(size)));
            });
        }
    }

    group.finish();
}

fn bench_shaped_noise(c: &mut Criterion) {
    let mut group = c.benchmark_group("tools/shaped_noise");
    group.throughput(Throughput::Elements(128));

    group.bench_function("process_128", |b| {
        let mut player = NoisePlayer::new(config(44100.0), Box::new(PulledDevice::new()))
            .unwrap()
            .with_seed(7);
        player
            .play(NoiseSpec::flat(NoiseColor::Brown, BankLayout::Shaping, 60.0))
            .unwrap();
        b.iter(|| player.process(black_box(128)));
    });

    group.finish();
}

fn bench_modulated_tone(c: &mut Criterion) {
    let mut group = c.benchmark_group("tools/tone");
    group.throughput(Throughput::Elements(128));

    for kind in [ModulationType::Am, ModulationType::Fm, ModulationType::Both, ModulationType::Cr] {
        group.bench_with_input(BenchmarkId::new("process_128", format!("{kind:?}")), &kind, |b, &kind| {
            let mut tone = ToneGenerator::new(config(44100.0), Box::new(PulledDevice::new()))
                .unwrap()
                .with_seed(7);
            tone.play(ToneSettings {
                waveform: Waveform::Filtered,
                modulation: Some(ModulationSpec {
                    kind,
                    randomize: true,
                    ..ModulationSpec::default()
                }),
                ..ToneSettings::default()
            })
            .unwrap();
            b.iter(|| tone.process(black_box(128)));
        });
    }

    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    group.sample_size(10);

    group.bench_function("noise_5s_wav", |b| {
        let mut player = NoisePlayer::new(config(44100.0), Box::new(PulledDevice::new()))
            .unwrap()
            .with_seed(7);
        player
            .play(NoiseSpec::flat(NoiseColor::Pink, BankLayout::Shaping, 60.0))
            .unwrap();
        b.iter(|| player.export_wav(Some(5.0)).unwrap());
    });

    group.finish();
}

criterion_group!(block_benches, bench_noise_generation, bench_biquad,);

criterion_group!(tool_benches, bench_notched_noise, bench_shaped_noise, bench_modulated_tone,);

criterion_group!(export_benches, bench_export,);

criterion_main!(block_benches, tool_benches, export_benches);
