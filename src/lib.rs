//! # Earkit: Procedural Audio Engine for Hearing Tools
//!
//! `earkit` builds, parameterizes and safely mutates the live audio graphs
//! behind a set of hearing tools: an audiometric tone player, a tone
//! generator / tinnitus matcher with AM/FM and coordinated-reset
//! modulation, a colored-noise player with an 8-band EQ, and a notched-noise
//! player with ten peaking + notch pairs.
//!
//! ## Architecture
//!
//! The library is organized in three layers:
//!
//! - **Graph runtime** - ports, automatable params, processing nodes and the
//!   [`Patch`](graph::Patch) that orders and renders them
//! - **Building blocks** - noise colors, filter banks, chain assembly,
//!   modulation stages, the CR sequencer and the dB→gain curve
//! - **Tools** - one [`AudioContext`](context::AudioContext) per tool, driven
//!   by the host through `process(frames)` with a frame-accurate timer queue
//!
//! Every live parameter change is a short linear ramp; structural changes
//! tear the chain down and rebuild it after a settle period.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use earkit::prelude::*;
//!
//! let mut player = AudiometricPlayer::new(EngineConfig::default(), Box::new(PulledDevice::new())).unwrap();
//! player
//!     .play(ToneRequest {
//!         frequency: 1000.0,
//!         hearing_level_db: 40,
//!         ear: Ear::Both,
//!         duration_ms: 1000.0,
//!         tone_type: ToneType::Pure,
//!         calibration_gain: None,
//!     })
//!     .unwrap();
//!
//! // Pull one second of stereo frames
//! let frames = player.process(44100);
//! assert_eq!(frames.len(), 44100);
//! ```

pub mod ambience;
pub mod assembler;
pub mod config;
pub mod context;
pub mod cr;
pub mod device;
pub mod error;
pub mod export;
pub mod filter_bank;
pub mod graph;
pub mod level;
pub mod modulation;
pub mod nodes;
pub mod noise;
pub mod param;
pub mod port;
pub mod session;
pub mod timer;
pub mod tools;

/// Prelude module for convenient imports
pub mod prelude {
    // Graph runtime
    pub use crate::graph::{NodeHandle, NodeId, Patch, PatchError, PlaybackState, PortRef, StopOutcome};
    pub use crate::nodes::{
        Biquad, BufferSource, ConstantSource, Destination, FilterType, Gain, Oscillator, OscillatorType,
        StereoPanner,
    };
    pub use crate::param::AudioParam;
    pub use crate::port::{GraphModule, PortDef, PortSpec, PortValues, SignalKind};

    // Building blocks
    pub use crate::assembler::{Chain, ChainSlot, Ear, StereoWidth, Waveform};
    pub use crate::cr::{CrSequencer, CrState};
    pub use crate::filter_bank::{BankLayout, FilterBank};
    pub use crate::level::{level_to_gain, tone_gain};
    pub use crate::modulation::{ModulationSpec, ModulationType, Modulator};
    pub use crate::noise::NoiseColor;

    // Runtime and host integration
    pub use crate::ambience::{AssetStore, BackgroundSound, DirectoryAssets, NoAssets};
    pub use crate::config::EngineConfig;
    pub use crate::context::{AudioContext, Frame, OfflineContext};
    pub use crate::device::{DeviceState, OutputDevice, PulledDevice};
    pub use crate::error::EngineError;

    // Tools
    pub use crate::tools::{
        AudiometricPlayer, AudiometricState, NoisePlayer, NoiseSpec, NotchedNoisePlayer, ToneGenerator,
        ToneRequest, ToneSettings, ToneType,
    };
}

// Re-export key types at crate root for convenience
pub use prelude::*;
