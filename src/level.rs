//! Audiometric hearing-level to linear-gain mapping.
//!
//! The curve has three segments: an exponential toe below 0 dB HL, a gentle
//! linear section up to 40 dB HL and a steeper linear section up to 100 dB HL.
//! The toe keeps quiet tones above the float/hardware floor; the ceiling keeps
//! loud tones within a safe level.

/// Lowest hearing level accepted (dB HL)
pub const MIN_LEVEL_DB: f64 = -10.0;

/// Highest hearing level accepted (dB HL)
pub const MAX_LEVEL_DB: f64 = 100.0;

/// Final output gain never exceeds this
pub const MAX_TONE_GAIN: f64 = 0.5;

/// Accepted range of the persisted calibration multiplier
pub const CALIBRATION_RANGE: (f64, f64) = (0.1, 2.0);

/// Pre-calibration, pre-ceiling gain for a hearing level in dB HL.
pub fn level_to_gain(level_db: f64) -> f64 {
    let level = level_db.clamp(MIN_LEVEL_DB, MAX_LEVEL_DB);
    if level <= 0.0 {
        0.001 * 1.4_f64.powf(level + 10.0)
    } else if level <= 40.0 {
        0.005 + (level / 40.0) * 0.095
    } else {
        0.1 + ((level - 40.0) / 60.0) * 0.4
    }
}

/// Output gain for a tone: curve value times calibration, capped at [`MAX_TONE_GAIN`].
///
/// A missing or non-positive calibration multiplier counts as 1.
pub fn tone_gain(level_db: f64, calibration: Option<f64>) -> f64 {
    let multiplier = match calibration {
        Some(c) if c > 0.0 => c,
        _ => 1.0,
    };
    (level_to_gain(level_db) * multiplier).clamp(0.0, MAX_TONE_GAIN)
}
