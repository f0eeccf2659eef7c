//! Parameter automation and the click-free update protocol.
//!
//! Every automatable input of a module is backed by an [`AudioParam`]: a
//! timeline of set-value and linear-ramp events evaluated against the device
//! clock. Live changes never jump; they go through [`AudioParam::ramp_to`]:
//! cancel pending events, pin the current value at "now", then ramp linearly
//! to the target over a short window.

/// Ramp window for ordinary user-driven updates (volume, frequency, band gain, pan, depth)
pub const USER_RAMP_SECS: f64 = 0.010;

/// Ramp window for randomization-driven modulation updates
pub const RANDOMIZATION_RAMP_SECS: f64 = 0.050;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamEvent {
    SetValue { time: f64, value: f64 },
    LinearRamp { time: f64, value: f64 },
}

impl ParamEvent {
    fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. } | ParamEvent::LinearRamp { time, .. } => time,
        }
    }

    fn value(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { value, .. } | ParamEvent::LinearRamp { value, .. } => value,
        }
    }
}

/// An automatable parameter value.
#[derive(Debug, Clone)]
pub struct AudioParam {
    default_value: f64,
    range: (f64, f64),
    // Last settled point; ramps starting before any pending event start here
    anchor_time: f64,
    anchor_value: f64,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    pub fn new(default_value: f64, range: Option<(f64, f64)>) -> Self {
        let range = range.unwrap_or((f64::MIN, f64::MAX));
        let default_value = default_value.clamp(range.0, range.1);
        Self {
            default_value,
            range,
            anchor_time: 0.0,
            anchor_value: default_value,
            events: Vec::new(),
        }
    }

    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    /// Value the automation timeline produces at `time` (seconds)
    pub fn value_at(&self, time: f64) -> f64 {
        let mut prev_time = self.anchor_time;
        let mut prev_value = self.anchor_value;

        for event in &self.events {
            if event.time() <= time {
                prev_time = event.time();
                prev_value = event.value();
                continue;
            }
            return match *event {
                ParamEvent::LinearRamp { time: end, value } => {
                    let span = end - prev_time;
                    if span <= 0.0 {
                        value
                    } else {
                        prev_value + (value - prev_value) * (time - prev_time) / span
                    }
                }
                ParamEvent::SetValue { .. } => prev_value,
            };
        }

        prev_value
    }

    /// Final value of the automation timeline once every event has run
    pub fn scheduled_target(&self) -> f64 {
        self.events
            .last()
            .map(ParamEvent::value)
            .unwrap_or(self.anchor_value)
    }

    /// Number of events not yet settled
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn set_value_at_time(&mut self, value: f64, time: f64) {
        let value = self.clamp(value);
        self.insert(ParamEvent::SetValue { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, time: f64) {
        let value = self.clamp(value);
        self.insert(ParamEvent::LinearRamp { time, value });
    }

    /// Drop every event scheduled at or after `time`
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    /// Click-free update: cancel, pin the current value at `now`, ramp to `target`
    pub fn ramp_to(&mut self, now: f64, target: f64, window: f64) {
        let current = self.value_at(now);
        self.cancel_scheduled_values(now);
        self.set_value_at_time(current, now);
        self.linear_ramp_to_value_at_time(target, now + window.max(0.0));
    }

    /// Fold events that lie entirely in the past into the anchor.
    ///
    /// Keeps the timeline short on long-running sessions without changing
    /// any value it produces at or after `now`.
    pub fn settle(&mut self, now: f64) {
        let passed = self.events.iter().take_while(|e| e.time() <= now).count();
        if passed == 0 {
            return;
        }
        if let Some(last) = self.events.drain(..passed).last() {
            self.anchor_time = last.time();
            self.anchor_value = last.value();
        }
    }

    fn insert(&mut self, event: ParamEvent) {
        let index = self
            .events
            .iter()
            .position(|e| e.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(index, event);
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.range.0, self.range.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_value_until_automated() {
        let param = AudioParam::new(0.5, None);
        assert_eq!(param.value_at(0.0), 0.5);
        assert_eq!(param.value_at(100.0), 0.5);
        assert_eq!(param.scheduled_target(), 0.5);
    }

    #[test]
    fn test_linear_ramp_interpolates() {
        let mut param = AudioParam::new(0.0, None);
        param.set_value_at_time(0.0, 1.0);
        param.linear_ramp_to_value_at_time(1.0, 2.0);

        assert_relative_eq!(param.value_at(0.5), 0.0);
        assert_relative_eq!(param.value_at(1.5), 0.5, epsilon = 1e-12);
        assert_relative_eq!(param.value_at(2.0), 1.0);
        assert_relative_eq!(param.value_at(3.0), 1.0);
    }

    #[test]
    fn test_ramp_to_pins_current_value() {
        let mut param = AudioParam::new(0.2, None);
        param.ramp_to(1.0, 0.8, USER_RAMP_SECS);

        assert_relative_eq!(param.value_at(1.0), 0.2);
        assert_relative_eq!(param.value_at(1.005), 0.5, epsilon = 1e-9);
        assert_relative_eq!(param.value_at(1.010), 0.8, epsilon = 1e-9);
        assert_relative_eq!(param.scheduled_target(), 0.8);
    }

    #[test]
    fn test_ramp_interrupted_midway_has_no_jump() {
        let mut param = AudioParam::new(0.0, None);
        param.ramp_to(0.0, 1.0, 0.010);

        // Interrupt halfway with a new target
        let before = param.value_at(0.005);
        param.ramp_to(0.005, 0.0, 0.010);
        assert_relative_eq!(param.value_at(0.005), before, epsilon = 1e-12);
        assert_relative_eq!(param.value_at(0.015), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ramp_rate_is_bounded() {
        let sample_rate = 48_000.0;
        let mut param = AudioParam::new(0.0, None);
        param.ramp_to(0.0, 0.5, USER_RAMP_SECS);

        let max_step = 0.5 / (USER_RAMP_SECS * sample_rate) + 1e-9;
        let mut last = param.value_at(0.0);
        for i in 1..1000 {
            let v = param.value_at(i as f64 / sample_rate);
            assert!((v - last).abs() <= max_step, "step {} too large", v - last);
            last = v;
        }
        assert_relative_eq!(last, 0.5);
    }

    #[test]
    fn test_cancel_scheduled_values() {
        let mut param = AudioParam::new(1.0, None);
        param.set_value_at_time(2.0, 1.0);
        param.set_value_at_time(3.0, 2.0);
        param.cancel_scheduled_values(1.5);

        assert_eq!(param.pending_events(), 1);
        assert_eq!(param.value_at(5.0), 2.0);
    }

    #[test]
    fn test_settle_preserves_values() {
        let mut param = AudioParam::new(0.0, None);
        param.set_value_at_time(0.0, 1.0);
        param.linear_ramp_to_value_at_time(1.0, 2.0);
        param.linear_ramp_to_value_at_time(0.0, 3.0);

        let probe = [1.5, 2.0, 2.25, 2.5, 3.0, 4.0];
        let before: Vec<f64> = probe.iter().map(|&t| param.value_at(t)).collect();
        param.settle(2.1);
        let after: Vec<f64> = probe[2..].iter().map(|&t| param.value_at(t)).collect();

        assert_eq!(param.pending_events(), 1);
        for (a, b) in after.iter().zip(&before[2..]) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_values_clamped_to_range() {
        let mut param = AudioParam::new(0.0, Some((-1.0, 1.0)));
        param.set_value_at_time(4.0, 0.0);
        assert_eq!(param.value_at(0.0), 1.0);
    }
}
