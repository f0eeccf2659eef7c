//! Output device seam.
//!
//! A context talks to its audio output only through [`OutputDevice`]. The
//! device may come up suspended and must be resumed before anything is
//! audible; both opening and resuming can fail.

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Suspended,
    Running,
    Closed,
}

pub trait OutputDevice: Send {
    /// Acquire the device at `sample_rate`
    fn open(&mut self, sample_rate: f64) -> Result<(), EngineError>;

    /// Leave the suspended state
    fn resume(&mut self) -> Result<(), EngineError>;

    fn suspend(&mut self);

    fn close(&mut self);

    fn state(&self) -> DeviceState;
}

/// A device whose frames are pulled by the host, one block at a time.
///
/// Starts suspended, like a browser output that waits for a user gesture.
#[derive(Debug)]
pub struct PulledDevice {
    state: DeviceState,
}

impl PulledDevice {
    pub fn new() -> Self {
        Self {
            state: DeviceState::Suspended,
        }
    }
}

impl Default for PulledDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for PulledDevice {
    fn open(&mut self, sample_rate: f64) -> Result<(), EngineError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(EngineError::Initialization(format!("unsupported sample rate {sample_rate}")));
        }
        self.state = DeviceState::Suspended;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        match self.state {
            DeviceState::Closed => Err(EngineError::Resume("device is closed".into())),
            _ => {
                self.state = DeviceState::Running;
                Ok(())
            }
        }
    }

    fn suspend(&mut self) {
        if self.state == DeviceState::Running {
            self.state = DeviceState::Suspended;
        }
    }

    fn close(&mut self) {
        self.state = DeviceState::Closed;
    }

    fn state(&self) -> DeviceState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulled_device_lifecycle() {
        let mut device = PulledDevice::new();
        device.open(48000.0).unwrap();
        assert_eq!(device.state(), DeviceState::Suspended);
        device.resume().unwrap();
        assert_eq!(device.state(), DeviceState::Running);
        device.suspend();
        assert_eq!(device.state(), DeviceState::Suspended);
        device.close();
        assert!(matches!(device.resume(), Err(EngineError::Resume(_))));
    }

    #[test]
    fn test_open_rejects_bad_rate() {
        let mut device = PulledDevice::new();
        assert!(matches!(device.open(0.0), Err(EngineError::Initialization(_))));
    }
}
