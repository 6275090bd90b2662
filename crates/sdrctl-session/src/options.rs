//! Session configuration.

use std::time::Duration;

use sdrctl_core::error::{Error, Result};

use crate::commands::{CaptureMode, MAX_FREQUENCY_HZ};

/// Default command timeout (2 seconds).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for each initialization command sent during connect.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default receiver center frequency (14.1 MHz).
pub const DEFAULT_CENTER_FREQUENCY_HZ: u64 = 14_100_000;

/// Default IQ output rate in samples per second.
pub const DEFAULT_SAMPLE_RATE: u32 = 2_048_000;

/// Options applied to a session controller.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Timeout for commands issued after connect.
    pub command_timeout: Duration,
    /// Timeout for each command of the connect-time initialization sequence.
    pub init_timeout: Duration,
    /// Center frequency programmed during connect.
    pub center_frequency_hz: u64,
    /// IQ output rate programmed during connect.
    pub sample_rate: u32,
    /// Sample format requested when acquisition starts.
    pub capture_mode: CaptureMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            center_frequency_hz: DEFAULT_CENTER_FREQUENCY_HZ,
            sample_rate: DEFAULT_SAMPLE_RATE,
            capture_mode: CaptureMode::default(),
        }
    }
}

impl SessionOptions {
    /// Reject values the device or the controller cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "command timeout must be non-zero".into(),
            ));
        }
        if self.init_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "init timeout must be non-zero".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(Error::InvalidParameter(
                "sample rate must be non-zero".into(),
            ));
        }
        if self.center_frequency_hz == 0 || self.center_frequency_hz > MAX_FREQUENCY_HZ {
            return Err(Error::InvalidParameter(format!(
                "center frequency {} Hz out of range",
                self.center_frequency_hz
            )));
        }
        Ok(())
    }
}
