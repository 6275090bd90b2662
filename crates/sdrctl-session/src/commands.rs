//! Control item command vocabulary.
//!
//! The controller only needs a handful of control items: enough to identify
//! the device, configure the IQ output during connect, and start or stop
//! acquisition. Each builder returns a [`Command`] whose correlation key is
//! the control item code, so the device's echo of that code routes the reply
//! back to the waiting caller.
//!
//! # Payload formats
//!
//! ```text
//! Target name (0x0001):        (empty request)
//! IQ sample rate (0x00B8):     <channel u8> <rate u32 LE>
//! Receiver frequency (0x0020): <channel u8> <freq_hz 40-bit LE>
//! Receiver state (0x0018):     <data type u8> <run state u8> <capture mode u8> <count u8>
//! ```

use bytes::Bytes;

use sdrctl_core::error::{Error, Result};
use sdrctl_core::frame::Frame;
use sdrctl_core::types::CorrelationKey;

use crate::options::SessionOptions;

/// Device identification string.
pub const TARGET_NAME: u16 = 0x0001;

/// Receiver run/stop state.
pub const RECEIVER_STATE: u16 = 0x0018;

/// Receiver center frequency.
pub const RECEIVER_FREQUENCY: u16 = 0x0020;

/// IQ output sample rate.
pub const IQ_SAMPLE_RATE: u16 = 0x00B8;

/// Largest frequency the 40-bit frequency field can carry.
pub const MAX_FREQUENCY_HZ: u64 = (1 << 40) - 1;

/// Channel selector for single-channel receivers.
const CHANNEL_1: u8 = 0x00;

/// Receiver state: complex (IQ) data.
const DATA_TYPE_COMPLEX: u8 = 0x80;
const RUN_STATE_IDLE: u8 = 0x01;
const RUN_STATE_RUN: u8 = 0x02;

/// Sample format of the IQ stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// 24-bit contiguous samples.
    #[default]
    Contiguous24,
    /// 16-bit contiguous samples.
    Contiguous16,
}

impl CaptureMode {
    fn to_byte(self) -> u8 {
        match self {
            CaptureMode::Contiguous24 => 0x80,
            CaptureMode::Contiguous16 => 0x00,
        }
    }
}

/// A control command addressed to one control item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    key: CorrelationKey,
    payload: Bytes,
}

impl Command {
    /// Build a command for an arbitrary control item.
    pub fn new(item: u16, payload: impl Into<Bytes>) -> Self {
        Command {
            key: CorrelationKey::new(item),
            payload: payload.into(),
        }
    }

    /// The correlation key (the addressed control item).
    pub fn key(&self) -> CorrelationKey {
        self.key
    }

    /// The command parameters.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encode the command as a wire frame.
    pub fn encode(&self) -> Result<Bytes> {
        Frame::command(self.key, self.payload.clone()).encode()
    }
}

/// A device response correlated with a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The control item the response answers.
    pub key: CorrelationKey,
    /// Response status byte. Zero means the device accepted the command.
    pub status: u8,
    /// Response parameters.
    pub payload: Bytes,
}

impl From<Frame> for Response {
    fn from(frame: Frame) -> Self {
        Response {
            key: frame.key,
            status: frame.status,
            payload: frame.payload,
        }
    }
}

/// Identification reported by the device during connect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// Device (target) name, e.g. `"NetSDR"`.
    pub name: String,
}

impl DeviceInfo {
    /// Parse a target-name response payload (NUL-terminated ASCII).
    pub fn from_payload(payload: &[u8]) -> Self {
        let end = payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(payload.len());
        DeviceInfo {
            name: String::from_utf8_lossy(&payload[..end]).trim().to_string(),
        }
    }
}

/// Request the device's target name.
pub fn request_target_name() -> Command {
    Command::new(TARGET_NAME, Bytes::new())
}

/// Set the IQ output sample rate.
pub fn set_sample_rate(rate: u32) -> Command {
    let mut payload = Vec::with_capacity(5);
    payload.push(CHANNEL_1);
    payload.extend_from_slice(&rate.to_le_bytes());
    Command::new(IQ_SAMPLE_RATE, payload)
}

/// Tune the receiver.
///
/// Fails with [`Error::InvalidParameter`] above [`MAX_FREQUENCY_HZ`].
pub fn set_frequency(freq_hz: u64) -> Result<Command> {
    if freq_hz > MAX_FREQUENCY_HZ {
        return Err(Error::InvalidParameter(format!(
            "frequency {} Hz exceeds the 40-bit field",
            freq_hz
        )));
    }
    let mut payload = Vec::with_capacity(6);
    payload.push(CHANNEL_1);
    payload.extend_from_slice(&freq_hz.to_le_bytes()[..5]);
    Ok(Command::new(RECEIVER_FREQUENCY, payload))
}

/// Put the receiver into the run state, producing IQ data.
pub fn start_acquisition(mode: CaptureMode) -> Command {
    Command::new(
        RECEIVER_STATE,
        vec![DATA_TYPE_COMPLEX, RUN_STATE_RUN, mode.to_byte(), 0x00],
    )
}

/// Put the receiver back into the idle state.
pub fn stop_acquisition() -> Command {
    Command::new(RECEIVER_STATE, vec![0x00, RUN_STATE_IDLE, 0x00, 0x00])
}

/// The fixed initialization sequence sent on every connect, in order.
///
/// Identify the device, then configure the output rate, then tune. The
/// device applies them in sequence, so the caller must await each response
/// before sending the next.
pub fn init_sequence(options: &SessionOptions) -> Result<Vec<Command>> {
    Ok(vec![
        request_target_name(),
        set_sample_rate(options.sample_rate),
        set_frequency(options.center_frequency_hz)?,
    ])
}
