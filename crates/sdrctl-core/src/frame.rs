//! Control channel frame encoding and decoding.
//!
//! Every message on the control channel is a self-describing frame: a fixed
//! 6-byte little-endian header followed by a variable-length payload. This
//! module is a pure codec with no I/O dependencies.
//!
//! # Wire format
//!
//! ```text
//! ┌────────────────┬──────────┬──────────┬──────────────┬─────────────────┐
//! │ Length (2B LE) │ Kind (1B)│Status(1B)│ Item (2B LE) │ Payload         │
//! │ header incl.   │ 0/1/2    │ 0 = OK   │ control item │ (Length - 6 B)  │
//! └────────────────┴──────────┴──────────┴──────────────┴─────────────────┘
//! ```
//!
//! The control item code doubles as the [`CorrelationKey`]: the device echoes
//! the item code of a command in its response, so a response can be matched
//! to its request from the response bytes alone.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::types::CorrelationKey;

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 6;

/// Largest frame the 13-bit length convention allows, header included.
pub const MAX_FRAME_SIZE: usize = 0x1FFF;

/// Status byte of a successful response (and of every command).
pub const STATUS_OK: u8 = 0x00;

/// Message kind carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Host-to-device command. Always answered by a `Response`.
    Command,
    /// Device reply to a command, carrying the same control item code.
    Response,
    /// Unsolicited device-to-host message.
    Notification,
}

impl FrameKind {
    /// The header byte for this kind.
    pub fn to_byte(self) -> u8 {
        match self {
            FrameKind::Command => 0x00,
            FrameKind::Response => 0x01,
            FrameKind::Notification => 0x02,
        }
    }

    /// Parse a header kind byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(FrameKind::Command),
            0x01 => Some(FrameKind::Response),
            0x02 => Some(FrameKind::Notification),
            _ => None,
        }
    }
}

/// A decoded control channel frame.
///
/// Frames are immutable values: build one right before sending, or get one
/// back from [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message kind.
    pub kind: FrameKind,
    /// Response status; [`STATUS_OK`] for commands and notifications.
    pub status: u8,
    /// Control item code, used to correlate responses with commands.
    pub key: CorrelationKey,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Build a command frame.
    pub fn command(key: CorrelationKey, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Command, key, payload)
    }

    /// Build a successful response frame.
    pub fn response(key: CorrelationKey, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Response, key, payload)
    }

    /// Build a notification frame.
    pub fn notification(key: CorrelationKey, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Notification, key, payload)
    }

    fn new(kind: FrameKind, key: CorrelationKey, payload: impl Into<Bytes>) -> Self {
        Frame {
            kind,
            status: STATUS_OK,
            key,
            payload: payload.into(),
        }
    }

    /// Replace the status byte.
    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    /// Whether the status byte reports success.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode the frame into its wire representation.
    ///
    /// Deterministic and side-effect free. Fails only when the payload does
    /// not fit in [`MAX_FRAME_SIZE`].
    pub fn encode(&self) -> Result<Bytes> {
        let size = self.wire_size();
        if size > MAX_FRAME_SIZE {
            return Err(Error::InvalidParameter(format!(
                "frame of {} bytes exceeds maximum of {} bytes",
                size, MAX_FRAME_SIZE
            )));
        }

        let mut dst = BytesMut::with_capacity(size);
        dst.put_u16_le(size as u16);
        dst.put_u8(self.kind.to_byte());
        dst.put_u8(self.status);
        dst.put_u16_le(self.key.item());
        dst.put_slice(&self.payload);
        Ok(dst.freeze())
    }
}

/// Read the declared frame length from the start of a header.
///
/// Returns `None` if fewer than two bytes are available. Stream transports
/// use this to delimit frames before handing them to [`decode`].
pub fn frame_len(header: &[u8]) -> Option<usize> {
    if header.len() < 2 {
        return None;
    }
    Some(u16::from_le_bytes([header[0], header[1]]) as usize)
}

/// Decode exactly one frame from `data`.
///
/// Fails with [`Error::MalformedFrame`] when the buffer is shorter than the
/// header, when the declared length is out of range or disagrees with the
/// bytes available, or when the kind byte is not recognized.
pub fn decode(data: &[u8]) -> Result<Frame> {
    if data.len() < HEADER_SIZE {
        return Err(Error::MalformedFrame(format!(
            "frame too short: {} bytes, minimum is {}",
            data.len(),
            HEADER_SIZE
        )));
    }

    let declared = u16::from_le_bytes([data[0], data[1]]) as usize;
    if declared < HEADER_SIZE {
        return Err(Error::MalformedFrame(format!(
            "declared length {} is smaller than the header",
            declared
        )));
    }
    if declared > MAX_FRAME_SIZE {
        return Err(Error::MalformedFrame(format!(
            "declared length {} exceeds maximum of {} bytes",
            declared, MAX_FRAME_SIZE
        )));
    }
    if declared != data.len() {
        return Err(Error::MalformedFrame(format!(
            "declared length {} does not match {} bytes available",
            declared,
            data.len()
        )));
    }

    let kind = FrameKind::from_byte(data[2]).ok_or_else(|| {
        Error::MalformedFrame(format!("unknown frame kind 0x{:02X}", data[2]))
    })?;
    let status = data[3];
    let key = CorrelationKey::new(u16::from_le_bytes([data[4], data[5]]));

    Ok(Frame {
        kind,
        status,
        key,
        payload: Bytes::copy_from_slice(&data[HEADER_SIZE..]),
    })
}
