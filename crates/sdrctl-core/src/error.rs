//! Error types for sdrctl.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Connection, command, framing, and
//! streaming failures are all captured here.

use crate::types::CorrelationKey;

/// The error type for all sdrctl operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation requires an established control session.
    #[error("not connected")]
    NotConnected,

    /// The control transport failed to connect.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Timed out waiting for the device to answer a command.
    ///
    /// The device may be powered off, or a previous command left it in a
    /// state where it ignores the addressed control item.
    #[error("timeout waiting for response")]
    Timeout,

    /// The control channel closed while a command was awaiting its response.
    #[error("control channel closed")]
    ChannelClosed,

    /// A command addressing the same control item is already in flight.
    #[error("request already outstanding for control item {0}")]
    DuplicateKey(CorrelationKey),

    /// Inbound bytes could not be decoded as a control frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The device answered a command with a non-zero status.
    #[error("device rejected control item {key} (status 0x{status:02X})")]
    Device {
        /// The control item the rejected command addressed.
        key: CorrelationKey,
        /// Raw status byte from the response header.
        status: u8,
    },

    /// The data transport failed to start or stop receiving.
    #[error("stream error: {0}")]
    Stream(String),

    /// A control transport error other than connect (send, shutdown).
    #[error("transport error: {0}")]
    Transport(String),

    /// An invalid parameter was passed to a builder or command constructor.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_display_connect() {
        let e = Error::Connect("connection refused".into());
        assert_eq!(e.to_string(), "connect failed: connection refused");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_channel_closed() {
        assert_eq!(Error::ChannelClosed.to_string(), "control channel closed");
    }

    #[test]
    fn error_display_duplicate_key() {
        let e = Error::DuplicateKey(CorrelationKey::new(0x0018));
        assert_eq!(
            e.to_string(),
            "request already outstanding for control item 0x0018"
        );
    }

    #[test]
    fn error_display_device() {
        let e = Error::Device {
            key: CorrelationKey::new(0x00B8),
            status: 0x02,
        };
        assert_eq!(
            e.to_string(),
            "device rejected control item 0x00B8 (status 0x02)"
        );
    }

    #[test]
    fn error_display_stream() {
        let e = Error::Stream("address in use".into());
        assert_eq!(e.to_string(), "stream error: address in use");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
