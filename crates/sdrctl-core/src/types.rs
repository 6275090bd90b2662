//! Shared value types: correlation keys and session state.

use std::fmt;

/// Key used to match a response frame to the command that caused it.
///
/// The key is the 16-bit control item code the command addresses. The
/// device echoes the same code in its reply, so the key is computable from
/// either side of the exchange without shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(u16);

impl CorrelationKey {
    /// Wrap a raw control item code.
    pub const fn new(item: u16) -> Self {
        CorrelationKey(item)
    }

    /// The raw control item code.
    pub const fn item(self) -> u16 {
        self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<u16> for CorrelationKey {
    fn from(item: u16) -> Self {
        CorrelationKey(item)
    }
}

/// Lifecycle state of a device session.
///
/// `Streaming` always implies the control session that authorized it is
/// still established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No control session. The initial state.
    #[default]
    Disconnected,
    /// Control session established and initialized; no acquisition running.
    Connected,
    /// Control session established and IQ acquisition running.
    Streaming,
}

impl SessionState {
    /// Whether a control session is established (`Connected` or `Streaming`).
    pub fn is_connected(self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_is_zero_padded_hex() {
        assert_eq!(CorrelationKey::new(0x18).to_string(), "0x0018");
        assert_eq!(CorrelationKey::new(0xB8).to_string(), "0x00B8");
    }

    #[test]
    fn key_roundtrips_item() {
        let key = CorrelationKey::from(0x0020);
        assert_eq!(key.item(), 0x0020);
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(SessionState::default(), SessionState::Disconnected);
        assert!(!SessionState::Disconnected.is_connected());
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::Streaming.is_connected());
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
    }
}
