//! Asynchronous session event types.
//!
//! Events are emitted by the session controller through a
//! `tokio::sync::broadcast` channel. Subscribers see lifecycle changes and
//! unsolicited device notifications without polling.

use bytes::Bytes;

use crate::types::CorrelationKey;

/// An event emitted by the session controller.
///
/// Delivery is best-effort through a bounded broadcast channel; slow
/// consumers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The control session was established and initialized.
    Connected,

    /// The control session was closed by the caller.
    Disconnected,

    /// The control transport closed underneath an established session.
    ConnectionLost,

    /// IQ acquisition started; the data channel is receiving.
    AcquisitionStarted,

    /// IQ acquisition stopped; the data channel is idle.
    AcquisitionStopped,

    /// The device sent an unsolicited notification frame.
    Notification {
        /// Control item the notification refers to.
        key: CorrelationKey,
        /// Raw notification payload.
        payload: Bytes,
    },
}
