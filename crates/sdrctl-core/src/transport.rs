//! Transport traits for device communication.
//!
//! An SDR appliance is reached over two links with very different contracts:
//!
//! - a reliable, connection-oriented **control** link ([`ControlTransport`])
//!   that carries command frames out and pushes inbound frames back through
//!   a registered callback, and
//! - an unreliable **data** link ([`DataTransport`]) whose receive loop is
//!   only started and stopped by the controller. Sample delivery happens
//!   elsewhere.
//!
//! Concrete TCP/UDP implementations live in `sdrctl-transport`; scripted
//! mocks live in `sdrctl-test-harness`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Something the control transport observed on the inbound side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// One complete inbound message, exactly as received.
    Frame(Bytes),
    /// The link closed (remote EOF or read error). No more frames follow.
    Closed,
}

/// Callback invoked by a control transport for every [`InboundEvent`].
///
/// Called from the transport's own read task, concurrently with callers
/// sending commands. Implementations must not block.
pub type InboundHandler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// Reliable, connection-oriented control link to a device.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Open the link.
    ///
    /// Calling `connect` while already connected re-invokes the underlying
    /// connect; whether that is a no-op is up to the implementation.
    async fn connect(&mut self) -> Result<()>;

    /// Close the link. Closing an already-closed link must succeed.
    async fn disconnect(&mut self) -> Result<()>;

    /// Hand raw bytes to the link.
    ///
    /// Fire-and-forget: success means the bytes were written, not that the
    /// device received them.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Whether the link is currently open.
    fn is_connected(&self) -> bool;

    /// Register the callback that receives inbound traffic.
    ///
    /// Replaces any previously registered handler. Must be called before
    /// [`connect`](ControlTransport::connect) to avoid missing frames.
    fn set_inbound_handler(&mut self, handler: InboundHandler);
}

/// Unreliable datagram link that carries IQ samples once acquisition runs.
#[async_trait]
pub trait DataTransport: Send + Sync {
    /// Start the receive loop.
    async fn start_receiving(&mut self) -> Result<()>;

    /// Stop the receive loop.
    async fn stop_receiving(&mut self) -> Result<()>;
}
