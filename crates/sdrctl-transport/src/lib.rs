//! Transport implementations for sdrctl.
//!
//! This crate provides the concrete link collaborators the session
//! controller drives:
//!
//! - [`TcpControlTransport`]: the reliable control channel. Implements
//!   [`ControlTransport`](sdrctl_core::ControlTransport), delimiting inbound
//!   frames by their length prefix.
//! - [`UdpDataTransport`]: the unreliable IQ data channel. Implements
//!   [`DataTransport`](sdrctl_core::DataTransport) as a cancellable receive
//!   loop feeding an `mpsc` sink.

pub mod tcp;
pub mod udp;

pub use tcp::TcpControlTransport;
pub use udp::{DatagramCounters, UdpDataTransport};
