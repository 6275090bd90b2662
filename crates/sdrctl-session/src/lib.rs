//! Session controller for network SDR receivers.
//!
//! This crate bridges a push-style control transport into an awaitable
//! request/response API and ties the IQ data channel's lifecycle to the
//! control session. It provides:
//!
//! - **Commands** ([`commands`]) -- the control items needed to identify the
//!   device, configure IQ output, and run or stop the receiver.
//! - **Pending-request table** ([`pending`]) -- in-flight commands keyed by
//!   control item, each completed exactly once.
//! - **Control channel** ([`control`]) -- send a command, await its response,
//!   time out, or fail fast when the link goes away.
//! - **Streaming coordinator** ([`streaming`]) -- refuses to start the data
//!   channel without a control session.
//! - **SessionController** ([`controller`]) -- the
//!   `Disconnected`/`Connected`/`Streaming` state machine.
//! - **SessionBuilder** ([`builder`]) -- fluent construction over TCP/UDP
//!   or caller-supplied transports.
//!
//! # Example
//!
//! ```no_run
//! use sdrctl_session::SessionBuilder;
//!
//! # async fn example() -> sdrctl_core::Result<()> {
//! let session = SessionBuilder::new().host("192.168.1.50").build()?;
//! session.connect().await?;
//! if let Some(info) = session.device_info().await {
//!     println!("connected to {}", info.name);
//! }
//! session.start_acquisition().await?;
//! // ... consume IQ datagrams ...
//! session.stop_acquisition().await?;
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod commands;
pub mod control;
pub mod controller;
pub mod options;
pub mod pending;
pub mod streaming;

pub use builder::SessionBuilder;
pub use commands::{CaptureMode, Command, DeviceInfo, Response};
pub use control::{ControlChannel, LinkState};
pub use controller::SessionController;
pub use options::SessionOptions;
pub use pending::{PendingHandle, PendingRequests};
pub use streaming::StreamingCoordinator;
