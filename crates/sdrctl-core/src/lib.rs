//! sdrctl-core: Core traits, types, and error definitions for sdrctl.
//!
//! This crate defines the pieces shared by every other sdrctl crate: the
//! control frame codec, the transport seams the session controller drives,
//! and the error and event types callers observe. Applications that only
//! need to implement a custom transport depend on this crate alone.
//!
//! # Key types
//!
//! - [`Frame`] -- the self-describing control channel envelope
//! - [`ControlTransport`] / [`DataTransport`] -- external link collaborators
//! - [`SessionEvent`] -- asynchronous session notifications
//! - [`SessionState`] -- `Disconnected`, `Connected`, or `Streaming`
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod frame;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::SessionEvent;
pub use frame::{Frame, FrameKind};
pub use transport::{ControlTransport, DataTransport, InboundEvent, InboundHandler};
pub use types::{CorrelationKey, SessionState};
