//! sdrctl-test-harness: Mock transports for testing sdrctl.
//!
//! This crate provides [`MockControlTransport`], a scripted device behind the
//! control channel seam, and [`MockDataTransport`], a data channel that only
//! counts start/stop calls. Both hand out cloneable handles so tests can keep
//! scripting and inspecting them after the mocks are moved into a session
//! controller. A shared [`Timeline`] records the relative order of calls
//! across both mocks.

pub mod mock_control;
pub mod mock_data;
pub mod timeline;

pub use mock_control::{ControlCall, MockControlHandle, MockControlTransport};
pub use mock_data::{MockDataHandle, MockDataTransport};
pub use timeline::Timeline;
