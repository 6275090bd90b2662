//! SessionBuilder -- fluent builder for [`SessionController`] instances.
//!
//! Collects network parameters and session options, then creates the TCP
//! control transport and UDP data transport. Building does not touch the
//! network; call [`SessionController::connect`] afterwards.
//!
//! # Example
//!
//! ```no_run
//! use sdrctl_session::SessionBuilder;
//!
//! # async fn example() -> sdrctl_core::Result<()> {
//! let session = SessionBuilder::new()
//!     .host("192.168.1.50")
//!     .center_frequency(7_100_000)
//!     .build()?;
//! session.connect().await?;
//! session.start_acquisition().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use sdrctl_core::error::{Error, Result};
use sdrctl_core::transport::{ControlTransport, DataTransport};
use sdrctl_transport::{TcpControlTransport, UdpDataTransport};

use crate::commands::CaptureMode;
use crate::controller::SessionController;
use crate::options::SessionOptions;

/// Default TCP control port.
pub const DEFAULT_CONTROL_PORT: u16 = 50000;

/// Default UDP data port.
pub const DEFAULT_DATA_PORT: u16 = 50000;

/// Default TCP connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fluent builder for [`SessionController`].
pub struct SessionBuilder {
    host: Option<String>,
    control_port: u16,
    data_port: u16,
    connect_timeout: Duration,
    iq_sink: Option<mpsc::Sender<Bytes>>,
    options: SessionOptions,
}

impl SessionBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        SessionBuilder {
            host: None,
            control_port: DEFAULT_CONTROL_PORT,
            data_port: DEFAULT_DATA_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            iq_sink: None,
            options: SessionOptions::default(),
        }
    }

    /// Set the device's IP address or hostname.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the TCP control port (default: 50000).
    pub fn control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    /// Set the local UDP port IQ datagrams arrive on (default: 50000).
    pub fn data_port(mut self, port: u16) -> Self {
        self.data_port = port;
        self
    }

    /// Set the TCP connect timeout (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Forward received IQ datagrams to `sink`.
    ///
    /// Without a sink, datagrams are counted and discarded.
    pub fn iq_sink(mut self, sink: mpsc::Sender<Bytes>) -> Self {
        self.iq_sink = Some(sink);
        self
    }

    /// Set the command response timeout (default: 2s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = timeout;
        self
    }

    /// Set the per-command timeout of the connect-time initialization (default: 2s).
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.options.init_timeout = timeout;
        self
    }

    /// Set the center frequency programmed on connect (default: 14.1 MHz).
    pub fn center_frequency(mut self, freq_hz: u64) -> Self {
        self.options.center_frequency_hz = freq_hz;
        self
    }

    /// Set the IQ output rate programmed on connect (default: 2.048 MS/s).
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.options.sample_rate = rate;
        self
    }

    /// Set the IQ sample format (default: 24-bit).
    pub fn capture_mode(mut self, mode: CaptureMode) -> Self {
        self.options.capture_mode = mode;
        self
    }

    /// Replace all session options at once.
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Create the network transports and build a disconnected controller.
    ///
    /// Requires that [`host()`](Self::host) has been called.
    pub fn build(self) -> Result<SessionController> {
        let host = self.host.as_ref().ok_or_else(|| {
            Error::InvalidParameter("host is required: call .host() before .build()".into())
        })?;

        let control_addr = format!("{}:{}", host, self.control_port);
        let control = TcpControlTransport::with_timeout(&control_addr, self.connect_timeout);

        let bind_addr = format!("0.0.0.0:{}", self.data_port);
        let mut data = UdpDataTransport::new(&bind_addr);
        if let Some(sink) = self.iq_sink {
            data = data.with_sink(sink);
        }

        tracing::debug!(control = %control_addr, data = %bind_addr, "Building session");
        SessionController::new(Box::new(control), Box::new(data), self.options)
    }

    /// Build a controller over caller-supplied transports.
    ///
    /// Network settings are ignored. This is the entry point for tests and
    /// for custom transports.
    pub fn build_with_transports(
        self,
        control: Box<dyn ControlTransport>,
        data: Box<dyn DataTransport>,
    ) -> Result<SessionController> {
        SessionController::new(control, data, self.options)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
