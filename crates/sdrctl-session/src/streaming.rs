//! Streaming coordinator.
//!
//! Gates the data transport's receive loop on control connectivity. The
//! coordinator never starts the data channel while the control link is down,
//! and tracks whether it believes the receive loop is running so that
//! teardown can stop it exactly when needed.

use sdrctl_core::error::{Error, Result};
use sdrctl_core::transport::DataTransport;

use crate::control::LinkState;

/// Owns the data transport and its streaming flag.
pub struct StreamingCoordinator {
    transport: Box<dyn DataTransport>,
    link: LinkState,
    streaming: bool,
}

impl StreamingCoordinator {
    /// Wrap a data transport, gating every start on `link` being up.
    ///
    /// The coordinator starts idle.
    pub fn new(transport: Box<dyn DataTransport>, link: LinkState) -> Self {
        StreamingCoordinator {
            transport,
            link,
            streaming: false,
        }
    }

    /// Start the data channel's receive loop.
    ///
    /// Fails with [`Error::NotConnected`] without touching the data transport
    /// if the control link is down. Calling this while already streaming
    /// re-invokes the transport's start.
    pub async fn start(&mut self) -> Result<()> {
        if !self.link.is_up() {
            return Err(Error::NotConnected);
        }

        self.transport.start_receiving().await.map_err(stream_error)?;
        self.streaming = true;
        tracing::debug!("Data channel receiving");
        Ok(())
    }

    /// Stop the receive loop if it is running.
    ///
    /// On failure the coordinator still believes it is streaming, so the
    /// stop can be retried.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }

        self.transport.stop_receiving().await.map_err(stream_error)?;
        self.streaming = false;
        tracing::debug!("Data channel stopped");
        Ok(())
    }

    /// Stop the receive loop during teardown.
    ///
    /// Always leaves the coordinator idle. Stop failures are logged.
    pub async fn force_stop(&mut self) {
        if !self.streaming {
            return;
        }
        if let Err(e) = self.transport.stop_receiving().await {
            tracing::warn!(error = %e, "Data channel stop failed during teardown");
        }
        self.streaming = false;
    }

    /// Whether the receive loop is believed to be running.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

fn stream_error(e: Error) -> Error {
    match e {
        Error::Stream(msg) => Error::Stream(msg),
        other => Error::Stream(other.to_string()),
    }
}
