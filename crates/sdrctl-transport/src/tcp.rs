//! TCP control transport.
//!
//! [`TcpControlTransport`] implements [`ControlTransport`] for devices that
//! expose their control channel on a TCP port. A background read task splits
//! the byte stream into frames using the length prefix of the frame header
//! and pushes each one to the registered [`InboundHandler`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sdrctl_core::{ControlTransport, InboundEvent};
//! use sdrctl_transport::TcpControlTransport;
//!
//! # async fn example() -> sdrctl_core::Result<()> {
//! let mut transport = TcpControlTransport::new("192.168.1.50:50000");
//! transport.set_inbound_handler(Arc::new(|event: InboundEvent| {
//!     println!("inbound: {:?}", event);
//! }));
//! transport.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sdrctl_core::error::{Error, Result};
use sdrctl_core::frame;
use sdrctl_core::transport::{ControlTransport, InboundEvent, InboundHandler};

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Length of the frame length prefix.
const LEN_PREFIX: usize = 2;

/// TCP implementation of [`ControlTransport`].
///
/// The connection is opened lazily by [`connect`](ControlTransport::connect)
/// and can be closed and reopened any number of times.
pub struct TcpControlTransport {
    /// Remote `host:port`.
    addr: String,
    /// Maximum time to wait for the TCP handshake.
    connect_timeout: Duration,
    /// Write half of the open connection, `None` while closed.
    writer: Option<OwnedWriteHalf>,
    /// Background read task for the open connection.
    read_task: Option<JoinHandle<()>>,
    /// Cancels the read task on caller-initiated disconnect.
    cancel: Option<CancellationToken>,
    /// Cleared by `disconnect()` or by the read task when the peer goes away.
    connected: Arc<AtomicBool>,
    /// Receives inbound frames and the close notification.
    handler: Option<InboundHandler>,
}

impl TcpControlTransport {
    /// Create a transport for `addr` using the default connect timeout.
    pub fn new(addr: &str) -> Self {
        Self::with_timeout(addr, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a transport for `addr` with a custom connect timeout.
    pub fn with_timeout(addr: &str, connect_timeout: Duration) -> Self {
        TcpControlTransport {
            addr: addr.to_string(),
            connect_timeout,
            writer: None,
            read_task: None,
            cancel: None,
            connected: Arc::new(AtomicBool::new(false)),
            handler: None,
        }
    }

    /// The remote address this transport connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Tear down the current connection, if any, without notifying the handler.
    async fn close_link(&mut self) {
        self.connected.store(false, Ordering::SeqCst);

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.read_task.take() {
            let _ = task.await;
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(addr = %self.addr, error = %e, "TCP shutdown failed (ignored)");
            }
        }
    }
}

#[async_trait]
impl ControlTransport for TcpControlTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.writer.is_some() {
            tracing::debug!(addr = %self.addr, "Already connected; reopening TCP link");
            self.close_link().await;
        }

        tracing::debug!(
            addr = %self.addr,
            timeout_ms = self.connect_timeout.as_millis(),
            "Connecting control channel"
        );

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %self.addr, "TCP connection timed out");
                Error::Connect(format!("timed out connecting to {}", self.addr))
            })?
            .map_err(|e| {
                tracing::error!(addr = %self.addr, error = %e, "TCP connection failed");
                Error::Connect(format!("{}: {}", self.addr, e))
            })?;

        // Control frames are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %self.addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        let (reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);

        let task = tokio::spawn(read_loop(
            reader,
            self.handler.clone(),
            Arc::clone(&self.connected),
            cancel.clone(),
            self.addr.clone(),
        ));

        self.writer = Some(writer);
        self.read_task = Some(task);
        self.cancel = Some(cancel);

        tracing::info!(addr = %self.addr, "Control channel connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.writer.is_none() && self.read_task.is_none() {
            return Ok(());
        }
        self.close_link().await;
        tracing::debug!(addr = %self.addr, "Control channel closed");
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(addr = %self.addr, bytes = data.len(), "Sending control frame");

        writer
            .write_all(data)
            .await
            .map_err(|e| Error::Transport(format!("failed to send frame: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("failed to flush frame: {}", e)))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_inbound_handler(&mut self, handler: InboundHandler) {
        self.handler = Some(handler);
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

/// Background task that delimits inbound frames and dispatches them.
async fn read_loop(
    mut reader: OwnedReadHalf,
    handler: Option<InboundHandler>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    addr: String,
) {
    loop {
        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::trace!(addr = %addr, "Control read loop cancelled");
                return;
            }

            result = read_frame(&mut reader) => result,
        };

        match result {
            Ok(bytes) => {
                tracing::trace!(addr = %addr, bytes = bytes.len(), "Received control frame");
                if let Some(handler) = &handler {
                    handler(InboundEvent::Frame(bytes));
                }
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    return;
                }
                tracing::debug!(addr = %addr, error = %e, "Control channel closed by peer");
                connected.store(false, Ordering::SeqCst);
                if let Some(handler) = &handler {
                    handler(InboundEvent::Closed);
                }
                return;
            }
        }
    }
}

/// Read one length-prefixed frame, header included.
async fn read_frame(reader: &mut OwnedReadHalf) -> std::io::Result<Bytes> {
    let mut prefix = [0u8; LEN_PREFIX];
    reader.read_exact(&mut prefix).await?;

    let len = frame::frame_len(&prefix).unwrap_or(0);
    if len < LEN_PREFIX {
        // A length this small cannot be skipped, so the stream cannot resync.
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length prefix {} is unusable", len),
        ));
    }
    if len > frame::MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "frame length prefix {} exceeds maximum of {}",
                len,
                frame::MAX_FRAME_SIZE
            ),
        ));
    }

    let mut buf = vec![0u8; len];
    buf[..LEN_PREFIX].copy_from_slice(&prefix);
    reader.read_exact(&mut buf[LEN_PREFIX..]).await?;
    Ok(Bytes::from(buf))
}
