//! UDP data transport for IQ sample streams.
//!
//! [`UdpDataTransport`] implements [`DataTransport`]. Starting it binds a UDP
//! socket and spawns a receive loop that forwards every datagram to an
//! optional `mpsc` sink; stopping it cancels the loop and releases the port.
//! The transport never interprets datagram contents.
//!
//! # Example
//!
//! ```no_run
//! use sdrctl_core::DataTransport;
//! use sdrctl_transport::UdpDataTransport;
//!
//! # async fn example() -> sdrctl_core::Result<()> {
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! let mut transport = UdpDataTransport::new("0.0.0.0:50000").with_sink(tx);
//! transport.start_receiving().await?;
//! while let Some(datagram) = rx.recv().await {
//!     println!("{} bytes of IQ data", datagram.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sdrctl_core::error::{Error, Result};
use sdrctl_core::transport::DataTransport;

/// Receive buffer size. Large enough for any IQ datagram the devices emit.
const RECV_BUF_SIZE: usize = 8192;

/// Datagram counters shared between the receive loop and observers.
#[derive(Debug, Default)]
pub struct DatagramCounters {
    received: AtomicU64,
    dropped: AtomicU64,
    bytes: AtomicU64,
}

impl DatagramCounters {
    /// Datagrams received since the transport was created.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Datagrams discarded because the sink was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total payload bytes received.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// UDP implementation of [`DataTransport`].
pub struct UdpDataTransport {
    /// Local address to bind when receiving starts.
    bind_addr: String,
    /// Where received datagrams go. `None` counts and discards.
    sink: Option<mpsc::Sender<Bytes>>,
    /// Receive loop handle while running.
    task: Option<JoinHandle<()>>,
    /// Cancels the receive loop.
    cancel: Option<CancellationToken>,
    /// Address actually bound by the running loop.
    local_addr: Option<SocketAddr>,
    counters: Arc<DatagramCounters>,
}

impl UdpDataTransport {
    /// Create a transport that binds `bind_addr` (e.g. `"0.0.0.0:50000"`) on start.
    pub fn new(bind_addr: &str) -> Self {
        UdpDataTransport {
            bind_addr: bind_addr.to_string(),
            sink: None,
            task: None,
            cancel: None,
            local_addr: None,
            counters: Arc::new(DatagramCounters::default()),
        }
    }

    /// Forward received datagrams to `sink`.
    ///
    /// The receive loop uses `try_send`: when the consumer falls behind,
    /// datagrams are dropped and counted rather than stalling the socket.
    pub fn with_sink(mut self, sink: mpsc::Sender<Bytes>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Shared datagram counters. Remains valid after the transport is boxed.
    pub fn counters(&self) -> Arc<DatagramCounters> {
        Arc::clone(&self.counters)
    }

    /// The bound local address while receiving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether the receive loop is running.
    pub fn is_receiving(&self) -> bool {
        self.task.is_some()
    }

    async fn halt(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.local_addr = None;
    }
}

#[async_trait]
impl DataTransport for UdpDataTransport {
    async fn start_receiving(&mut self) -> Result<()> {
        if self.task.is_some() {
            tracing::debug!(addr = %self.bind_addr, "Receive loop already running; restarting");
            self.halt().await;
        }

        let socket = UdpSocket::bind(&self.bind_addr).await.map_err(|e| {
            tracing::error!(addr = %self.bind_addr, error = %e, "Failed to bind UDP socket");
            Error::Stream(format!("failed to bind {}: {}", self.bind_addr, e))
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::Stream(format!("failed to read local address: {}", e)))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv_loop(
            socket,
            self.sink.clone(),
            Arc::clone(&self.counters),
            cancel.clone(),
        ));

        self.task = Some(task);
        self.cancel = Some(cancel);
        self.local_addr = Some(local_addr);

        tracing::debug!(local_addr = %local_addr, "IQ receive loop started");
        Ok(())
    }

    async fn stop_receiving(&mut self) -> Result<()> {
        if self.task.is_none() {
            return Ok(());
        }
        self.halt().await;
        tracing::debug!(
            addr = %self.bind_addr,
            received = self.counters.received(),
            dropped = self.counters.dropped(),
            "IQ receive loop stopped"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

/// Background task that receives datagrams until cancelled.
async fn recv_loop(
    socket: UdpSocket,
    sink: Option<mpsc::Sender<Bytes>>,
    counters: Arc<DatagramCounters>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = socket.recv(&mut buf) => result,
        };

        match result {
            Ok(n) => {
                counters.received.fetch_add(1, Ordering::Relaxed);
                counters.bytes.fetch_add(n as u64, Ordering::Relaxed);

                if let Some(sink) = &sink {
                    if sink.try_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(bytes = n, "IQ datagram dropped (consumer too slow)");
                    }
                }
            }
            Err(e) => {
                // Non-fatal for UDP (e.g. ICMP port unreachable); keep going.
                tracing::trace!(error = %e, "UDP recv error");
            }
        }
    }
}
