//! Control channel adapter.
//!
//! [`ControlChannel`] turns the fire-and-forget [`ControlTransport`] into a
//! request/response API. Outbound commands are registered in the pending
//! table before they are sent; inbound frames arrive through the transport's
//! callback (on the transport's own task), are decoded, and complete the
//! matching request. Unsolicited notifications are forwarded to the session
//! event channel.
//!
//! The pending table sits behind a synchronous mutex because the inbound
//! callback is a plain `Fn`. It is only ever held for map operations, never
//! across an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;

use sdrctl_core::error::{Error, Result};
use sdrctl_core::events::SessionEvent;
use sdrctl_core::frame::{self, FrameKind};
use sdrctl_core::transport::{ControlTransport, InboundEvent, InboundHandler};

use crate::commands::{Command, Response};
use crate::pending::{PendingHandle, PendingRequests};

/// Read-only view of the control link's connectivity.
///
/// Cloned into the streaming coordinator so it can refuse to start the data
/// channel while no control session exists.
#[derive(Debug, Clone)]
pub struct LinkState(Arc<AtomicBool>);

impl LinkState {
    /// Whether the control channel is connected.
    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct ChannelShared {
    pending: Mutex<PendingRequests>,
    connected: Arc<AtomicBool>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ChannelShared {
    fn pending(&self) -> MutexGuard<'_, PendingRequests> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::Frame(bytes) => self.on_frame(&bytes),
            InboundEvent::Closed => self.on_closed(),
        }
    }

    fn on_frame(&self, bytes: &Bytes) {
        let frame = match frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "Dropping malformed inbound frame");
                return;
            }
        };

        match frame.kind {
            FrameKind::Response => {
                let key = frame.key;
                tracing::trace!(key = %key, status = frame.status, "Response received");
                if !self.pending().resolve(key, Response::from(frame)) {
                    tracing::warn!(key = %key, "Response for unknown or expired request");
                }
            }
            FrameKind::Notification => {
                tracing::debug!(key = %frame.key, len = frame.payload.len(), "Device notification");
                let _ = self.event_tx.send(SessionEvent::Notification {
                    key: frame.key,
                    payload: frame.payload,
                });
            }
            FrameKind::Command => {
                tracing::warn!(key = %frame.key, "Ignoring command frame sent by device");
            }
        }
    }

    /// Clear the connectivity flag and cancel every pending request.
    /// Returns whether the flag was set.
    fn abort(&self, reason: &'static str) -> bool {
        let mut pending = self.pending();
        let was_up = self.connected.swap(false, Ordering::SeqCst);
        let cancelled = pending.cancel_all(|| Error::ChannelClosed);
        if cancelled > 0 {
            tracing::debug!(cancelled, reason, "Cancelled pending requests");
        }
        was_up
    }

    fn on_closed(&self) {
        if self.abort("link loss") {
            tracing::warn!("Control link closed by device");
            let _ = self.event_tx.send(SessionEvent::ConnectionLost);
        }
    }
}

/// A registered request. Dropping it withdraws the registration, so an
/// abandoned `send_command` future does not leave its key occupied.
struct InFlight<'a> {
    shared: &'a ChannelShared,
    handle: PendingHandle,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.pending().withdraw(&self.handle);
    }
}

/// Request/response adapter over a [`ControlTransport`].
pub struct ControlChannel {
    transport: tokio::sync::Mutex<Box<dyn ControlTransport>>,
    shared: Arc<ChannelShared>,
    default_timeout: Duration,
}

impl ControlChannel {
    /// Wrap `transport`, registering this channel as its inbound handler.
    ///
    /// Notifications and link-loss events are published on `event_tx`.
    pub fn new(
        mut transport: Box<dyn ControlTransport>,
        event_tx: broadcast::Sender<SessionEvent>,
        default_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(ChannelShared {
            pending: Mutex::new(PendingRequests::new()),
            connected: Arc::new(AtomicBool::new(false)),
            event_tx,
        });

        let weak: Weak<ChannelShared> = Arc::downgrade(&shared);
        let handler: InboundHandler = Arc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_inbound(event);
            }
        });
        transport.set_inbound_handler(handler);

        ControlChannel {
            transport: tokio::sync::Mutex::new(transport),
            shared,
            default_timeout,
        }
    }

    /// Open the control link.
    ///
    /// The channel counts as up from the moment the transport starts
    /// connecting, so a hang-up reported while `connect()` is still running
    /// is not lost: the call then fails with [`Error::ChannelClosed`] and the
    /// transport is closed again. The same happens if
    /// [`abort_pending`](Self::abort_pending) runs meanwhile. Other transport
    /// failures are reported as [`Error::Connect`].
    pub async fn connect(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        self.shared.connected.store(true, Ordering::SeqCst);

        if let Err(e) = transport.connect().await {
            self.shared.abort("connect failure");
            return Err(match e {
                Error::Connect(msg) => Error::Connect(msg),
                other => Error::Connect(other.to_string()),
            });
        }

        if !self.shared.connected.load(Ordering::SeqCst) || !transport.is_connected() {
            self.shared.abort("hang-up during connect");
            if let Err(e) = transport.disconnect().await {
                tracing::warn!(error = %e, "Control transport disconnect failed");
            }
            tracing::debug!("Control link closed while connecting");
            return Err(Error::ChannelClosed);
        }

        tracing::debug!("Control channel connected");
        Ok(())
    }

    /// Close the control link.
    ///
    /// Every outstanding request fails with [`Error::ChannelClosed`]. Closing
    /// an already-closed channel is harmless; transport errors during close
    /// are logged and otherwise ignored.
    pub async fn disconnect(&self) {
        self.shared.abort("disconnect");

        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.disconnect().await {
            tracing::warn!(error = %e, "Control transport disconnect failed");
        }
        tracing::debug!("Control channel disconnected");
    }

    /// Mark the link down and fail every outstanding request with
    /// [`Error::ChannelClosed`], without waiting for the transport.
    ///
    /// The transport itself stays open until [`disconnect`](Self::disconnect).
    /// Returns whether the link was up.
    pub fn abort_pending(&self) -> bool {
        self.shared.abort("abort")
    }

    /// Whether the control link is open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// A clonable connectivity view for other components.
    pub fn link(&self) -> LinkState {
        LinkState(Arc::clone(&self.shared.connected))
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// The timeout used by [`send_command`](Self::send_command).
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `command` and await its response with the default timeout.
    pub async fn send_command(&self, command: &Command) -> Result<Response> {
        self.send_command_timeout(command, self.default_timeout).await
    }

    /// Send `command` and await its response for at most `timeout`.
    ///
    /// Fails with [`Error::NotConnected`] (nothing sent),
    /// [`Error::DuplicateKey`] (nothing sent), [`Error::Timeout`],
    /// [`Error::ChannelClosed`], a transport error, or [`Error::Device`] when
    /// the device answers with a non-zero status.
    pub async fn send_command_timeout(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response> {
        let encoded = command.encode()?;
        let key = command.key();
        let deadline = Instant::now() + timeout;

        let mut request = {
            let mut pending = self.shared.pending();
            if !self.shared.connected.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            InFlight {
                shared: &self.shared,
                handle: pending.register(key, deadline)?,
            }
        };

        tracing::trace!(key = %key, len = encoded.len(), "Sending command");
        let sent = {
            let mut transport = self.transport.lock().await;
            transport.send(&encoded).await
        };
        if let Err(e) = sent {
            tracing::debug!(key = %key, error = %e, "Command send failed");
            return Err(e);
        }

        let outcome = match tokio::time::timeout_at(deadline, &mut request.handle.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                // Expiry goes through the table so a response racing the
                // deadline cannot complete the request a second time.
                self.shared.pending().expire(Instant::now());
                match request.handle.rx.try_recv() {
                    Ok(result) => result,
                    Err(oneshot::error::TryRecvError::Empty) => Err(Error::Timeout),
                    Err(oneshot::error::TryRecvError::Closed) => Err(Error::ChannelClosed),
                }
            }
        };

        let response = outcome?;
        if response.status != frame::STATUS_OK {
            tracing::debug!(key = %key, status = response.status, "Device rejected command");
            return Err(Error::Device {
                key,
                status: response.status,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands;
    use sdrctl_core::frame::Frame;
    use sdrctl_core::types::CorrelationKey;
    use sdrctl_test_harness::{MockControlHandle, MockControlTransport};

    fn channel() -> (ControlChannel, MockControlHandle, broadcast::Receiver<SessionEvent>) {
        let mock = MockControlTransport::new();
        let device = mock.handle();
        let (event_tx, event_rx) = broadcast::channel(16);
        let channel = ControlChannel::new(Box::new(mock), event_tx, Duration::from_secs(2));
        (channel, device, event_rx)
    }

    async fn connected() -> (ControlChannel, MockControlHandle, broadcast::Receiver<SessionEvent>) {
        let (channel, device, rx) = channel();
        channel.connect().await.unwrap();
        (channel, device, rx)
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let (channel, device, _rx) = channel();
        let result = channel.send_command(&commands::request_target_name()).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(device.send_count(), 0);
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn command_round_trip() {
        let (channel, device, _rx) = connected().await;
        device.set_reply(commands::TARGET_NAME, b"NetSDR\0".to_vec());

        let response = channel
            .send_command(&commands::request_target_name())
            .await
            .unwrap();
        assert_eq!(response.key, CorrelationKey::new(commands::TARGET_NAME));
        assert_eq!(response.payload.as_ref(), b"NetSDR\0");
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn device_status_maps_to_error() {
        let (channel, device, _rx) = connected().await;
        device.set_status(commands::IQ_SAMPLE_RATE, 0x03);

        let result = channel.send_command(&commands::set_sample_rate(48_000)).await;
        assert!(matches!(
            result,
            Err(Error::Device { key, status: 0x03 }) if key.item() == commands::IQ_SAMPLE_RATE
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_command_times_out() {
        let (channel, device, _rx) = connected().await;
        device.mute(commands::RECEIVER_STATE);

        let result = channel
            .send_command_timeout(&commands::stop_acquisition(), Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_after_timeout_is_dropped() {
        let (channel, device, _rx) = connected().await;
        device.set_response_delay(Duration::from_millis(500));

        let result = channel
            .send_command_timeout(&commands::stop_acquisition(), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(channel.pending_count(), 0);

        // The key is free again.
        device.set_response_delay(Duration::ZERO);
        assert!(channel.send_command(&commands::stop_acquisition()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_in_flight_key_is_rejected() {
        let (channel, device, _rx) = connected().await;
        device.mute(commands::RECEIVER_STATE);
        let channel = Arc::new(channel);

        let first = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send_command(&commands::stop_acquisition()).await })
        };
        while channel.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let second = channel.send_command(&commands::stop_acquisition()).await;
        assert!(matches!(second, Err(Error::DuplicateKey(_))));
        assert_eq!(device.send_count(), 1);

        // The original request is unaffected and still times out on its own.
        assert!(matches!(first.await.unwrap(), Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn disconnect_cancels_in_flight_requests() {
        let (channel, device, _rx) = connected().await;
        device.mute(commands::RECEIVER_STATE);
        let channel = Arc::new(channel);

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send_command(&commands::stop_acquisition()).await })
        };
        while channel.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        channel.disconnect().await;
        assert!(matches!(waiter.await.unwrap(), Err(Error::ChannelClosed)));
        assert!(!channel.is_connected());
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn send_failure_withdraws_request() {
        let (channel, device, _rx) = connected().await;
        device.fail_send(true);

        let result = channel.send_command(&commands::stop_acquisition()).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn connect_failure_is_reported_as_connect_error() {
        let (channel, device, _rx) = channel();
        device.fail_connect(true);
        assert!(matches!(channel.connect().await, Err(Error::Connect(_))));
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn hang_up_during_connect_fails_the_connect() {
        let (channel, device, mut rx) = channel();
        device.close_on_connect(true);

        assert!(matches!(channel.connect().await, Err(Error::ChannelClosed)));
        assert!(!channel.is_connected());
        assert!(!channel.link().is_up());
        assert_eq!(device.disconnect_count(), 1);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::ConnectionLost);

        let result = channel.send_command(&commands::stop_acquisition()).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(device.send_count(), 0);

        device.close_on_connect(false);
        channel.connect().await.unwrap();
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn abort_pending_fails_requests_without_touching_transport() {
        let (channel, device, _rx) = connected().await;
        device.mute(commands::RECEIVER_STATE);
        let channel = Arc::new(channel);

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send_command(&commands::stop_acquisition()).await })
        };
        while channel.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(channel.abort_pending());
        assert!(matches!(waiter.await.unwrap(), Err(Error::ChannelClosed)));
        assert!(!channel.is_connected());
        assert_eq!(device.disconnect_count(), 0);
        assert!(device.is_connected());

        assert!(!channel.abort_pending());
        channel.disconnect().await;
        assert!(!device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_request_frees_its_key() {
        let (channel, device, _rx) = connected().await;
        device.mute(commands::RECEIVER_STATE);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            channel.send_command(&commands::stop_acquisition()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(channel.pending_count(), 0);

        device.unmute(commands::RECEIVER_STATE);
        assert!(channel.send_command(&commands::stop_acquisition()).await.is_ok());
    }

    #[tokio::test]
    async fn notification_is_broadcast() {
        let (channel, device, mut rx) = connected().await;
        let bytes = Frame::notification(CorrelationKey::new(0x0005), vec![0x01])
            .encode()
            .unwrap();
        assert!(device.inject(bytes));

        match rx.recv().await.unwrap() {
            SessionEvent::Notification { key, payload } => {
                assert_eq!(key.item(), 0x0005);
                assert_eq!(payload.as_ref(), &[0x01]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn malformed_and_unmatched_frames_are_ignored() {
        let (channel, device, _rx) = connected().await;
        device.inject(vec![0x02, 0x00]);
        device.inject(
            Frame::response(CorrelationKey::new(0x0042), Bytes::new())
                .encode()
                .unwrap(),
        );

        assert!(channel.is_connected());
        assert!(channel.send_command(&commands::stop_acquisition()).await.is_ok());
    }

    #[tokio::test]
    async fn link_loss_clears_flag_and_emits_event() {
        let (channel, device, mut rx) = connected().await;
        let link = channel.link();
        assert!(link.is_up());

        device.drop_link();
        assert!(!channel.is_connected());
        assert!(!link.is_up());
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::ConnectionLost);

        let result = channel.send_command(&commands::stop_acquisition()).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn closed_event_after_disconnect_is_silent() {
        let (channel, device, mut rx) = connected().await;
        channel.disconnect().await;
        device.drop_link();
        assert!(rx.try_recv().is_err());
    }
}
