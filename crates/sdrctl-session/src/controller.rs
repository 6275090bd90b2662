//! Session controller.
//!
//! [`SessionController`] is the public entry point. It owns the control
//! channel adapter and the streaming coordinator and runs the session state
//! machine:
//!
//! ```text
//!                connect                    start_acquisition
//! Disconnected ─────────────▶ Connected ─────────────────────▶ Streaming
//!      ▲                      │    ▲                               │
//!      │        disconnect    │    └───────────────────────────────┘
//!      └──────────────────────┘           stop_acquisition
//!      ▲                                                           │
//!      └───────────────────────────────────────────────────────────┘
//!                 disconnect (data channel stopped first)
//! ```
//!
//! Every transition runs under one async lock, so concurrent callers are
//! serialized and observe each other's results. Commands issued through
//! [`send_command`](SessionController::send_command) do not take that lock;
//! they only need the control link to be up.
//!
//! If the control link drops underneath a session, a background watcher
//! tears the session down (data channel first) and the controller reports
//! `Disconnected`. Every transition also reconciles on entry, so the
//! teardown happens even if the watcher has not run yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};

use sdrctl_core::error::{Error, Result};
use sdrctl_core::events::SessionEvent;
use sdrctl_core::transport::{ControlTransport, DataTransport};
use sdrctl_core::types::SessionState;

use crate::commands::{self, Command, DeviceInfo, Response};
use crate::control::ControlChannel;
use crate::options::SessionOptions;
use crate::streaming::StreamingCoordinator;

/// Broadcast channel capacity for session event subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    state: SessionState,
    streaming: StreamingCoordinator,
    device_info: Option<DeviceInfo>,
}

struct Core {
    control: ControlChannel,
    inner: Mutex<Inner>,
    options: SessionOptions,
    event_tx: broadcast::Sender<SessionEvent>,
}

/// Controller for one SDR device session.
///
/// Safe to share across tasks behind an `Arc`.
pub struct SessionController {
    core: Arc<Core>,
    watcher_started: AtomicBool,
}

impl SessionController {
    /// Create a controller over the given transports, in `Disconnected`.
    ///
    /// Fails with [`Error::InvalidParameter`] if `options` do not validate.
    pub fn new(
        control: Box<dyn ControlTransport>,
        data: Box<dyn DataTransport>,
        options: SessionOptions,
    ) -> Result<Self> {
        options.validate()?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let control = ControlChannel::new(control, event_tx.clone(), options.command_timeout);
        let streaming = StreamingCoordinator::new(data, control.link());

        Ok(SessionController {
            core: Arc::new(Core {
                control,
                inner: Mutex::new(Inner {
                    state: SessionState::Disconnected,
                    streaming,
                    device_info: None,
                }),
                options,
                event_tx,
            }),
            watcher_started: AtomicBool::new(false),
        })
    }

    /// Connect to the device and run the initialization sequence.
    ///
    /// The initialization commands are sent one at a time, each awaited
    /// before the next. If any of them fails the control link is closed
    /// again and the controller stays `Disconnected`. Connecting while
    /// already connected does nothing.
    ///
    /// A link left open by an earlier connect that was abandoned mid-way is
    /// closed before the new attempt.
    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.core.inner.lock().await;
        self.core.reconcile(&mut inner).await;
        if inner.state.is_connected() {
            tracing::debug!(state = %inner.state, "Already connected");
            return Ok(());
        }

        let init = commands::init_sequence(&self.core.options)?;

        if self.core.control.is_connected() || self.core.control.pending_count() > 0 {
            tracing::debug!("Closing stale control link before connecting");
            self.core.control.disconnect().await;
        }

        tracing::debug!("Connecting session");
        self.ensure_watcher();
        self.core.control.connect().await?;

        let mut device_info = None;
        for command in &init {
            let result = self
                .core
                .control
                .send_command_timeout(command, self.core.options.init_timeout)
                .await;
            match result {
                Ok(response) => {
                    if command.key().item() == commands::TARGET_NAME {
                        device_info = Some(DeviceInfo::from_payload(&response.payload));
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %command.key(), error = %e, "Initialization failed");
                    self.core.control.disconnect().await;
                    return Err(e);
                }
            }
        }

        if let Some(info) = &device_info {
            tracing::info!(device = %info.name, "Session connected");
        }
        inner.device_info = device_info;
        inner.state = SessionState::Connected;
        self.core.emit(SessionEvent::Connected);
        Ok(())
    }

    /// Close the session.
    ///
    /// In-flight commands fail with [`Error::ChannelClosed`] right away, so
    /// a transition blocked on one of them (a connect still initializing, a
    /// start awaiting its run command) gives way promptly. Then the data
    /// channel is stopped and the control link closed, in that order.
    ///
    /// Never fails. The data and control channels are closed whatever the
    /// recorded state, so a link left open by an abandoned connect is
    /// released too. [`SessionEvent::Disconnected`] is emitted only if a
    /// session or link was actually closed.
    pub async fn disconnect(&self) {
        let link_was_up = self.core.control.abort_pending();

        let mut inner = self.core.inner.lock().await;
        let had_session = inner.state != SessionState::Disconnected;
        self.core.teardown(&mut inner).await;

        if had_session || link_was_up {
            tracing::info!("Session disconnected");
            self.core.emit(SessionEvent::Disconnected);
        }
    }

    /// Start IQ acquisition.
    ///
    /// Sends the receiver-state run command, then starts the data channel.
    /// Fails with [`Error::NotConnected`] (without touching the data channel)
    /// when there is no session. Starting while streaming does nothing.
    ///
    /// If the data channel fails to start, the receiver is told to stop
    /// again and the controller stays `Connected`.
    pub async fn start_acquisition(&self) -> Result<()> {
        let mut inner = self.core.inner.lock().await;
        self.core.reconcile(&mut inner).await;

        match inner.state {
            SessionState::Disconnected => return Err(Error::NotConnected),
            SessionState::Streaming => return Ok(()),
            SessionState::Connected => {}
        }

        let start = commands::start_acquisition(self.core.options.capture_mode);
        if let Err(e) = self.core.control.send_command(&start).await {
            self.core.reconcile(&mut inner).await;
            return Err(e);
        }

        if let Err(e) = inner.streaming.start().await {
            tracing::warn!(error = %e, "Data channel failed to start, stopping receiver");
            if let Err(stop_err) = self
                .core
                .control
                .send_command(&commands::stop_acquisition())
                .await
            {
                tracing::warn!(error = %stop_err, "Receiver stop after failed start also failed");
            }
            self.core.reconcile(&mut inner).await;
            return Err(e);
        }

        inner.state = SessionState::Streaming;
        tracing::info!(
            sample_rate = self.core.options.sample_rate,
            frequency = self.core.options.center_frequency_hz,
            "Acquisition started"
        );
        self.core.emit(SessionEvent::AcquisitionStarted);
        Ok(())
    }

    /// Stop IQ acquisition.
    ///
    /// Stops the data channel, then sends the receiver-state stop command.
    /// Stopping when not streaming does nothing and succeeds.
    ///
    /// If the data channel fails to stop, the controller stays `Streaming`
    /// and the error is returned. If only the stop command fails, the
    /// controller still moves to `Connected` and the command error is
    /// returned.
    pub async fn stop_acquisition(&self) -> Result<()> {
        let mut inner = self.core.inner.lock().await;
        self.core.reconcile(&mut inner).await;
        if inner.state != SessionState::Streaming {
            return Ok(());
        }

        inner.streaming.stop().await?;
        inner.state = SessionState::Connected;
        self.core.emit(SessionEvent::AcquisitionStopped);

        let result = self
            .core
            .control
            .send_command(&commands::stop_acquisition())
            .await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Receiver stop command failed");
            self.core.reconcile(&mut inner).await;
        } else {
            tracing::info!("Acquisition stopped");
        }
        result.map(|_| ())
    }

    /// Send an arbitrary command with the configured command timeout.
    pub async fn send_command(&self, command: &Command) -> Result<Response> {
        self.core.control.send_command(command).await
    }

    /// Send an arbitrary command with an explicit timeout.
    pub async fn send_command_timeout(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response> {
        self.core.control.send_command_timeout(command, timeout).await
    }

    /// Retune the receiver.
    pub async fn set_frequency(&self, freq_hz: u64) -> Result<()> {
        let command = commands::set_frequency(freq_hz)?;
        self.core.control.send_command(&command).await?;
        tracing::debug!(frequency = freq_hz, "Receiver tuned");
        Ok(())
    }

    /// Current session state, after accounting for a lost control link.
    pub async fn state(&self) -> SessionState {
        let mut inner = self.core.inner.lock().await;
        self.core.reconcile(&mut inner).await;
        inner.state
    }

    /// Identification captured during the last successful connect.
    pub async fn device_info(&self) -> Option<DeviceInfo> {
        self.core.inner.lock().await.device_info.clone()
    }

    /// Whether the control link is currently up.
    pub fn is_connected(&self) -> bool {
        self.core.control.is_connected()
    }

    /// The options this controller was built with.
    pub fn options(&self) -> &SessionOptions {
        &self.core.options
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.event_tx.subscribe()
    }

    /// Spawn the link-loss watcher the first time a connect is attempted.
    fn ensure_watcher(&self) {
        if self.watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let rx = self.core.event_tx.subscribe();
        let core = Arc::downgrade(&self.core);
        tokio::spawn(watch_link(core, rx));
    }
}

impl Core {
    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Tear the session down if the control link dropped underneath it.
    async fn reconcile(&self, inner: &mut Inner) {
        if inner.state.is_connected() && !self.control.is_connected() {
            tracing::warn!(state = %inner.state, "Control link lost, tearing down session");
            self.teardown(inner).await;
        }
    }

    /// Stop the data channel, then close the control channel.
    async fn teardown(&self, inner: &mut Inner) {
        let was_streaming = inner.state == SessionState::Streaming;
        inner.streaming.force_stop().await;
        self.control.disconnect().await;
        inner.state = SessionState::Disconnected;
        inner.device_info = None;
        if was_streaming {
            self.emit(SessionEvent::AcquisitionStopped);
        }
    }
}

/// Reconcile the session whenever the control channel reports link loss.
///
/// Exits once the controller is dropped.
async fn watch_link(core: Weak<Core>, mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::ConnectionLost) | Err(broadcast::error::RecvError::Lagged(_)) => {
                let Some(core) = core.upgrade() else {
                    return;
                };
                let mut inner = core.inner.lock().await;
                core.reconcile(&mut inner).await;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrctl_test_harness::{
        MockControlHandle, MockControlTransport, MockDataHandle, MockDataTransport,
    };

    fn controller() -> (SessionController, MockControlHandle, MockDataHandle) {
        let control = MockControlTransport::new();
        let data = MockDataTransport::new();
        let (device, stream) = (control.handle(), data.handle());
        let controller =
            SessionController::new(Box::new(control), Box::new(data), SessionOptions::default())
                .unwrap();
        (controller, device, stream)
    }

    #[tokio::test]
    async fn invalid_options_rejected() {
        let options = SessionOptions {
            sample_rate: 0,
            ..Default::default()
        };
        let result = SessionController::new(
            Box::new(MockControlTransport::new()),
            Box::new(MockDataTransport::new()),
            options,
        );
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn connect_captures_device_info() {
        let (controller, device, _) = controller();
        device.set_reply(commands::TARGET_NAME, b"NetSDR\0".to_vec());

        controller.connect().await.unwrap();
        assert_eq!(controller.state().await, SessionState::Connected);
        assert_eq!(controller.device_info().await.unwrap().name, "NetSDR");
    }

    #[tokio::test]
    async fn connect_twice_is_a_no_op() {
        let (controller, device, _) = controller();
        controller.connect().await.unwrap();
        controller.connect().await.unwrap();
        assert_eq!(device.connect_count(), 1);
        assert_eq!(device.send_count(), 3);
    }

    #[tokio::test]
    async fn rejected_init_command_leaves_disconnected() {
        let (controller, device, _) = controller();
        device.set_status(commands::IQ_SAMPLE_RATE, 0x01);

        let result = controller.connect().await;
        assert!(matches!(result, Err(Error::Device { .. })));
        assert_eq!(controller.state().await, SessionState::Disconnected);
        assert!(!controller.is_connected());
        assert_eq!(device.disconnect_count(), 1);
        // The frequency command was never sent.
        assert_eq!(device.send_count(), 2);
        assert!(controller.device_info().await.is_none());
    }

    #[tokio::test]
    async fn start_while_streaming_is_a_no_op() {
        let (controller, device, stream) = controller();
        controller.connect().await.unwrap();
        controller.start_acquisition().await.unwrap();
        controller.start_acquisition().await.unwrap();
        assert_eq!(stream.start_count(), 1);
        assert_eq!(device.send_count(), 4);
    }

    #[tokio::test]
    async fn start_sends_run_command_before_data_start() {
        let (controller, device, _) = controller();
        controller.connect().await.unwrap();
        controller.start_acquisition().await.unwrap();

        let last = device.sent_frames().pop().unwrap();
        assert_eq!(last.key.item(), commands::RECEIVER_STATE);
        assert_eq!(last.payload[1], 0x02);
    }

    #[tokio::test]
    async fn rejected_start_command_does_not_touch_data_channel() {
        let (controller, device, stream) = controller();
        controller.connect().await.unwrap();
        device.set_status(commands::RECEIVER_STATE, 0x05);

        assert!(controller.start_acquisition().await.is_err());
        assert_eq!(stream.start_count(), 0);
        assert_eq!(controller.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn data_start_failure_rolls_back_receiver() {
        let (controller, device, stream) = controller();
        controller.connect().await.unwrap();
        stream.fail_start(true);

        assert!(matches!(
            controller.start_acquisition().await,
            Err(Error::Stream(_))
        ));
        assert_eq!(controller.state().await, SessionState::Connected);

        let frames = device.sent_frames();
        let stop = frames.last().unwrap();
        assert_eq!(stop.key.item(), commands::RECEIVER_STATE);
        assert_eq!(stop.payload[1], 0x01);
    }

    #[tokio::test]
    async fn data_stop_failure_keeps_streaming() {
        let (controller, _, stream) = controller();
        controller.connect().await.unwrap();
        controller.start_acquisition().await.unwrap();
        stream.fail_stop(true);

        assert!(matches!(
            controller.stop_acquisition().await,
            Err(Error::Stream(_))
        ));
        assert_eq!(controller.state().await, SessionState::Streaming);

        stream.fail_stop(false);
        controller.stop_acquisition().await.unwrap();
        assert_eq!(controller.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn rejected_stop_command_still_returns_to_connected() {
        let (controller, device, stream) = controller();
        controller.connect().await.unwrap();
        controller.start_acquisition().await.unwrap();
        device.set_status(commands::RECEIVER_STATE, 0x02);

        assert!(matches!(
            controller.stop_acquisition().await,
            Err(Error::Device { .. })
        ));
        assert_eq!(controller.state().await, SessionState::Connected);
        assert!(!stream.is_receiving());
    }

    #[tokio::test]
    async fn disconnect_from_streaming_stops_data_first() {
        let (controller, device, stream) = controller();
        let mut events = controller.subscribe();
        controller.connect().await.unwrap();
        controller.start_acquisition().await.unwrap();

        controller.disconnect().await;
        assert_eq!(stream.stop_count(), 1);
        assert_eq!(device.disconnect_count(), 1);
        assert_eq!(controller.state().await, SessionState::Disconnected);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SessionEvent::Connected,
                SessionEvent::AcquisitionStarted,
                SessionEvent::AcquisitionStopped,
                SessionEvent::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_when_disconnected_is_quiet() {
        let (controller, device, stream) = controller();
        let mut events = controller.subscribe();
        controller.disconnect().await;
        controller.disconnect().await;

        assert_eq!(controller.state().await, SessionState::Disconnected);
        assert!(!device.is_connected());
        assert_eq!(stream.stop_count(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_link_left_by_abandoned_connect() {
        let (controller, device, _) = controller();
        let mut events = controller.subscribe();
        device.mute(commands::TARGET_NAME);

        let abandoned = tokio::time::timeout(Duration::from_millis(100), controller.connect()).await;
        assert!(abandoned.is_err());
        assert!(device.is_connected());
        assert_eq!(controller.state().await, SessionState::Disconnected);

        controller.disconnect().await;
        assert!(!device.is_connected());
        assert!(!controller.is_connected());
        assert_eq!(device.disconnect_count(), 1);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_abandoned_connect_starts_clean() {
        let (controller, device, _) = controller();
        device.mute(commands::TARGET_NAME);

        let abandoned = tokio::time::timeout(Duration::from_millis(100), controller.connect()).await;
        assert!(abandoned.is_err());

        device.unmute(commands::TARGET_NAME);
        controller.connect().await.unwrap();
        assert_eq!(controller.state().await, SessionState::Connected);
        assert_eq!(device.connect_count(), 2);
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn hang_up_during_connect_leaves_disconnected() {
        let (controller, device, _) = controller();
        device.close_on_connect(true);

        assert!(matches!(controller.connect().await, Err(Error::ChannelClosed)));
        assert_eq!(controller.state().await, SessionState::Disconnected);
        assert!(!controller.is_connected());
        assert_eq!(device.send_count(), 0);
    }

    #[tokio::test]
    async fn set_frequency_requires_connection() {
        let (controller, device, _) = controller();
        assert!(matches!(
            controller.set_frequency(7_100_000).await,
            Err(Error::NotConnected)
        ));

        controller.connect().await.unwrap();
        controller.set_frequency(7_100_000).await.unwrap();
        let last = device.sent_frames().pop().unwrap();
        assert_eq!(last.key.item(), commands::RECEIVER_FREQUENCY);
    }

    #[tokio::test]
    async fn link_loss_is_reconciled_on_next_transition() {
        let (controller, device, stream) = controller();
        controller.connect().await.unwrap();
        controller.start_acquisition().await.unwrap();

        device.drop_link();

        assert!(matches!(
            controller.start_acquisition().await,
            Err(Error::NotConnected)
        ));
        assert_eq!(controller.state().await, SessionState::Disconnected);
        assert!(!stream.is_receiving());
    }
}
