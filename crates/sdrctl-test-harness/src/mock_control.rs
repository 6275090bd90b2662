//! Mock control transport for deterministic session testing.
//!
//! [`MockControlTransport`] implements [`ControlTransport`] with a scripted
//! device behind it. By default every command frame sent through it is
//! answered with a `Response` frame for the same control item, delivered
//! asynchronously through the registered inbound handler, the way a real
//! device's reply arrives on the transport's read task.
//!
//! Behavior is adjusted through a [`MockControlHandle`], which stays usable
//! after the mock has been moved into a session controller.
//!
//! # Example
//!
//! ```
//! use sdrctl_test_harness::MockControlTransport;
//!
//! let mock = MockControlTransport::new();
//! let device = mock.handle();
//! // Answer the target-name request with a device name.
//! device.set_reply(0x0001, b"NetSDR".to_vec());
//! // Never answer receiver-state commands.
//! device.mute(0x0018);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use sdrctl_core::error::{Error, Result};
use sdrctl_core::frame::{self, Frame, FrameKind};
use sdrctl_core::transport::{ControlTransport, InboundEvent, InboundHandler};
use sdrctl_core::types::CorrelationKey;

use crate::timeline::Timeline;

/// One primitive invocation observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    /// `connect()` was called.
    Connect,
    /// `disconnect()` was called.
    Disconnect,
    /// `send()` was called with these bytes.
    Sent(Bytes),
    /// The scripted device delivered these bytes to the inbound handler.
    Replied(Bytes),
}

#[derive(Default)]
struct ControlState {
    calls: Vec<ControlCall>,
    connected: bool,
    handler: Option<InboundHandler>,
    fail_connect: bool,
    close_on_connect: bool,
    fail_send: bool,
    auto_respond: bool,
    response_delay: Duration,
    muted: HashSet<u16>,
    replies: HashMap<u16, Bytes>,
    statuses: HashMap<u16, u8>,
}

/// A [`ControlTransport`] backed by a scripted device.
pub struct MockControlTransport {
    state: Arc<Mutex<ControlState>>,
    timeline: Option<Timeline>,
}

/// Inspection and scripting handle for a [`MockControlTransport`].
#[derive(Clone)]
pub struct MockControlHandle {
    state: Arc<Mutex<ControlState>>,
}

fn lock(state: &Mutex<ControlState>) -> MutexGuard<'_, ControlState> {
    state.lock().expect("mock control state poisoned")
}

impl MockControlTransport {
    /// Create a disconnected mock whose device answers every command.
    pub fn new() -> Self {
        let state = ControlState {
            auto_respond: true,
            ..ControlState::default()
        };
        MockControlTransport {
            state: Arc::new(Mutex::new(state)),
            timeline: None,
        }
    }

    /// Record `control.*` entries on `timeline`.
    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// A handle for scripting and inspecting the mock after it is boxed.
    pub fn handle(&self) -> MockControlHandle {
        MockControlHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn note(&self, entry: String) {
        if let Some(timeline) = &self.timeline {
            timeline.record(entry);
        }
    }
}

impl Default for MockControlTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlHandle {
    /// Every primitive call observed so far.
    pub fn calls(&self) -> Vec<ControlCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of `connect()` invocations, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.count(|c| matches!(c, ControlCall::Connect))
    }

    /// Number of `disconnect()` invocations.
    pub fn disconnect_count(&self) -> usize {
        self.count(|c| matches!(c, ControlCall::Disconnect))
    }

    /// Number of `send()` invocations, failed ones included.
    pub fn send_count(&self) -> usize {
        self.count(|c| matches!(c, ControlCall::Sent(_)))
    }

    /// Decoded frames passed to `send()`, in order. Undecodable sends are skipped.
    pub fn sent_frames(&self) -> Vec<Frame> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                ControlCall::Sent(bytes) => frame::decode(bytes).ok(),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&ControlCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| pred(c)).count()
    }

    /// Whether the mock link is open.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Make subsequent `connect()` calls fail.
    pub fn fail_connect(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }

    /// Make the device hang up while `connect()` is still in progress.
    ///
    /// The link opens, the inbound handler receives [`InboundEvent::Closed`],
    /// and only then does `connect()` return `Ok`.
    pub fn close_on_connect(&self, close: bool) {
        lock(&self.state).close_on_connect = close;
    }

    /// Make subsequent `send()` calls fail.
    pub fn fail_send(&self, fail: bool) {
        lock(&self.state).fail_send = fail;
    }

    /// Enable or disable the automatic responder.
    pub fn auto_respond(&self, enabled: bool) {
        lock(&self.state).auto_respond = enabled;
    }

    /// Delay every automatic response by `delay`.
    pub fn set_response_delay(&self, delay: Duration) {
        lock(&self.state).response_delay = delay;
    }

    /// Never answer commands addressing `item`.
    pub fn mute(&self, item: u16) {
        lock(&self.state).muted.insert(item);
    }

    /// Resume answering commands addressing `item`.
    pub fn unmute(&self, item: u16) {
        lock(&self.state).muted.remove(&item);
    }

    /// Answer commands addressing `item` with `payload` instead of an echo.
    pub fn set_reply(&self, item: u16, payload: impl Into<Bytes>) {
        lock(&self.state).replies.insert(item, payload.into());
    }

    /// Answer commands addressing `item` with a non-zero status byte.
    pub fn set_status(&self, item: u16, status: u8) {
        lock(&self.state).statuses.insert(item, status);
    }

    /// Push raw bytes through the inbound handler as if the device sent them.
    ///
    /// Returns `false` if no handler is registered.
    pub fn inject(&self, bytes: impl Into<Bytes>) -> bool {
        let handler = lock(&self.state).handler.clone();
        match handler {
            Some(handler) => {
                handler(InboundEvent::Frame(bytes.into()));
                true
            }
            None => false,
        }
    }

    /// Simulate the device dropping the link: the mock reports disconnected
    /// and the inbound handler receives [`InboundEvent::Closed`].
    pub fn drop_link(&self) {
        let handler = {
            let mut state = lock(&self.state);
            state.connected = false;
            state.handler.clone()
        };
        if let Some(handler) = handler {
            handler(InboundEvent::Closed);
        }
    }
}

#[async_trait]
impl ControlTransport for MockControlTransport {
    async fn connect(&mut self) -> Result<()> {
        self.note("control.connect".to_string());
        let hang_up = {
            let mut state = lock(&self.state);
            state.calls.push(ControlCall::Connect);
            if state.fail_connect {
                return Err(Error::Connect("mock connect failure".into()));
            }
            if state.close_on_connect {
                state.connected = false;
                state.handler.clone()
            } else {
                state.connected = true;
                None
            }
        };
        if let Some(handler) = hang_up {
            handler(InboundEvent::Closed);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.note("control.disconnect".to_string());
        let mut state = lock(&self.state);
        state.calls.push(ControlCall::Disconnect);
        state.connected = false;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let bytes = Bytes::copy_from_slice(data);
        let decoded = frame::decode(&bytes).ok();
        if let Some(f) = &decoded {
            self.note(format!("control.send {}", f.key));
        }

        let reply = {
            let mut state = lock(&self.state);
            state.calls.push(ControlCall::Sent(bytes));
            if !state.connected {
                return Err(Error::NotConnected);
            }
            if state.fail_send {
                return Err(Error::Transport("mock send failure".into()));
            }
            decoded.and_then(|f| scripted_reply(&state, &f))
        };

        if let Some(reply) = reply {
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let delay = lock(&state).response_delay;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let handler = {
                    let mut s = lock(&state);
                    // A link dropped or closed meanwhile swallows the reply.
                    if !s.connected {
                        return;
                    }
                    s.calls.push(ControlCall::Replied(reply.clone()));
                    s.handler.clone()
                };
                if let Some(handler) = handler {
                    handler(InboundEvent::Frame(reply));
                }
            });
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn set_inbound_handler(&mut self, handler: InboundHandler) {
        lock(&self.state).handler = Some(handler);
    }
}

/// Build the scripted device's answer to a command frame, if it gives one.
fn scripted_reply(state: &ControlState, command: &Frame) -> Option<Bytes> {
    if !state.auto_respond || command.kind != FrameKind::Command {
        return None;
    }
    let item = command.key.item();
    if state.muted.contains(&item) {
        return None;
    }

    let payload = state
        .replies
        .get(&item)
        .cloned()
        .unwrap_or_else(|| command.payload.clone());
    let status = state.statuses.get(&item).copied().unwrap_or(frame::STATUS_OK);

    Frame::response(CorrelationKey::new(item), payload)
        .with_status(status)
        .encode()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel_handler() -> (InboundHandler, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: InboundHandler = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (handler, rx)
    }

    fn command(item: u16, payload: &[u8]) -> Bytes {
        Frame::command(CorrelationKey::new(item), payload.to_vec())
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn echoes_command_as_response() {
        let mut mock = MockControlTransport::new();
        let (handler, mut rx) = channel_handler();
        mock.set_inbound_handler(handler);
        mock.connect().await.unwrap();

        mock.send(&command(0x0020, &[1, 2, 3])).await.unwrap();

        let InboundEvent::Frame(bytes) = rx.recv().await.unwrap() else {
            panic!("expected a frame");
        };
        let reply = frame::decode(&bytes).unwrap();
        assert_eq!(reply.kind, FrameKind::Response);
        assert_eq!(reply.key, CorrelationKey::new(0x0020));
        assert_eq!(reply.payload.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn scripted_reply_and_status() {
        let mut mock = MockControlTransport::new();
        let device = mock.handle();
        device.set_reply(0x0001, b"NetSDR".to_vec());
        device.set_status(0x00B8, 0x02);
        let (handler, mut rx) = channel_handler();
        mock.set_inbound_handler(handler);
        mock.connect().await.unwrap();

        mock.send(&command(0x0001, &[])).await.unwrap();
        let InboundEvent::Frame(bytes) = rx.recv().await.unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(frame::decode(&bytes).unwrap().payload.as_ref(), b"NetSDR");

        mock.send(&command(0x00B8, &[0, 0, 0, 0])).await.unwrap();
        let InboundEvent::Frame(bytes) = rx.recv().await.unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(frame::decode(&bytes).unwrap().status, 0x02);
    }

    #[tokio::test]
    async fn muted_item_gets_no_reply() {
        let mut mock = MockControlTransport::new();
        let device = mock.handle();
        device.mute(0x0018);
        let (handler, mut rx) = channel_handler();
        mock.set_inbound_handler(handler);
        mock.connect().await.unwrap();

        mock.send(&command(0x0018, &[0x80, 0x02])).await.unwrap();
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(device.send_count(), 1);
    }

    #[tokio::test]
    async fn send_while_disconnected_fails() {
        let mut mock = MockControlTransport::new();
        let result = mock.send(&command(0x0001, &[])).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn drop_link_notifies_handler() {
        let mut mock = MockControlTransport::new();
        let device = mock.handle();
        let (handler, mut rx) = channel_handler();
        mock.set_inbound_handler(handler);
        mock.connect().await.unwrap();

        device.drop_link();
        assert_eq!(rx.recv().await.unwrap(), InboundEvent::Closed);
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn close_on_connect_reports_closed_before_returning() {
        let mut mock = MockControlTransport::new();
        let device = mock.handle();
        device.close_on_connect(true);
        let (handler, mut rx) = channel_handler();
        mock.set_inbound_handler(handler);

        mock.connect().await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), InboundEvent::Closed);
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn counts_calls() {
        let mut mock = MockControlTransport::new();
        let device = mock.handle();
        mock.connect().await.unwrap();
        mock.send(&command(0x0001, &[])).await.unwrap();
        mock.disconnect().await.unwrap();
        mock.disconnect().await.unwrap();

        assert_eq!(device.connect_count(), 1);
        assert_eq!(device.send_count(), 1);
        assert_eq!(device.disconnect_count(), 2);
        assert_eq!(device.sent_frames()[0].key, CorrelationKey::new(0x0001));
    }
}
