//! Mock data transport.
//!
//! [`MockDataTransport`] implements [`DataTransport`] without touching the
//! network. It counts start/stop invocations, tracks whether it is
//! "receiving", and can be told to fail either primitive.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sdrctl_core::error::{Error, Result};
use sdrctl_core::transport::DataTransport;

use crate::timeline::Timeline;

#[derive(Debug, Default)]
struct DataState {
    starts: usize,
    stops: usize,
    receiving: bool,
    fail_start: bool,
    fail_stop: bool,
}

/// A [`DataTransport`] that records calls instead of receiving datagrams.
#[derive(Debug, Default)]
pub struct MockDataTransport {
    state: Arc<Mutex<DataState>>,
    timeline: Option<Timeline>,
}

/// Inspection and control handle for a [`MockDataTransport`].
///
/// Stays usable after the transport is moved into a session controller.
#[derive(Debug, Clone)]
pub struct MockDataHandle {
    state: Arc<Mutex<DataState>>,
}

impl MockDataTransport {
    /// Create a mock that starts and stops successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `data.start` / `data.stop` entries on `timeline`.
    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// A handle for inspecting calls after the mock has been boxed.
    pub fn handle(&self) -> MockDataHandle {
        MockDataHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn note(&self, entry: &str) {
        if let Some(timeline) = &self.timeline {
            timeline.record(entry);
        }
    }
}

impl MockDataHandle {
    fn state(&self) -> std::sync::MutexGuard<'_, DataState> {
        self.state.lock().expect("mock data state poisoned")
    }

    /// Number of `start_receiving` invocations, failed ones included.
    pub fn start_count(&self) -> usize {
        self.state().starts
    }

    /// Number of `stop_receiving` invocations, failed ones included.
    pub fn stop_count(&self) -> usize {
        self.state().stops
    }

    /// Whether the mock believes its receive loop is running.
    pub fn is_receiving(&self) -> bool {
        self.state().receiving
    }

    /// Make subsequent `start_receiving` calls fail.
    pub fn fail_start(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    /// Make subsequent `stop_receiving` calls fail.
    pub fn fail_stop(&self, fail: bool) {
        self.state().fail_stop = fail;
    }
}

#[async_trait]
impl DataTransport for MockDataTransport {
    async fn start_receiving(&mut self) -> Result<()> {
        self.note("data.start");
        let mut state = self.state.lock().expect("mock data state poisoned");
        state.starts += 1;
        if state.fail_start {
            return Err(Error::Stream("mock start failure".into()));
        }
        state.receiving = true;
        Ok(())
    }

    async fn stop_receiving(&mut self) -> Result<()> {
        self.note("data.stop");
        let mut state = self.state.lock().expect("mock data state poisoned");
        state.stops += 1;
        if state.fail_stop {
            return Err(Error::Stream("mock stop failure".into()));
        }
        state.receiving = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_calls() {
        let mut mock = MockDataTransport::new();
        let handle = mock.handle();

        mock.start_receiving().await.unwrap();
        assert!(handle.is_receiving());
        mock.stop_receiving().await.unwrap();

        assert_eq!(handle.start_count(), 1);
        assert_eq!(handle.stop_count(), 1);
        assert!(!handle.is_receiving());
    }

    #[tokio::test]
    async fn scripted_failures() {
        let mut mock = MockDataTransport::new();
        let handle = mock.handle();
        handle.fail_start(true);

        assert!(matches!(mock.start_receiving().await, Err(Error::Stream(_))));
        assert!(!handle.is_receiving());
        assert_eq!(handle.start_count(), 1);
    }

    #[tokio::test]
    async fn writes_timeline() {
        let timeline = Timeline::new();
        let mut mock = MockDataTransport::new().with_timeline(timeline.clone());
        mock.start_receiving().await.unwrap();
        mock.stop_receiving().await.unwrap();
        assert_eq!(timeline.entries(), vec!["data.start", "data.stop"]);
    }
}
