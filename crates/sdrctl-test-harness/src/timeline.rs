//! Cross-mock call ordering.
//!
//! A [`Timeline`] can be shared by a [`MockControlTransport`](crate::MockControlTransport)
//! and a [`MockDataTransport`](crate::MockDataTransport) so that tests can
//! assert the relative order of primitives on both links, e.g. that the data
//! channel stopped before the control channel closed.

use std::sync::{Arc, Mutex};

/// An append-only, shareable log of primitive invocations.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Timeline {
    /// Create an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .expect("timeline lock poisoned")
            .push(entry.into());
    }

    /// Snapshot of all entries in invocation order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("timeline lock poisoned").clone()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}
