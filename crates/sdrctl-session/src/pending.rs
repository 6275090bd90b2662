//! Pending-request table.
//!
//! Tracks commands that have been sent and are waiting for a correlated
//! response. Every entry is completed exactly once: by a matching response
//! ([`resolve`](PendingRequests::resolve)), by its deadline passing
//! ([`expire`](PendingRequests::expire)), or by the channel going away
//! ([`cancel_all`](PendingRequests::cancel_all)). Completing an entry removes
//! it, so a second completion for the same request cannot happen.
//!
//! The table itself is not synchronized. The control channel keeps it behind
//! a single mutex shared by the send path and the inbound callback path.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::time::Instant;

use sdrctl_core::error::{Error, Result};
use sdrctl_core::types::CorrelationKey;

use crate::commands::Response;

struct PendingEntry {
    /// Distinguishes this registration from later ones for the same key.
    id: u64,
    deadline: Instant,
    reply: oneshot::Sender<Result<Response>>,
}

/// The caller's side of a registered request.
#[derive(Debug)]
pub struct PendingHandle {
    key: CorrelationKey,
    id: u64,
    deadline: Instant,
    pub(crate) rx: oneshot::Receiver<Result<Response>>,
}

impl PendingHandle {
    /// Key the request was registered under.
    pub fn key(&self) -> CorrelationKey {
        self.key
    }

    /// When the request times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// In-flight commands keyed by correlation key.
#[derive(Default)]
pub struct PendingRequests {
    entries: HashMap<CorrelationKey, PendingEntry>,
    next_id: u64,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for `key` that times out at `deadline`.
    ///
    /// Overdue entries are expired first. Fails with
    /// [`Error::DuplicateKey`] if a request for `key` is still outstanding;
    /// the existing request is left untouched.
    pub fn register(&mut self, key: CorrelationKey, deadline: Instant) -> Result<PendingHandle> {
        self.expire(Instant::now());

        if self.entries.contains_key(&key) {
            return Err(Error::DuplicateKey(key));
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let (reply, rx) = oneshot::channel();
        self.entries.insert(
            key,
            PendingEntry {
                id,
                deadline,
                reply,
            },
        );

        Ok(PendingHandle {
            key,
            id,
            deadline,
            rx,
        })
    }

    /// Complete the request for `key` with `response`.
    ///
    /// Returns `false` if nothing is waiting on `key`.
    pub fn resolve(&mut self, key: CorrelationKey, response: Response) -> bool {
        match self.entries.remove(&key) {
            Some(entry) => {
                // The waiter may have given up already; that is not an error.
                let _ = entry.reply.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Remove `handle`'s entry without completing it.
    ///
    /// Used when the command could not be sent. Returns `false` if the entry
    /// was already completed, or if the key now belongs to a newer request.
    pub fn withdraw(&mut self, handle: &PendingHandle) -> bool {
        match self.entries.get(&handle.key) {
            Some(entry) if entry.id == handle.id => {
                self.entries.remove(&handle.key);
                true
            }
            _ => false,
        }
    }

    /// Fail every outstanding request with the error `reason` produces, and
    /// clear the table. Returns how many requests were cancelled.
    pub fn cancel_all(&mut self, reason: impl Fn() -> Error) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.reply.send(Err(reason()));
        }
        count
    }

    /// Fail every request whose deadline is at or before `now` with
    /// [`Error::Timeout`]. Returns how many requests expired.
    pub fn expire(&mut self, now: Instant) -> usize {
        let overdue: Vec<CorrelationKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| *key)
            .collect();

        for key in &overdue {
            if let Some(entry) = self.entries.remove(key) {
                tracing::debug!(key = %key, "Pending request timed out");
                let _ = entry.reply.send(Err(Error::Timeout));
            }
        }
        overdue.len()
    }

    /// Whether a request for `key` is outstanding.
    pub fn contains(&self, key: CorrelationKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
