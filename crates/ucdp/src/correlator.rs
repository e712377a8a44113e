//! Call Correlator - matches results to the calls waiting on them
//!
//! Design decisions:
//! 1. IDs are the only correlation key, allocated from an atomic counter
//! 2. One oneshot per pending call, stored in a concurrent map
//! 3. Whoever removes the map entry owns delivery - resolve and timeout can't both win
//! 4. A waiter deregisters itself on drop, so cancelled calls never leak

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{Result, UcdpError};
use crate::protocol::{CallId, ProtocolError};

/// What the remote side answered for one call
pub type Outcome = std::result::Result<Value, ProtocolError>;

type PendingMap = DashMap<CallId, oneshot::Sender<Outcome>>;

pub struct Correlator {
    /// Monotonic call ID counter
    next_id: AtomicU64,

    /// Calls waiting for a result
    pending: Arc<PendingMap>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Next call id. Never returns the same value twice.
    pub fn allocate_id(&self) -> CallId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a waiter for `id`
    pub fn register(&self, id: CallId) -> Result<Waiter> {
        match self.pending.entry(id) {
            Entry::Occupied(_) => Err(UcdpError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Ok(Waiter {
                    id,
                    rx,
                    pending: self.pending.clone(),
                })
            }
        }
    }

    /// Deliver an outcome to the waiter for `id`.
    ///
    /// Returns `false` when nobody was waiting; the outcome is dropped.
    pub fn resolve(&self, id: CallId, outcome: Outcome) -> bool {
        let Some((_, tx)) = self.pending.remove(&id) else {
            tracing::warn!(target: "ucdp", "Received result {} with no waiters: {:?}", id, outcome);
            return false;
        };

        if tx.send(outcome).is_err() {
            tracing::warn!(target: "ucdp", "Waiter for result {} went away before delivery", id);
            return false;
        }
        true
    }

    /// Drop every pending registration. Their waiters fail with `Closed`.
    pub fn cancel_all(&self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            tracing::debug!(target: "ucdp", "Cancelled {} pending calls", count);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-use handle for one pending call
pub struct Waiter {
    id: CallId,
    rx: oneshot::Receiver<Outcome>,
    pending: Arc<PendingMap>,
}

impl Waiter {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Suspend until the result arrives or `timeout` elapses
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Value> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    // Deregister first, then take anything resolve slipped in
                    self.pending.remove(&self.id);
                    match self.rx.try_recv() {
                        Ok(outcome) => Ok(outcome),
                        Err(_) => {
                            tracing::warn!(target: "ucdp", "Call {} timed out after {:?}", self.id, limit);
                            return Err(UcdpError::Timeout(limit));
                        }
                    }
                }
            },
            None => (&mut self.rx).await,
        };

        match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(UcdpError::Protocol {
                code: error.code,
                message: error.message,
            }),
            Err(_) => Err(UcdpError::Closed),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // No-op after a successful resolve
        self.pending.remove(&self.id);
    }
}
