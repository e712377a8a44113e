//! Event Dispatcher - fans inbound events out to subscribers
//!
//! Two delivery modes:
//! - Inline: subscribers run on whoever calls `dispatch`
//! - Decoupled: events go through an unbounded queue drained by one worker thread,
//!   so neither the receive path nor the async runtime waits on subscriber code
//!
//! Either way, all-events subscribers run before named ones, each group in
//! registration order. A panicking subscriber is logged and skipped.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{Result, UcdpError};
use crate::protocol::Event;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Inline,
    #[default]
    Decoupled,
}

/// Which events a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Name(String),
    Names(BTreeSet<String>),
}

impl From<&str> for EventFilter {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for EventFilter {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<BTreeSet<String>> for EventFilter {
    fn from(names: BTreeSet<String>) -> Self {
        Self::Names(names)
    }
}

impl From<Vec<String>> for EventFilter {
    fn from(names: Vec<String>) -> Self {
        Self::Names(names.into_iter().collect())
    }
}

impl From<Vec<&str>> for EventFilter {
    fn from(names: Vec<&str>) -> Self {
        Self::Names(names.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for EventFilter {
    fn from(names: [&str; N]) -> Self {
        Self::Names(names.into_iter().map(str::to_string).collect())
    }
}

impl<T: Into<EventFilter>> From<Option<T>> for EventFilter {
    fn from(filter: Option<T>) -> Self {
        filter.map_or(Self::All, Into::into)
    }
}

#[derive(Default)]
struct Subscriptions {
    all: RwLock<Vec<EventCallback>>,
    named: DashMap<String, Vec<EventCallback>>,
}

impl Subscriptions {
    /// Snapshot so callbacks may subscribe without deadlocking
    fn matching(&self, name: &str) -> Vec<EventCallback> {
        let mut callbacks = self.all.read().clone();
        if let Some(named) = self.named.get(name) {
            callbacks.extend(named.value().iter().cloned());
        }
        callbacks
    }

    fn emit(&self, event: Event) {
        for callback in self.matching(&event.name) {
            let delivery = event.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(delivery))).is_err() {
                tracing::error!(target: "ucdp", "Subscriber for event {} panicked", event.name);
            }
        }
    }
}

pub struct Dispatcher {
    mode: DispatchMode,
    subscriptions: Arc<Subscriptions>,

    /// Worker queue, present in decoupled mode
    queue: Option<mpsc::UnboundedSender<Event>>,
}

impl Dispatcher {
    /// Build a dispatcher. Decoupled mode must be called inside a Tokio runtime;
    /// subscribers run with that runtime's context entered.
    pub fn new(mode: DispatchMode) -> Result<Self> {
        let subscriptions = Arc::new(Subscriptions::default());

        let queue = match mode {
            DispatchMode::Inline => None,
            DispatchMode::Decoupled => {
                let runtime =
                    tokio::runtime::Handle::try_current().map_err(|_| UcdpError::NoRuntime)?;
                let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
                let worker_subscriptions = subscriptions.clone();

                // Subscribers may block, so they get a thread of their own rather than
                // an async worker. The runtime context stays entered for tokio::spawn.
                // Exits once the dispatcher (and with it the sender) is dropped.
                std::thread::Builder::new()
                    .name("ucdp-events".to_string())
                    .spawn(move || {
                        let _context = runtime.enter();
                        while let Some(event) = rx.blocking_recv() {
                            worker_subscriptions.emit(event);
                        }
                        tracing::debug!(target: "ucdp", "Event worker stopped");
                    })?;
                Some(tx)
            }
        };

        Ok(Self {
            mode,
            subscriptions,
            queue,
        })
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Register `callback` and hand it back, so the same closure can be
    /// registered under several filters.
    pub fn subscribe(&self, filter: impl Into<EventFilter>, callback: EventCallback) -> EventCallback {
        match filter.into() {
            EventFilter::All => self.subscriptions.all.write().push(callback.clone()),
            EventFilter::Name(name) => self.add_named(name, &callback),
            EventFilter::Names(names) => {
                if names.is_empty() {
                    tracing::warn!(target: "ucdp", "Subscription with an empty event set receives nothing");
                }
                for name in names {
                    self.add_named(name, &callback);
                }
            }
        }
        callback
    }

    fn add_named(&self, name: String, callback: &EventCallback) {
        self.subscriptions
            .named
            .entry(name)
            .or_default()
            .push(callback.clone());
    }

    /// Deliver `event` to every matching subscriber. Never waits on subscriber code
    /// in decoupled mode.
    pub fn dispatch(&self, event: Event) {
        match &self.queue {
            Some(queue) => {
                if let Err(dropped) = queue.send(event) {
                    tracing::warn!(target: "ucdp", "Event worker gone, dropping event {}", dropped.0.name);
                }
            }
            None => self.subscriptions.emit(event),
        }
    }

    /// Total registrations, counting a multi-name subscription once per name
    pub fn subscriber_count(&self) -> usize {
        let named: usize = self.subscriptions.named.iter().map(|e| e.value().len()).sum();
        self.subscriptions.all.read().len() + named
    }
}
