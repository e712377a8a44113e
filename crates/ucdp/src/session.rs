//! Protocol Session - the application-facing API
//!
//! The session owns one Correlator and one Dispatcher and binds them to:
//! - a send function installed by the caller (`set_sender`)
//! - `process_message`, fed by the caller's own transport read loop
//!
//! It never touches the transport itself. Cloning is cheap; clones share state.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::correlator::Correlator;
use crate::dispatcher::{DispatchMode, Dispatcher, EventCallback, EventFilter};
use crate::error::{Result, UcdpError};
use crate::protocol::{self, Call, CallId, Inbound};

/// Transmits one encoded call
pub type SendFn = Arc<dyn Fn(String) -> Result<()> + Send + Sync>;

/// Session configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub dispatch_mode: DispatchMode,

    /// Default timeout for `call`, none means wait forever
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

impl SessionConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

struct Inner {
    config: SessionConfig,
    sender: RwLock<Option<SendFn>>,
    correlator: Correlator,
    dispatcher: Dispatcher,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Session with decoupled dispatch. Must run inside a Tokio runtime.
    pub fn new() -> Result<Self> {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Result<Self> {
        let dispatcher = Dispatcher::new(config.dispatch_mode)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                sender: RwLock::new(None),
                correlator: Correlator::new(),
                dispatcher,
            }),
        })
    }

    /// Non-owning handle, for capture inside subscribers
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Install the function used to transmit calls. Replaces any previous one.
    pub fn set_sender<F>(&self, sender: F)
    where
        F: Fn(String) -> Result<()> + Send + Sync + 'static,
    {
        *self.inner.sender.write() = Some(Arc::new(sender));
    }

    pub fn is_bound(&self) -> bool {
        self.inner.sender.read().is_some()
    }

    /// Send a call and wait for its result, using the configured default timeout
    pub async fn call(&self, method: impl Into<String>, params: Value) -> Result<Value> {
        self.call_inner(method.into(), params, self.inner.config.call_timeout())
            .await
    }

    pub async fn call_with_timeout(
        &self,
        method: impl Into<String>,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.call_inner(method.into(), params, Some(timeout)).await
    }

    async fn call_inner(
        &self,
        method: String,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let sender = self.sender()?;
        let correlator = &self.inner.correlator;

        let id = correlator.allocate_id();
        let waiter = correlator.register(id)?;

        // A failed send drops the waiter, which deregisters it
        Self::send(&sender, Call::new(id, method, params))?;

        waiter.wait(timeout).await
    }

    /// Send a call without waiting for its result. Returns the id used.
    pub fn call_nowait(&self, method: impl Into<String>, params: Value) -> Result<CallId> {
        let sender = self.sender()?;
        let id = self.inner.correlator.allocate_id();
        Self::send(&sender, Call::new(id, method, params))?;
        Ok(id)
    }

    fn sender(&self) -> Result<SendFn> {
        self.inner.sender.read().clone().ok_or(UcdpError::NoSender)
    }

    fn send(sender: &SendFn, call: Call) -> Result<()> {
        let json = call.encode()?;
        tracing::debug!(target: "ucdp::method", "<- Method {}: {} {}", call.id, call.method, call.params);
        sender(json)
    }

    /// Route one raw inbound message. Anomalies are logged and dropped.
    pub fn process_message(&self, raw: &str) {
        let msg = match protocol::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(target: "ucdp", "Malformed message ({}), ignoring: {}", e, raw);
                return;
            }
        };

        match msg {
            Inbound::Result(result) => {
                tracing::debug!(target: "ucdp::method", "-> Result {}: {}", result.id, result.value);
                self.inner.correlator.resolve(result.id, Ok(result.value));
            }
            Inbound::Error { id, error } => {
                tracing::debug!(target: "ucdp::method", "-> Error {}: {} {}", id, error.code, error.message);
                self.inner.correlator.resolve(id, Err(error));
            }
            Inbound::Event(event) => {
                tracing::debug!(target: "ucdp::event", "-> Event {}: {}", event.name, event.params);
                self.inner.dispatcher.dispatch(event);
            }
            Inbound::Unrecognized(msg) => {
                tracing::warn!(target: "ucdp", "Unknown message format, ignoring: {}", msg);
            }
        }
    }

    /// Subscribe to events matching `filter`. Returns the callback.
    ///
    /// A callback that needs the session should capture a [`WeakSession`]:
    /// a strong clone forms a cycle and the session (and its event worker)
    /// is never dropped.
    pub fn subscribe(&self, filter: impl Into<EventFilter>, callback: EventCallback) -> EventCallback {
        self.inner.dispatcher.subscribe(filter, callback)
    }

    /// Subscribe to every event
    pub fn subscribe_all(&self, callback: EventCallback) -> EventCallback {
        self.inner.dispatcher.subscribe(EventFilter::All, callback)
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Fail every in-flight call with `Closed`. For use when the transport goes away.
    pub fn cancel_pending(&self) -> usize {
        self.inner.correlator.cancel_all()
    }
}

/// Weak counterpart of [`Session`]
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<Inner>,
}

impl WeakSession {
    /// `None` once every `Session` clone is gone
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}
