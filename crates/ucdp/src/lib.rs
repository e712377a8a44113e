//! ucdp - Protocol engine for Chrome DevTools style debugging protocols
//!
//! Sits between an application and a text-message transport it does not own.
//! Two jobs:
//!
//! 1. **Call correlation**: every call gets a fresh id and a waiter; the
//!    result with that id resolves exactly that waiter, whatever order
//!    results arrive in.
//! 2. **Event dispatch**: notifications fan out to subscribers, by default on
//!    a dedicated worker task so slow subscribers never stall the reader.
//!
//! ```text
//! reader loop ──process_message──▶ Session ──▶ Correlator (results)
//!                                          └─▶ Dispatcher (events) ──▶ subscribers
//! application ──call──▶ Session ──send fn──▶ transport
//! ```

pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod session;

pub use correlator::{Correlator, Waiter};
pub use dispatcher::{DispatchMode, Dispatcher, EventCallback, EventFilter};
pub use error::{Result, UcdpError};
pub use protocol::{Call, CallId, CallResult, Event, Inbound, ProtocolError};
pub use session::{SendFn, Session, SessionConfig, WeakSession};
