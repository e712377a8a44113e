//! Error types for protocol sessions
//!
//! Only caller-facing failures live here. Unmatched results, malformed
//! messages and subscriber panics are logged, never returned.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::CallId;

pub type Result<T> = std::result::Result<T, UcdpError>;

#[derive(Error, Debug)]
pub enum UcdpError {
    #[error("No sender set, use set_sender")]
    NoSender,

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Call {0} is already pending")]
    DuplicateId(CallId),

    #[error("Protocol error: {code} - {message}")]
    Protocol { code: i64, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Waiter closed without a result")]
    Closed,

    #[error("Decoupled dispatch needs a Tokio runtime")]
    NoRuntime,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
