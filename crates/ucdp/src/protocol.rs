//! Wire Envelope Types
//!
//! Only the generic envelope lives here. Method and event payloads stay
//! opaque `Value`s - the engine never looks inside them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Call ID - monotonically increasing, starts at 1
pub type CallId = u64;

/// Outbound call
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub id: CallId,
    pub method: String,
    pub params: Value,
}

impl Call {
    pub fn new(id: CallId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params: normalize_params(params),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Result of a call, matched by id
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub id: CallId,
    pub value: Value,
}

/// Error body sent back instead of a result
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Unsolicited notification
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub params: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params: normalize_params(params),
        }
    }
}

/// Classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Result(CallResult),
    Error { id: CallId, error: ProtocolError },
    Event(Event),
    /// Valid JSON matching no known envelope
    Unrecognized(Value),
}

/// Decode a raw inbound message.
///
/// A `method` field wins over everything else, then `result`, then `error`.
/// An `error` body that isn't `{code, message}` is kept verbatim as the message.
/// Only invalid JSON is an `Err`; odd shapes come back as `Unrecognized`.
pub fn decode(raw: &str) -> serde_json::Result<Inbound> {
    let msg: Value = serde_json::from_str(raw)?;
    Ok(classify(msg))
}

fn classify(msg: Value) -> Inbound {
    let Value::Object(mut fields) = msg else {
        return Inbound::Unrecognized(msg);
    };

    if let Some(Value::String(name)) = fields.get("method") {
        let name = name.clone();
        let params = fields.remove("params").unwrap_or(Value::Null);
        return Inbound::Event(Event::new(name, params));
    }

    let Some(id) = fields.get("id").and_then(Value::as_u64) else {
        return Inbound::Unrecognized(Value::Object(fields));
    };

    if let Some(value) = fields.remove("result") {
        return Inbound::Result(CallResult { id, value });
    }

    if let Some(raw) = fields.remove("error") {
        let error = serde_json::from_value::<ProtocolError>(raw.clone()).unwrap_or_else(|_| {
            // Nonstandard body - still fail the call rather than leave it hanging
            ProtocolError {
                code: 0,
                message: raw.to_string(),
                data: None,
            }
        });
        return Inbound::Error { id, error };
    }

    Inbound::Unrecognized(Value::Object(fields))
}

/// Missing params travel as `{}`
fn normalize_params(params: Value) -> Value {
    match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}
