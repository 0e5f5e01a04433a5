//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.
//!
//! A session starts with `Hello` answered by `Welcome` or `Rejected`. After
//! that the client issues requests (`Subscribe`, `Unsubscribe`, `Write`,
//! `Remove`) and the server pushes `Snapshot`s for every subscription whose
//! value changed. Writes and removes are answered with `Ack` or `Nack`.

use poker_core::StorePath;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Bumped on incompatible wire changes
pub const PROTOCOL_VERSION: u32 = 1;

/// Key of the server-value placeholder object
const SERVER_VALUE_KEY: &str = ".sv";

/// Network protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Client opens a session
    Hello {
        client_id: String,
        token: String,
        version: u32,
    },

    /// Server accepts the session
    Welcome { server_time: i64 },

    /// Server refuses the session and closes the connection
    Rejected { reason: String },

    /// Watch a path; answered by an immediate `Snapshot`
    Subscribe { sub_id: u64, path: StorePath },

    /// Stop watching
    Unsubscribe { sub_id: u64 },

    /// Replace the value at a path
    Write {
        req_id: u64,
        path: StorePath,
        value: Value,
    },

    /// Delete the value at a path
    Remove { req_id: u64, path: StorePath },

    /// Request applied
    Ack { req_id: u64 },

    /// Request refused
    Nack { req_id: u64, reason: String },

    /// Current value of a subscription
    Snapshot { sub_id: u64, value: Value },

    /// Subscription cancelled by the server
    SubscriptionError { sub_id: u64, reason: String },

    /// Server is shutting down
    ServerShutdown,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Placeholder the server replaces with its own clock on write
pub fn server_timestamp() -> Value {
    json!({ SERVER_VALUE_KEY: "timestamp" })
}

fn is_server_timestamp(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => {
            map.len() == 1 && map.get(SERVER_VALUE_KEY).and_then(Value::as_str) == Some("timestamp")
        }
        None => false,
    }
}

/// Replace every server-timestamp placeholder inside `value` with `now_ms`
pub fn resolve_server_values(value: &mut Value, now_ms: i64) {
    if is_server_timestamp(value) {
        *value = Value::from(now_ms);
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| resolve_server_values(v, now_ms)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| resolve_server_values(v, now_ms)),
        _ => {}
    }
}
