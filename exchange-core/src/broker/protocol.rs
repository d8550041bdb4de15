//! The IPC frame shapes exchanged over the broker's Unix domain socket
//! (§6.3): `{method, args} -> {result | error}`.
//!
//! `postcard` is not a self-describing format — it cannot deserialize a
//! bare `serde_json::Value` (that requires `deserialize_any`, which
//! postcard's `Deserializer` does not implement). Every JSON-shaped value
//! that needs to cross the wire is therefore carried as an already-encoded
//! JSON string; only `BrokerServer::handle_request` ever parses it.

use serde::{Deserialize, Serialize};

/// One method call, as read off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub method: String,
    /// JSON-encoded arguments, e.g. `{"name":"watchdog"}`. Methods that
    /// take no arguments send `"{}"`.
    pub args_json: String,
}

impl IpcRequest {
    pub fn new(method: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            args_json: args.to_string(),
        }
    }
}

/// One method call's outcome, as written back to the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcResponse {
    /// JSON-encoded return value, e.g. `"true"` or `"{\"pending\":false}"`.
    Ok { value_json: String },
    Err { kind: String, message: String },
}

impl IpcResponse {
    pub fn ok(value: serde_json::Value) -> Self {
        Self::Ok { value_json: value.to_string() }
    }

    pub fn err(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Err { kind: kind.into(), message: message.into() }
    }
}
