//! Thin synchronous method-call facade over the exchange engine for local
//! clients (§4.7), reached over the IPC transport in [`ipc`].
//!
//! # Modules
//!
//! - [`error`]: `BrokerError`
//! - [`protocol`]: the `{method, args} -> {result | error}` frame shapes
//! - [`registry`]: the connected-client table
//! - [`ipc`]: `postcard`-over-Unix-socket framing and the accept loop

pub mod error;
pub mod ipc;
pub mod protocol;
pub mod registry;

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

pub use error::BrokerError;
pub use protocol::{IpcRequest, IpcResponse};
use registry::{ClientNotice, ClientRegistry};

use crate::exchange::MessageExchange;
use crate::ids::MessageId;
use crate::message::Message;

/// Exposes [`MessageExchange`] and a connected-client registry over a
/// single method-call surface, so every transport (IPC, an in-process
/// test harness) dispatches the same way.
pub struct BrokerServer {
    exchange: Arc<MessageExchange>,
    clients: ClientRegistry,
    /// The union of message types the broker's local clients have each
    /// declared interest in, pushed to the exchange's accepted-types set
    /// on every `register_client_accepted_message_type` call (§4.7).
    client_accepted_types: Mutex<BTreeSet<String>>,
}

impl BrokerServer {
    pub fn new(exchange: Arc<MessageExchange>) -> Self {
        Self {
            exchange,
            clients: ClientRegistry::new(),
            client_accepted_types: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn ping(&self) -> bool {
        true
    }

    pub fn register_client(&self, name: &str) -> tokio::sync::mpsc::UnboundedReceiver<ClientNotice> {
        self.clients.register(name)
    }

    pub fn send_message(&self, message: Message, urgent: bool) -> Result<MessageId, BrokerError> {
        Ok(self.exchange.send(message, urgent)?)
    }

    pub fn is_message_pending(&self, id: MessageId) -> bool {
        self.exchange.is_message_pending(id)
    }

    pub fn stop_clients(&self) {
        self.clients.notify_all(ClientNotice::Exit);
    }

    pub fn reload_configuration(&self, config: crate::exchange::ExchangeConfig) -> Result<(), BrokerError> {
        config.validate().map_err(BrokerError::InvalidConfig)?;
        self.exchange.set_config(config);
        Ok(())
    }

    /// Trigger the registration flow. Populating `Identity` with a fresh
    /// `{secure_id, insecure_id}` pair is an external hook outside this
    /// crate's scope (spec.md §1, §4.6); this is a placeholder responder
    /// so the method surface is complete end-to-end.
    pub fn register(&self) {
        tracing::info!("registration flow requested; no-op until an external hook is wired in");
    }

    pub fn get_accepted_message_types(&self) -> Vec<String> {
        self.exchange.accepted_types()
    }

    pub fn get_server_uuid(&self) -> Option<String> {
        self.exchange.computer_id()
    }

    pub fn register_client_accepted_message_type(&self, message_type: impl Into<String>) -> Result<(), BrokerError> {
        let mut types = self.client_accepted_types.lock();
        types.insert(message_type.into());
        Ok(self.exchange.set_accepted_types(types.iter().cloned())?)
    }

    pub fn exit(&self) {
        self.stop_clients();
        self.exchange.stop();
    }

    /// Parse one wire request, dispatch it, and encode its outcome — the
    /// only place `args_json`/`value_json` strings are turned into or out
    /// of `serde_json::Value` (§6.3 framing note).
    pub async fn handle_request(&self, request: IpcRequest) -> IpcResponse {
        let args: serde_json::Value = match serde_json::from_str(&request.args_json) {
            Ok(args) => args,
            Err(error) => return IpcResponse::err("protocol", format!("malformed args: {error}")),
        };

        match request.method.as_str() {
            "ping" => IpcResponse::ok(serde_json::json!(self.ping())),
            "register_client" => match args.get("name").and_then(|v| v.as_str()) {
                Some(name) => {
                    let _ = self.register_client(name);
                    IpcResponse::ok(serde_json::json!(true))
                }
                None => IpcResponse::err("invalid_args", "register_client requires a \"name\" string"),
            },
            "send_message" => {
                let message = match args.get("message").cloned().map(serde_json::from_value::<Message>) {
                    Some(Ok(message)) => message,
                    _ => return IpcResponse::err("invalid_args", "send_message requires a \"message\" object"),
                };
                let urgent = args.get("urgent").and_then(|v| v.as_bool()).unwrap_or(false);
                match self.send_message(message, urgent) {
                    Ok(id) => IpcResponse::ok(serde_json::json!(id)),
                    Err(error) => IpcResponse::err("exchange", error.to_string()),
                }
            }
            "is_message_pending" => {
                match args.get("id").cloned().map(serde_json::from_value::<MessageId>) {
                    Some(Ok(id)) => IpcResponse::ok(serde_json::json!(self.is_message_pending(id))),
                    _ => IpcResponse::err("invalid_args", "is_message_pending requires an \"id\""),
                }
            }
            "stop_clients" => {
                self.stop_clients();
                IpcResponse::ok(serde_json::json!(true))
            }
            "reload_configuration" => {
                let config = match args.get("config").cloned().map(serde_json::from_value) {
                    Some(Ok(config)) => config,
                    _ => return IpcResponse::err("invalid_args", "reload_configuration requires a \"config\" object"),
                };
                match self.reload_configuration(config) {
                    Ok(()) => IpcResponse::ok(serde_json::json!(true)),
                    Err(error) => IpcResponse::err("invalid_config", error.to_string()),
                }
            }
            "register" => {
                self.register();
                IpcResponse::ok(serde_json::json!(true))
            }
            "get_accepted_message_types" => IpcResponse::ok(serde_json::json!(self.get_accepted_message_types())),
            "get_server_uuid" => IpcResponse::ok(serde_json::json!(self.get_server_uuid())),
            "register_client_accepted_message_type" => match args.get("type").and_then(|v| v.as_str()) {
                Some(message_type) => match self.register_client_accepted_message_type(message_type) {
                    Ok(()) => IpcResponse::ok(serde_json::json!(true)),
                    Err(error) => IpcResponse::err("exchange", error.to_string()),
                },
                None => IpcResponse::err("invalid_args", "register_client_accepted_message_type requires a \"type\" string"),
            },
            "exit" => {
                self.exit();
                IpcResponse::ok(serde_json::json!(true))
            }
            other => IpcResponse::err("unknown_method", format!("no such method: {other}")),
        }
    }
}
