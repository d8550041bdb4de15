//! Drives the end-to-end exchange lifecycle: scheduling, payload assembly,
//! response dispatch, flow-control events (§4.5).
//!
//! `MessageExchange` is the one component that touches every other module:
//! it schedules itself on the [`Reactor`], reads/writes the
//! [`MessageStore`], reads [`Identity`], and drives the [`Transport`]. The
//! engine is single-threaded cooperative (§5): every mutation happens
//! between `.await` points, so `parking_lot::Mutex` guards are always
//! dropped before the one suspension point (the transport call).

pub mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::ids::MessageId;
use crate::identity::Identity;
use crate::message::{FieldType, Message, Schema};
use crate::reactor::{Event, HandlerId, Reactor, ReactorError, TimerId, Topic};
use crate::store::{MessageStore, StoreError};
use crate::transport::Transport;

pub use config::ExchangeConfig;

/// Errors that unify the failure modes a caller driving one exchange cycle
/// end-to-end might need to observe (§7).
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives scheduling, payload assembly and response dispatch for one
/// client's exchange relationship with the server (§4.5).
pub struct MessageExchange {
    reactor: Arc<dyn Reactor>,
    transport: Arc<dyn Transport>,
    store: Mutex<MessageStore>,
    identity: Mutex<Identity>,
    config: Mutex<ExchangeConfig>,
    urgent: AtomicBool,
    stopped: AtomicBool,
    exchange_timer: Mutex<Option<TimerId>>,
    impending_timer: Mutex<Option<TimerId>>,
    /// `None` until the first `schedule_exchange` call; `Some(urgent)` once
    /// a timer is armed, recording which mode it was armed in.
    scheduled_urgent: Mutex<Option<bool>>,
    handler_ids: Mutex<Vec<HandlerId>>,
}

impl MessageExchange {
    pub fn new(
        reactor: Arc<dyn Reactor>,
        transport: Arc<dyn Transport>,
        mut store: MessageStore,
        identity: Identity,
        config: ExchangeConfig,
    ) -> Arc<Self> {
        // "resynchronize" is a protocol-owned message type, not a plugin
        // schema — register it unconditionally so desync recovery always
        // has somewhere to enqueue its echo (§4.5 step 6.a, §6.2).
        store.add_schema(Schema::new("resynchronize", [("operation-id".to_string(), FieldType::Str)]));

        let exchange = Arc::new(Self {
            reactor,
            transport,
            store: Mutex::new(store),
            identity: Mutex::new(identity),
            config: Mutex::new(config),
            urgent: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            exchange_timer: Mutex::new(None),
            impending_timer: Mutex::new(None),
            scheduled_urgent: Mutex::new(None),
            handler_ids: Mutex::new(Vec::new()),
        });
        exchange.subscribe();
        exchange
    }

    /// Wire up the four event subscriptions this component owns (§4.5
    /// "Event subscriptions owned by MessageExchange").
    fn subscribe(self: &Arc<Self>) {
        let mut ids = self.handler_ids.lock();

        let target = Arc::clone(self);
        ids.push(self.reactor.call_on(
            Topic::ResynchronizeClients,
            Arc::new(move |_: &Event| {
                target.urgent.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ));

        let target = Arc::clone(self);
        ids.push(self.reactor.call_on(
            Topic::MessageType("accepted-types".to_string()),
            Arc::new(move |event: &Event| target.on_accepted_types_message(event)),
        ));

        let target = Arc::clone(self);
        ids.push(self.reactor.call_on(
            Topic::MessageType("set-intervals".to_string()),
            Arc::new(move |event: &Event| target.on_set_intervals_message(event)),
        ));

        let target = Arc::clone(self);
        ids.push(self.reactor.call_on(
            Topic::PreExit,
            Arc::new(move |_: &Event| {
                target.stop();
                Ok(())
            }),
        ));
    }

    fn on_accepted_types_message(&self, event: &Event) -> Result<(), ReactorError> {
        let Event::Message(msg) = event else { return Ok(()) };
        let types: Vec<String> = msg
            .field("response-types")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut store = self.store.lock();
        let newly_accepted_has_held = types
            .iter()
            .filter(|t| !store.accepted_types().contains(*t))
            .any(|t| store.held_messages_of_type(t) > 0);
        store
            .set_accepted_types(types)
            .map_err(|e| ReactorError::HandlerFailed(e.to_string()))?;
        drop(store);

        if newly_accepted_has_held {
            self.urgent.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn on_set_intervals_message(&self, event: &Event) -> Result<(), ReactorError> {
        let Event::Message(msg) = event else { return Ok(()) };
        let mut config = self.config.lock();
        if let Some(seconds) = msg.field("exchange").and_then(|v| v.as_f64()) {
            config.exchange_interval = std::time::Duration::from_secs_f64(seconds);
        }
        if let Some(seconds) = msg.field("urgent-exchange").and_then(|v| v.as_f64()) {
            config.urgent_exchange_interval = std::time::Duration::from_secs_f64(seconds);
        }
        Ok(())
    }

    /// Schedule the first exchange in urgent mode.
    pub fn start(self: &Arc<Self>) {
        self.schedule_exchange(true);
    }

    /// Cancel all pending timers and unsubscribe from the reactor.
    /// Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_timers();
        *self.scheduled_urgent.lock() = None;
        let ids: Vec<HandlerId> = self.handler_ids.lock().drain(..).collect();
        for id in ids {
            self.reactor.cancel_handler(id);
        }
    }

    /// Stamp `timestamp`/`api` (if absent) and enqueue through the store.
    pub fn send(&self, mut message: Message, urgent: bool) -> Result<MessageId, ExchangeError> {
        if message.timestamp.is_none() {
            message.timestamp = Some(Utc::now());
        }
        if message.api.is_none() {
            message.api = Some(self.config.lock().client_api.clone());
        }
        let id = self.store.lock().add(message)?;
        if urgent {
            self.urgent.store(true, Ordering::SeqCst);
        }
        Ok(id)
    }

    pub fn is_urgent(&self) -> bool {
        self.urgent.load(Ordering::SeqCst)
    }

    /// Whether `id` still names a message waiting to be sent
    /// ([`super::broker::BrokerServer::is_message_pending`]).
    pub fn is_message_pending(&self, id: MessageId) -> bool {
        self.store.lock().is_pending(id)
    }

    /// The server-reported types this exchange currently forwards, rather
    /// than holds ([`super::broker::BrokerServer::get_accepted_message_types`]).
    pub fn accepted_types(&self) -> Vec<String> {
        self.store.lock().accepted_types().iter().cloned().collect()
    }

    /// Replace the accepted-types set directly, bypassing the
    /// server-driven `("message", "accepted-types")` handler — used by the
    /// broker facade to push the union of its clients' declared interests.
    pub fn set_accepted_types(&self, types: impl IntoIterator<Item = String>) -> Result<(), ExchangeError> {
        self.store.lock().set_accepted_types(types)?;
        Ok(())
    }

    /// `Identity::computer_id` ([`super::broker::BrokerServer::get_server_uuid`]).
    pub fn computer_id(&self) -> Option<String> {
        self.identity.lock().computer_id()
    }

    /// Replace the tuning in effect for future exchanges
    /// ([`super::broker::BrokerServer::reload_configuration`]).
    pub fn set_config(&self, config: ExchangeConfig) {
        *self.config.lock() = config;
    }

    /// `(urgent_interval, interval)`.
    pub fn get_exchange_intervals(&self) -> (std::time::Duration, std::time::Duration) {
        let config = self.config.lock();
        (config.urgent_exchange_interval, config.exchange_interval)
    }

    /// Schedule the next exchange per the four scheduling rules in §4.5.
    pub fn schedule_exchange(self: &Arc<Self>, urgent: bool) {
        let (urgent_interval, interval) = self.get_exchange_intervals();
        let currently = *self.scheduled_urgent.lock();
        match (urgent, currently) {
            (true, Some(false)) => {
                self.cancel_timers();
                self.arm(urgent_interval, true);
            }
            (_, None) => {
                let delay = if urgent { urgent_interval } else { interval };
                self.arm(delay, urgent);
            }
            _ => {
                // (true, Some(true)) and (false, Some(_)) with something
                // already scheduled: never push forward, never downgrade.
            }
        }
    }

    fn cancel_timers(&self) {
        if let Some(id) = self.exchange_timer.lock().take() {
            self.reactor.cancel_call(id);
        }
        if let Some(id) = self.impending_timer.lock().take() {
            self.reactor.cancel_call(id);
        }
    }

    fn arm(self: &Arc<Self>, delay: std::time::Duration, urgent: bool) {
        let lead_time = self.config.lock().pre_exchange_lead_time;

        let exchange_target = Arc::clone(self);
        let exchange_timer = self.reactor.call_later(
            delay.as_secs_f64(),
            Box::new(move || {
                tokio::task::spawn(async move {
                    exchange_target.exchange().await;
                });
            }),
        );
        *self.exchange_timer.lock() = Some(exchange_timer);

        if delay > lead_time {
            let impending_target = Arc::clone(self);
            let impending_timer = self.reactor.call_later(
                (delay - lead_time).as_secs_f64(),
                Box::new(move || {
                    impending_target.reactor.fire(Topic::ImpendingExchange, Event::None);
                }),
            );
            *self.impending_timer.lock() = Some(impending_timer);
        }

        *self.scheduled_urgent.lock() = Some(urgent);
    }

    /// Select the lowest-api-version batch (up to `max`) from `messages`,
    /// bucketing an absent `api` into `"2.0"` for legacy compatibility
    /// (§4.5 step 2).
    fn select_batch(messages: &[Message]) -> (String, Vec<Message>) {
        let mut groups: std::collections::BTreeMap<String, Vec<Message>> = std::collections::BTreeMap::new();
        for message in messages {
            let api = message.api.clone().unwrap_or_else(|| "2.0".to_string());
            groups.entry(api).or_default().push(message.clone());
        }
        groups.into_iter().next().unwrap_or_else(|| ("2.0".to_string(), Vec::new()))
    }

    /// Assemble the outbound payload for the next batch (§6.1).
    pub fn make_payload(&self) -> serde_json::Value {
        let store = self.store.lock();
        let config = self.config.lock();
        let candidates = store.get_pending_messages(Some(config.max_messages));
        let (server_api, batch) = Self::select_batch(&candidates);
        Self::build_payload(&store, &config, &server_api, batch, store.pending_len())
    }

    fn build_payload(
        store: &MessageStore,
        config: &ExchangeConfig,
        server_api: &str,
        batch: Vec<Message>,
        total_messages: usize,
    ) -> serde_json::Value {
        let digest = store.get_accepted_types_digest();
        serde_json::json!({
            "server-api": server_api,
            "client-api": config.client_api,
            "sequence": store.get_sequence(),
            "next-expected-sequence": store.get_server_sequence(),
            "accepted-types": base64::engine::general_purpose::STANDARD.encode(digest),
            "messages": batch,
            "total-messages": total_messages,
        })
    }

    /// Run one synchronous-from-the-caller's-perspective exchange cycle
    /// (§4.5 "Exchange cycle").
    pub async fn exchange(self: &Arc<Self>) {
        // Entering the cycle clears urgent mode; it is only re-set by
        // explicit triggers during the cycle (desync recovery, a handler
        // reacting to an inbound message) — never left over from before.
        self.urgent.store(false, Ordering::SeqCst);

        self.reactor.fire(Topic::PreExchange, Event::None);

        let (payload, server_api, sequence_sent) = {
            let store = self.store.lock();
            let config = self.config.lock();
            let candidates = store.get_pending_messages(Some(config.max_messages));
            let (server_api, batch) = Self::select_batch(&candidates);
            let sequence_sent = store.get_sequence();
            let payload = Self::build_payload(&store, &config, &server_api, batch, store.pending_len());
            (payload, server_api, sequence_sent)
        };

        let computer_id = self.identity.lock().computer_id();
        let response = self
            .transport
            .exchange(&payload, computer_id.as_deref(), &server_api)
            .await;

        let Some(response) = response else {
            self.reactor.fire(Topic::ExchangeFailed, Event::None);
            self.reschedule();
            return;
        };

        let next_expected = response.get("next-expected-sequence").and_then(|v| v.as_u64()).unwrap_or(sequence_sent);
        let sent_any = {
            let messages = payload.get("messages").and_then(|v| v.as_array());
            messages.is_some_and(|m| !m.is_empty())
        };

        if next_expected < sequence_sent {
            let ancient = next_expected < self.store.lock().get_sequence();
            if ancient {
                let resync = Message::new("resynchronize");
                if let Err(error) = self.store.lock().add(resync) {
                    tracing::warn!(error = %error, "failed to enqueue resynchronize message");
                }
                self.reactor.fire(Topic::ResynchronizeClients, Event::None);
            } else {
                self.store.lock().set_pending_offset(0);
                self.store.lock().set_sequence(next_expected);
            }
            self.urgent.store(true, Ordering::SeqCst);
        } else if next_expected > sequence_sent {
            if let Err(error) = self.store.lock().add_pending_offset(next_expected - sequence_sent) {
                tracing::warn!(error = %error, "failed to advance pending offset");
            }
        } else if sent_any {
            // next_expected == sequence_sent and we sent messages: the
            // server is repeating its own expectation. Do not re-arm
            // urgent mode here or client and server busy-loop (§8 bug
            // note).
        }

        if let Some(inbound) = response.get("messages").and_then(|v| v.as_array()) {
            for raw in inbound {
                self.dispatch_inbound(raw.clone());
            }
        }

        self.reactor.fire(Topic::ExchangeDone, Event::None);
        self.reschedule();
    }

    fn dispatch_inbound(&self, raw: serde_json::Value) {
        let message: Message = match serde_json::from_value(raw) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(error = %error, "malformed inbound message, skipping");
                return;
            }
        };

        {
            let mut store = self.store.lock();
            let next_server_sequence = store.get_server_sequence() + 1;
            store.set_server_sequence(next_server_sequence);
            if let Err(error) = store.commit() {
                tracing::error!(error = %error, "failed to commit store after inbound message, stopping exchange");
                drop(store);
                self.stop();
                return;
            }
        }

        if message.message_type == "resynchronize" {
            let mut reply = Message::new("resynchronize");
            if let Some(operation_id) = message.field("operation-id") {
                reply = reply.with_field("operation-id", operation_id.clone());
            }
            if let Err(error) = self.store.lock().add(reply) {
                tracing::warn!(error = %error, "failed to enqueue resynchronize reply");
            }
            self.reactor.fire(Topic::ResynchronizeClients, Event::None);
        }

        self.reactor.fire(Topic::Message, Event::Message(message.clone()));
        self.reactor
            .fire(Topic::MessageType(message.message_type.clone()), Event::Message(message));
    }

    fn reschedule(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        *self.scheduled_urgent.lock() = None;
        self.schedule_exchange(self.is_urgent());
    }
}
