//! In-process event bus and timer service (§4.3).
//!
//! Topics form a closed, enumerable set (`"pre-exchange"`,
//! `"message"`, `("message", type)`, ...), so rather than reach for
//! `Box<dyn Any>` fan-out (the one place this crate allows itself dynamic
//! dispatch is the handler closure itself, not the payload), topics and
//! their payloads are modeled as two small enums: [`Topic`] and [`Event`].
//! Two drivers implement the same [`Reactor`] trait: [`virtual_clock::VirtualReactor`]
//! for deterministic tests (`advance(seconds)`) and [`tokio_clock::TokioReactor`]
//! for production wall-clock scheduling, layering `tokio::time::sleep`
//! timers over a `parking_lot`-guarded subscriber map.

pub mod tokio_clock;
pub mod virtual_clock;

use thiserror::Error;

use crate::message::Message;

/// The fixed set of topics the exchange core publishes and subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    PreExchange,
    ImpendingExchange,
    ExchangeDone,
    ExchangeFailed,
    ResynchronizeClients,
    PreExit,
    Message,
    /// `("message", type)` — fired in addition to the plain `Message` topic
    /// for every inbound message, keyed by its `type` field (§4.3, §4.5).
    MessageType(String),
    MessageTypeAcceptanceChanged,
}

/// The payload carried by a [`Topic::fire`].
#[derive(Debug, Clone)]
pub enum Event {
    None,
    Message(Message),
    TypeAcceptance { type_name: String, accepted: bool },
}

/// The outcome of one handler invocation, as collected by `fire`.
pub type HandlerOutcome = Result<(), ReactorError>;

/// Handlers are reference-counted rather than boxed so `fire` can clone the
/// subscriber list out from under its lock before invoking anything —
/// otherwise a handler that itself calls `fire` (explicitly allowed: "fire
/// is re-entrant") would deadlock on a non-reentrant mutex.
pub type HandlerFn = std::sync::Arc<dyn Fn(&Event) -> HandlerOutcome + Send + Sync>;
pub type TimerFn = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Errors produced while dispatching one `fire` to its subscribers.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

/// Topic-keyed publish/subscribe with timer integration (§4.3).
///
/// `fire` invokes handlers synchronously, in subscription order, collecting
/// one [`HandlerOutcome`] per handler; a handler that panics is logged (by
/// the caller) and its outcome is `Err(HandlerPanicked)` rather than
/// propagating. `fire` is re-entrant: a handler firing another topic runs
/// that nested dispatch to completion before the outer `fire` call
/// returns.
pub trait Reactor: Send + Sync {
    fn call_on(&self, topic: Topic, handler: HandlerFn) -> HandlerId;
    fn cancel_handler(&self, id: HandlerId);
    fn fire(&self, topic: Topic, event: Event) -> Vec<HandlerOutcome>;
    fn call_later(&self, seconds: f64, callback: TimerFn) -> TimerId;
    fn cancel_call(&self, id: TimerId);
}

pub use tokio_clock::TokioReactor;
pub use virtual_clock::VirtualReactor;

/// Runs `handler(event)`, turning a panic into `Err(HandlerPanicked)`
/// instead of unwinding through the dispatch loop (§4.3: "a handler
/// raising an exception is logged and skipped").
pub(crate) fn invoke_guarded(handler: &HandlerFn, event: &Event) -> HandlerOutcome {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(ReactorError::HandlerPanicked(message))
        }
    }
}
