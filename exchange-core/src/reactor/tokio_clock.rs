//! Wall-clock reactor for production use.
//!
//! Timers are real `tokio::time::sleep` tasks; cancellation aborts the
//! backing `JoinHandle`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::{invoke_guarded, Event, HandlerFn, HandlerId, HandlerOutcome, Reactor, TimerFn, TimerId, Topic};

pub struct TokioReactor {
    handlers: Mutex<HashMap<Topic, Vec<(HandlerId, HandlerFn)>>>,
    timers: DashMap<TimerId, JoinHandle<()>>,
    next_handler_id: AtomicU64,
    next_timer_id: AtomicU64,
}

impl Default for TokioReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioReactor {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            timers: DashMap::new(),
            next_handler_id: AtomicU64::new(0),
            next_timer_id: AtomicU64::new(0),
        }
    }
}

impl Reactor for TokioReactor {
    fn call_on(&self, topic: Topic, handler: HandlerFn) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().entry(topic).or_default().push((id, handler));
        id
    }

    fn cancel_handler(&self, id: HandlerId) {
        let mut handlers = self.handlers.lock();
        for list in handlers.values_mut() {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    fn fire(&self, topic: Topic, event: Event) -> Vec<HandlerOutcome> {
        let snapshot: Vec<HandlerFn> = {
            let handlers = self.handlers.lock();
            handlers
                .get(&topic)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        snapshot
            .iter()
            .map(|handler| {
                let outcome = invoke_guarded(handler, &event);
                if let Err(err) = &outcome {
                    tracing::warn!(topic = ?topic, error = %err, "reactor handler failed");
                }
                outcome
            })
            .collect()
    }

    fn call_later(&self, seconds: f64, callback: TimerFn) -> TimerId {
        let id = TimerId(self.next_timer_id.fetch_add(1, Ordering::Relaxed));
        let duration = Duration::from_secs_f64(seconds.max(0.0));
        let handle = tokio::task::spawn(async move {
            tokio::time::sleep(duration).await;
            callback();
        });
        self.timers.insert(id, handle);
        id
    }

    fn cancel_call(&self, id: TimerId) {
        if let Some((_, handle)) = self.timers.remove(&id) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TokioReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioReactor").finish_non_exhaustive()
    }
}

// Arc<TokioReactor> is the form embedders hold onto, so construction helpers
// return it pre-wrapped.
pub fn shared() -> Arc<TokioReactor> {
    Arc::new(TokioReactor::new())
}
