//! A reactor driven by an explicit virtual clock, for deterministic tests.
//!
//! Every scheduling test in this crate calls `advance(seconds)` to drive
//! time forward explicitly rather than sleeping a real clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{invoke_guarded, Event, HandlerFn, HandlerId, HandlerOutcome, Reactor, TimerFn, TimerId, Topic};

struct TimerEntry {
    id: TimerId,
    fire_at: f64,
    seq: u64,
    callback: Option<TimerFn>,
}

pub struct VirtualReactor {
    time: Mutex<f64>,
    handlers: Mutex<HashMap<Topic, Vec<(HandlerId, HandlerFn)>>>,
    timers: Mutex<Vec<TimerEntry>>,
    next_handler_id: AtomicU64,
    next_timer_id: AtomicU64,
    next_seq: AtomicU64,
}

impl Default for VirtualReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualReactor {
    pub fn new() -> Self {
        Self {
            time: Mutex::new(0.0),
            handlers: Mutex::new(HashMap::new()),
            timers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(0),
            next_timer_id: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> f64 {
        *self.time.lock()
    }

    /// Whether a timer has a pending (not yet fired, not cancelled) entry.
    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.timers.lock().iter().any(|e| e.id == id)
    }

    /// Move the virtual clock forward by `seconds`, running every timer
    /// whose deadline falls at or before the new time, in deadline order
    /// (ties broken by scheduling order).
    pub fn advance(&self, seconds: f64) {
        let target = {
            let mut time = self.time.lock();
            *time += seconds;
            *time
        };
        loop {
            let due = {
                let mut timers = self.timers.lock();
                let idx = timers
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.fire_at <= target)
                    .min_by(|a, b| a.1.fire_at.total_cmp(&b.1.fire_at).then(a.1.seq.cmp(&b.1.seq)))
                    .map(|(i, _)| i);
                idx.map(|i| timers.remove(i))
            };
            match due {
                Some(mut entry) => {
                    if let Some(callback) = entry.callback.take() {
                        callback();
                    }
                }
                None => break,
            }
        }
    }
}

impl Reactor for VirtualReactor {
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
        // Snapshot the Arc-cloned handlers and release the lock before
        // invoking anything, so a handler that itself calls `fire` (even on
        // this same topic) never deadlocks on `self.handlers`.
        let snapshot: Vec<HandlerFn> = {
            let handlers = self.handlers.lock();
            handlers
                .get(&topic)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        snapshot.iter().map(|handler| invoke_guarded(handler, &event)).collect()
    }

    fn call_later(&self, seconds: f64, callback: TimerFn) -> TimerId {
        let id = TimerId(self.next_timer_id.fetch_add(1, Ordering::Relaxed));
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let fire_at = self.now() + seconds;
        self.timers.lock().push(TimerEntry {
            id,
            fire_at,
            seq,
            callback: Some(callback),
        });
        id
    }

    fn cancel_call(&self, id: TimerId) {
        self.timers.lock().retain(|e| e.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn fire_invokes_handlers_in_subscription_order() {
        let reactor = VirtualReactor::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let order = order.clone();
            reactor.call_on(
                Topic::PreExchange,
                Arc::new(move |_: &Event| {
                    order.lock().push(label);
                    Ok(())
                }),
            );
        }
        reactor.fire(Topic::PreExchange, Event::None);
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn handler_panic_is_captured_not_propagated() {
        let reactor = VirtualReactor::new();
        reactor.call_on(Topic::PreExchange, Arc::new(|_: &Event| panic!("boom")));
        let results = reactor.fire(Topic::PreExchange, Event::None);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn call_later_runs_only_after_advance_passes_deadline() {
        let reactor = VirtualReactor::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        reactor.call_later(10.0, Box::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));
        reactor.advance(9.0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        reactor.advance(1.0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_call_prevents_future_firing() {
        let reactor = VirtualReactor::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let id = reactor.call_later(5.0, Box::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));
        reactor.cancel_call(id);
        reactor.advance(10.0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reentrant_fire_completes_before_outer_returns() {
        let reactor = Arc::new(VirtualReactor::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_reactor = reactor.clone();
        let inner_log = log.clone();
        reactor.call_on(
            Topic::ExchangeDone,
            Arc::new(move |_: &Event| {
                inner_log.lock().push("outer-start");
                inner_reactor.fire(Topic::PreExchange, Event::None);
                inner_log.lock().push("outer-end");
                Ok(())
            }),
        );
        let nested_log = log.clone();
        reactor.call_on(
            Topic::PreExchange,
            Arc::new(move |_: &Event| {
                nested_log.lock().push("inner");
                Ok(())
            }),
        );

        reactor.fire(Topic::ExchangeDone, Event::None);
        assert_eq!(*log.lock(), vec!["outer-start", "inner", "outer-end"]);
    }
}
