use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{trace, warn};

use super::types::{AgentEvent, EventKind};

/// Observer of lifecycle events. Delivery is best-effort.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AgentEvent);
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &AgentEvent) {}
}

pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(&AgentEvent) + Send + Sync,
{
    fn emit(&self, event: &AgentEvent) {
        (self.0)(event)
    }
}

/// Deliver `event` to `sink`, containing any panic in the observer.
pub fn emit_isolated(sink: &dyn EventSink, event: &AgentEvent) {
    if catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
        warn!(
            kind = %event.kind,
            run_id = %event.run_id,
            "Event observer panicked; event dropped for that observer"
        );
    }
}

pub type SubscriptionId = u64;

/// Fan-out sink with a bounded, queryable history.
pub struct EventBus {
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn EventSink>)>>,
    history: Mutex<VecDeque<AgentEvent>>,
    max_history: usize,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            max_history: 1000,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, sink));
        id
    }

    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnSink(f)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn history(&self) -> Vec<AgentEvent> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn history_for_run(&self, run_id: &str) -> Vec<AgentEvent> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn history_by_kind(&self, kind: EventKind) -> Vec<AgentEvent> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &AgentEvent) {
        trace!(
            kind = %event.kind,
            run_id = %event.run_id,
            iteration = event.iteration,
            "Event emitted"
        );

        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let subscribers: Vec<Arc<dyn EventSink>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect();

        for sink in subscribers {
            emit_isolated(sink.as_ref(), event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(kind: EventKind, run: &str) -> AgentEvent {
        AgentEvent::new(kind, run, 0, "test")
    }

    #[test]
    fn test_fan_out() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe_fn(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(&event(EventKind::Thought, "r1"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe_fn(|_| panic!("observer bug"));
        let counter = count.clone();
        bus.subscribe_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&event(EventKind::Plan, "r1"));
        bus.emit(&event(EventKind::Code, "r1"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.history().len(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(Arc::new(NullSink));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_history_is_bounded_and_queryable() {
        let bus = EventBus::new().with_max_history(3);
        bus.emit(&event(EventKind::Thought, "a"));
        bus.emit(&event(EventKind::Code, "a"));
        bus.emit(&event(EventKind::Code, "b"));
        bus.emit(&event(EventKind::Complete, "b"));

        let history = bus.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].kind, EventKind::Code);
        assert_eq!(bus.history_for_run("b").len(), 2);
        assert_eq!(bus.history_by_kind(EventKind::Code).len(), 2);

        bus.clear_history();
        assert!(bus.history().is_empty());
    }
}
