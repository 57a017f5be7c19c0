//! Pub/Sub event bus for loader lifecycle events.
//!
//! Architecture:
//! - Callbacks register per [`LoaderEvent`] with `on()` and leave with `off()`
//! - `emit()` invokes every callback for the event synchronously
//! - Every emission bumps the `loader-<event>` diagnostic counter
//!
//! Callback order: FIFO (first-registered, first-called) within one event.
//! Removal is by `Arc` identity, so keep the `Arc` you registered.
//!
//! Failure policy: each callback runs isolated. A panicking callback is
//! logged and counted, and the remaining callbacks still run. `emit()`
//! reports how many failed.
//!
//! The bus never decides *when* to emit; connectors do.

use log::{error, trace};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use super::stats::{STAT_CALLBACK_FAILURE, Stats};
use crate::entities::LogMetadata;

/// Recognised loader events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderEvent {
    Ready,
    Update,
    Finish,
    Error,
}

impl LoaderEvent {
    pub const ALL: [LoaderEvent; 4] = [
        LoaderEvent::Ready,
        LoaderEvent::Update,
        LoaderEvent::Finish,
        LoaderEvent::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderEvent::Ready => "ready",
            LoaderEvent::Update => "update",
            LoaderEvent::Finish => "finish",
            LoaderEvent::Error => "error",
        }
    }

    /// Diagnostic counter name for this event
    pub fn stat_name(&self) -> &'static str {
        match self {
            LoaderEvent::Ready => "loader-ready",
            LoaderEvent::Update => "loader-update",
            LoaderEvent::Finish => "loader-finish",
            LoaderEvent::Error => "loader-error",
        }
    }
}

impl std::fmt::Display for LoaderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data carried by an emission.
#[derive(Debug, Clone, Default)]
pub enum EventPayload {
    #[default]
    None,
    Metadata(Arc<LogMetadata>),
    /// `DataVersion` after the connector stored new samples
    DataVersion(u64),
    Message(String),
}

/// Event callback, invoked with `(event, payload)`.
pub type EventCallback = Arc<dyn Fn(LoaderEvent, &EventPayload) + Send + Sync>;

/// Loader event bus. Cheap to clone; clones share subscribers and stats.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<LoaderEvent, Vec<EventCallback>>>>,
    stats: Arc<Stats>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count_total())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_stats(Arc::new(Stats::new()))
    }

    /// Bus reporting into a shared stats registry
    pub fn with_stats(stats: Arc<Stats>) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            stats,
        }
    }

    /// Register `callback` for `event`. Returns the bus for chaining.
    ///
    /// # Example
    /// ```ignore
    /// let on_ready: EventCallback = Arc::new(|_event: LoaderEvent, payload: &EventPayload| {
    ///     println!("{:?}", payload)
    /// });
    /// bus.on(LoaderEvent::Ready, on_ready.clone())
    ///    .on(LoaderEvent::Finish, on_ready);
    /// ```
    pub fn on(&self, event: LoaderEvent, callback: EventCallback) -> &Self {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event)
            .or_default()
            .push(callback);
        self
    }

    /// Remove the first registration of `callback` for `event`. No-op if absent.
    pub fn off(&self, event: LoaderEvent, callback: &EventCallback) -> &Self {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(cbs) = subs.get_mut(&event)
            && let Some(idx) = cbs.iter().position(|cb| Arc::ptr_eq(cb, callback))
        {
            cbs.remove(idx);
        }
        self
    }

    /// Invoke every callback for `event` in registration order.
    /// Returns the number of callbacks that panicked.
    pub fn emit(&self, event: LoaderEvent, payload: EventPayload) -> usize {
        self.stats.increment(event.stat_name());

        // Snapshot so callbacks may call on()/off()/emit() themselves
        let callbacks: Vec<EventCallback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event)
            .cloned()
            .unwrap_or_default();

        trace!("EventBus: emit {} to {} callbacks", event, callbacks.len());

        let mut failures = 0;
        for cb in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| cb(event, &payload))).is_err() {
                failures += 1;
                self.stats.increment(STAT_CALLBACK_FAILURE);
                error!("EventBus: '{}' callback panicked", event);
            }
        }
        failures
    }

    /// Check if there are callbacks for `event`
    pub fn has_subscribers(&self, event: LoaderEvent) -> bool {
        self.subscriber_count(event) > 0
    }

    pub fn subscriber_count(&self, event: LoaderEvent) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn subscriber_count_total(&self) -> usize {
        self.subscribers
            .read()
            .map(|s| s.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Drop all callbacks
    pub fn clear(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> EventCallback {
        let c = Arc::clone(counter);
        Arc::new(move |_event: LoaderEvent, _payload: &EventPayload| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_on_emit() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.on(LoaderEvent::Update, counting(&counter));

        bus.emit(LoaderEvent::Update, EventPayload::None);
        bus.emit(LoaderEvent::Update, EventPayload::None);
        bus.emit(LoaderEvent::Ready, EventPayload::None);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_registration_order_and_payload() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let seen = Arc::clone(&seen);
            bus.on(
                LoaderEvent::Error,
                Arc::new(move |event: LoaderEvent, payload: &EventPayload| {
                    if let EventPayload::Message(msg) = payload {
                        seen.lock().unwrap().push(format!("{}:{}:{}", id, event, msg));
                    }
                }),
            );
        }

        bus.emit(LoaderEvent::Error, EventPayload::Message("boom".into()));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["0:error:boom", "1:error:boom", "2:error:boom"]
        );
    }

    #[test]
    fn test_chaining_and_duplicates() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let cb = counting(&counter);

        bus.on(LoaderEvent::Ready, Arc::clone(&cb))
            .on(LoaderEvent::Ready, Arc::clone(&cb));
        bus.emit(LoaderEvent::Ready, EventPayload::None);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // off() removes one registration at a time
        bus.off(LoaderEvent::Ready, &cb);
        bus.emit(LoaderEvent::Ready, EventPayload::None);
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        bus.off(LoaderEvent::Ready, &cb);
        bus.off(LoaderEvent::Ready, &cb); // absent: no-op
        bus.emit(LoaderEvent::Ready, EventPayload::None);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!bus.has_subscribers(LoaderEvent::Ready));
    }

    #[test]
    fn test_off_matches_identity_not_behaviour() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.on(LoaderEvent::Finish, counting(&counter));

        // Same behaviour, different Arc: not removed
        bus.off(LoaderEvent::Finish, &counting(&counter));
        assert_eq!(bus.subscriber_count(LoaderEvent::Finish), 1);
    }

    #[test]
    fn test_panicking_callback_isolated() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.on(LoaderEvent::Update, counting(&counter));
        bus.on(
            LoaderEvent::Update,
            Arc::new(|event: LoaderEvent, _payload: &EventPayload| {
                if event == LoaderEvent::Update {
                    panic!("listener bug");
                }
            }),
        );
        bus.on(LoaderEvent::Update, counting(&counter));

        let failures = bus.emit(LoaderEvent::Update, EventPayload::None);
        assert_eq!(failures, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(bus.stats().get(STAT_CALLBACK_FAILURE), 1);
    }

    #[test]
    fn test_emit_counts_per_event() {
        let bus = EventBus::new();
        bus.emit(LoaderEvent::Update, EventPayload::None);
        bus.emit(LoaderEvent::Update, EventPayload::DataVersion(3));
        bus.emit(LoaderEvent::Finish, EventPayload::None);
        assert_eq!(bus.stats().get("loader-update"), 2);
        assert_eq!(bus.stats().get("loader-finish"), 1);
        assert_eq!(bus.stats().get("loader-ready"), 0);
    }

    #[test]
    fn test_callback_can_reenter_bus() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = bus.clone();
        let c = Arc::clone(&counter);
        bus.on(
            LoaderEvent::Ready,
            Arc::new(move |_event: LoaderEvent, _payload: &EventPayload| {
                inner.on(LoaderEvent::Finish, counting(&c));
            }),
        );
        bus.emit(LoaderEvent::Ready, EventPayload::None);
        bus.emit(LoaderEvent::Finish, EventPayload::None);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
