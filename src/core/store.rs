//! Versioned attribute store with coalesced change notification.
//!
//! **Why**: consumers re-render or re-extract frames on change. A burst of
//! writes (seek + look-ahead + settings in one turn) must cost one
//! notification, not one per write.
//!
//! # Model
//!
//! - Every effective `set()` bumps `generation` by exactly one
//! - A write of the same value (see [`AttrValue::same`]) is a no-op: no bump,
//!   no tick armed
//! - The first effective write arms a single flush on the [`Scheduler`];
//!   later writes in the same turn ride along
//! - The flush clears the pending flag *before* notifying, so a write from
//!   inside a listener arms a fresh tick instead of being lost
//!
//! # Listener failures
//!
//! Listeners run isolated: a panicking listener is logged and counted, the
//! rest of the flush still runs, and the store stays consistent.

use log::{debug, error, trace};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use super::scheduler::{Scheduler, TickHandle};
use super::stats::{STAT_CALLBACK_FAILURE, STAT_FLUSH, Stats};
use crate::entities::{AttrKey, AttrValue, Attrs, LogMetadata, StreamSettings};

/// Receives the generation number once per flush.
pub trait Subscriber: Send + Sync {
    fn on_update(&self, generation: u64);
}

impl<F> Subscriber for F
where
    F: Fn(u64) + Send + Sync,
{
    fn on_update(&self, generation: u64) {
        self(generation)
    }
}

/// Shared listener reference; identity is the `Arc` allocation.
pub type Listener = Arc<dyn Subscriber>;

struct StoreInner {
    attrs: RwLock<Attrs>,
    generation: AtomicU64,
    pending: Mutex<Option<TickHandle>>,
    listeners: RwLock<Vec<Listener>>,
    scheduler: Arc<dyn Scheduler>,
    stats: Arc<Stats>,
}

impl StoreInner {
    fn flush(&self) {
        // Clear first: writes made by listeners must arm a new tick
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();

        let generation = self.generation.load(Ordering::Acquire);
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        self.stats.increment(STAT_FLUSH);
        debug!(
            "AttributeStore: flush generation {} to {} listeners",
            generation,
            listeners.len()
        );

        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_update(generation))).is_err() {
                self.stats.increment(STAT_CALLBACK_FAILURE);
                error!("AttributeStore: listener panicked during flush {}", generation);
            }
        }
    }
}

/// Versioned key/value playback state.
pub struct AttributeStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStore")
            .field("generation", &self.generation())
            .field("pending", &self.is_pending())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl AttributeStore {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_stats(scheduler, Arc::new(Stats::new()))
    }

    pub fn with_stats(scheduler: Arc<dyn Scheduler>, stats: Arc<Stats>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                attrs: RwLock::new(Attrs::new()),
                generation: AtomicU64::new(0),
                pending: Mutex::new(None),
                listeners: RwLock::new(Vec::new()),
                scheduler,
                stats,
            }),
        }
    }

    // ========== Read ==========

    pub fn get(&self, key: AttrKey) -> Option<AttrValue> {
        self.attrs().get(key).cloned()
    }

    pub fn get_float(&self, key: AttrKey) -> Option<f64> {
        self.attrs().get_float(key)
    }

    pub fn get_uint(&self, key: AttrKey) -> Option<u64> {
        self.attrs().get_uint(key)
    }

    pub fn get_metadata(&self) -> Option<Arc<LogMetadata>> {
        self.attrs().get_metadata()
    }

    pub fn get_stream_settings(&self) -> Option<Arc<StreamSettings>> {
        self.attrs().get_stream_settings()
    }

    fn attrs(&self) -> std::sync::RwLockReadGuard<'_, Attrs> {
        self.inner.attrs.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of effective writes so far
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Whether a flush is armed
    pub fn is_pending(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    // ========== Write ==========

    /// Store `value` under `key` if it differs from the current value.
    /// Returns true if the store changed.
    pub fn set(&self, key: AttrKey, value: impl Into<AttrValue>) -> bool {
        let value = value.into();
        let changed = self
            .inner
            .attrs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set(key, value);
        if !changed {
            return false;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("AttributeStore: {} changed, generation {}", key, generation);
        self.arm();
        true
    }

    fn arm(&self) {
        let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_some() {
            return;
        }
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule_once(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush();
            }
        }));
        *pending = Some(handle);
    }

    // ========== Listeners ==========

    /// Append a listener. Duplicates are allowed and notified twice.
    pub fn subscribe(&self, listener: Listener) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Remove the first registration of `listener` (by identity).
    pub fn unsubscribe(&self, listener: &Listener) {
        let mut listeners = self.inner.listeners.write().unwrap_or_else(|e| e.into_inner());
        if let Some(idx) = listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            listeners.remove(idx);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.inner.stats
    }

    /// Cancel the pending flush and drop all listeners.
    pub fn teardown(&self) {
        if let Some(handle) = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            self.inner.scheduler.cancel(handle);
            debug!("AttributeStore: cancelled pending flush");
        }
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Drop for AttributeStore {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::{ManualScheduler, Task, TimerScheduler};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::{Duration, Instant};

    fn store() -> (Arc<ManualScheduler>, AttributeStore) {
        let sched = Arc::new(ManualScheduler::new());
        let store = AttributeStore::new(sched.clone());
        (sched, store)
    }

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, Listener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let listener: Listener = Arc::new(move |g: u64| s.lock().unwrap().push(g));
        (seen, listener)
    }

    #[test]
    fn test_unchanged_writes_are_noops() {
        let (sched, store) = store();
        assert!(store.set(AttrKey::Timestamp, 1.0));
        sched.run_pending();
        let gen_before = store.generation();

        for _ in 0..10 {
            assert!(!store.set(AttrKey::Timestamp, 1.0));
        }
        assert_eq!(store.generation(), gen_before);
        assert!(!store.is_pending());
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_absent_key_reads_none() {
        let (_sched, store) = store();
        assert!(store.get(AttrKey::Metadata).is_none());
        assert_eq!(store.get_float(AttrKey::LookAhead), None);
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_burst_coalesces_into_one_flush() {
        let (sched, store) = store();
        let (seen, listener) = recorder();
        store.subscribe(listener);

        for i in 0..5 {
            store.set(AttrKey::Timestamp, i as f64);
        }
        store.set(AttrKey::LookAhead, 0.5);

        assert_eq!(sched.pending(), 1);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(sched.run_pending(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![6]);
        assert!(!store.is_pending());
        assert_eq!(store.stats().get(STAT_FLUSH), 1);
    }

    #[test]
    fn test_listener_order_and_duplicates() {
        let (sched, store) = store();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mk = |tag: &'static str| -> Listener {
            let o = Arc::clone(&order);
            Arc::new(move |_g: u64| o.lock().unwrap().push(tag))
        };
        let a = mk("a");
        let b = mk("b");
        store.subscribe(Arc::clone(&a));
        store.subscribe(Arc::clone(&b));
        store.subscribe(Arc::clone(&a));

        store.set(AttrKey::Timestamp, 1.0);
        sched.run_pending();
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "a"]);

        order.lock().unwrap().clear();
        store.unsubscribe(&a);
        store.set(AttrKey::Timestamp, 2.0);
        sched.run_pending();
        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_write_during_flush_arms_new_tick() {
        let sched = Arc::new(ManualScheduler::new());
        let store = Arc::new(AttributeStore::new(sched.clone()));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&store);
        let c = Arc::clone(&calls);
        store.subscribe(Arc::new(move |g: u64| {
            c.lock().unwrap().push(g);
            if g == 1
                && let Some(store) = weak.upgrade()
            {
                store.set(AttrKey::LookAhead, 2.0);
            }
        }));

        store.set(AttrKey::Timestamp, 1.0);
        assert_eq!(sched.run_pending(), 1);
        assert_eq!(*calls.lock().unwrap(), vec![1]);
        // Listener's write armed a distinct tick
        assert!(store.is_pending());
        assert_eq!(sched.run_pending(), 1);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
        assert_eq!(sched.run_pending(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_break_flush() {
        let (sched, store) = store();
        let (seen, listener) = recorder();
        store.subscribe(Arc::new(|g: u64| {
            if g > 0 {
                panic!("render failed");
            }
        }));
        store.subscribe(listener);

        store.set(AttrKey::Timestamp, 1.0);
        sched.run_pending();
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert!(!store.is_pending());
        assert_eq!(store.stats().get(STAT_CALLBACK_FAILURE), 1);

        // Store still arms ticks afterwards
        store.set(AttrKey::Timestamp, 2.0);
        assert!(store.is_pending());
        sched.run_pending();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_teardown_cancels_pending() {
        let (sched, store) = store();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        store.subscribe(Arc::new(move |_g: u64| {
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        store.set(AttrKey::Timestamp, 1.0);
        store.teardown();
        assert_eq!(sched.run_pending(), 0);
        assert_eq!(store.listener_count(), 0);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_prevents_late_flush() {
        let sched = Arc::new(ManualScheduler::new());
        {
            let store = AttributeStore::new(sched.clone());
            store.set(AttrKey::Timestamp, 1.0);
        }
        assert_eq!(sched.run_pending(), 0);
    }

    /// Timer scheduler that records whether its teardown completed.
    struct TrackedTimer {
        inner: Option<TimerScheduler>,
        dropped: Arc<AtomicBool>,
        clean: Arc<AtomicBool>,
    }

    impl Scheduler for TrackedTimer {
        fn schedule_once(&self, task: Task) -> TickHandle {
            self.inner.as_ref().expect("scheduler alive").schedule_once(task)
        }

        fn cancel(&self, handle: TickHandle) {
            if let Some(inner) = &self.inner {
                inner.cancel(handle);
            }
        }
    }

    impl Drop for TrackedTimer {
        fn drop(&mut self) {
            let inner = self.inner.take();
            let ok = catch_unwind(AssertUnwindSafe(move || drop(inner))).is_ok();
            self.clean.store(ok, Ordering::SeqCst);
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_store_dropped_during_timer_flush() {
        let dropped = Arc::new(AtomicBool::new(false));
        let clean = Arc::new(AtomicBool::new(false));
        let sched = TrackedTimer {
            inner: Some(TimerScheduler::from_millis(5)),
            dropped: Arc::clone(&dropped),
            clean: Arc::clone(&clean),
        };
        // The store holds the only reference to the scheduler
        let store = AttributeStore::new(Arc::new(sched));

        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
        store.subscribe(Arc::new(move |_g: u64| {
            let _ = entered_tx.send(());
            std::thread::sleep(Duration::from_millis(100));
        }));
        store.set(AttrKey::Timestamp, 1.0);

        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        drop(store);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !dropped.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(dropped.load(Ordering::SeqCst));
        assert!(clean.load(Ordering::SeqCst));
    }
}
