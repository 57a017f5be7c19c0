//! Named diagnostic counters.
//!
//! Purely observational: nothing in the loader reads these back to make a
//! decision. Counter names follow `loader-<event>` for bus emissions.

use indexmap::IndexMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Flushes delivered by the attribute store
pub const STAT_FLUSH: &str = "loader-flush";
/// Listener or event callbacks that panicked
pub const STAT_CALLBACK_FAILURE: &str = "loader-callback-failure";

/// Thread-safe counter registry, iterated in first-use order.
#[derive(Debug, Default)]
pub struct Stats {
    counters: RwLock<IndexMap<String, AtomicU64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `name` by one and return the new count
    pub fn increment(&self, name: &str) -> u64 {
        self.add(name, 1)
    }

    /// Add `n` to `name` and return the new count
    pub fn add(&self, name: &str, n: u64) -> u64 {
        // Fast path: counter already exists, read lock only
        if let Some(c) = self.counters.read().unwrap_or_else(|e| e.into_inner()).get(name) {
            return c.fetch_add(n, Ordering::Relaxed) + n;
        }
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        let c = counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        c.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All counters in first-use order
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn reset(&self) {
        self.counters.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
