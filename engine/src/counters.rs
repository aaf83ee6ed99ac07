//! Per-filter pending counters.
//!
//! [`CounterStore`] is a plain map guarded by the engine's lock. The poll and
//! notification tasks never touch it directly: they go through a
//! [`CounterTarget`], which hands out a [`CounterScope`] for the duration of
//! one locked section and turns every effective change into a
//! `counterChanged` event.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::trace;

use crate::catalog::FilterCatalog;
use crate::events::{EngineEvent, ErrorDetail, EventBroadcaster};

/// Filter key to pending count.
///
/// Missing keys read as 0. Every mutator returns `true` only when the stored
/// value actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterStore {
    counts: HashMap<String, u64>,
}

impl CounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Overwrites the count for `key`.
    pub fn set(&mut self, key: &str, value: u64) -> bool {
        match self.counts.insert(key.to_string(), value) {
            Some(previous) => previous != value,
            None => value != 0,
        }
    }

    /// Adds `delta` to the count for `key`, saturating at `u64::MAX`.
    pub fn increment(&mut self, key: &str, delta: u64) -> bool {
        let count = self.counts.entry(key.to_string()).or_insert(0);
        let next = count.saturating_add(delta);
        let changed = next != *count;
        *count = next;
        changed
    }

    /// Sets the count for `key` to 0.
    pub fn reset(&mut self, key: &str) -> bool {
        self.set(key, 0)
    }

    /// Drops every entry whose key is not in `valid_keys`.
    ///
    /// Returns the number of entries removed.
    pub fn prune<'a>(&mut self, valid_keys: impl IntoIterator<Item = &'a str>) -> usize {
        let valid: HashSet<&str> = valid_keys.into_iter().collect();
        let before = self.counts.len();
        self.counts.retain(|key, _| valid.contains(key.as_str()));
        before - self.counts.len()
    }

    /// Drops every entry. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.counts.len();
        self.counts.clear();
        removed
    }

    /// A sorted copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Locked access to the counters and the state needed to apply an update.
///
/// Mutations emit `counterChanged` before the lock is released, so events
/// are observed in the same order as the updates.
pub struct CounterScope<'a> {
    catalog: &'a FilterCatalog,
    active_key: Option<&'a str>,
    poll_generation: u64,
    store: &'a mut CounterStore,
    events: &'a EventBroadcaster,
}

impl<'a> CounterScope<'a> {
    #[must_use]
    pub fn new(
        catalog: &'a FilterCatalog,
        active_key: Option<&'a str>,
        poll_generation: u64,
        store: &'a mut CounterStore,
        events: &'a EventBroadcaster,
    ) -> Self {
        Self {
            catalog,
            active_key,
            poll_generation,
            store,
            events,
        }
    }

    /// The catalog currently installed.
    #[must_use]
    pub fn catalog(&self) -> &FilterCatalog {
        self.catalog
    }

    /// Key of the active filter, if any.
    #[must_use]
    pub fn active_key(&self) -> Option<&str> {
        self.active_key
    }

    /// Generation of the poller whose results are currently accepted.
    #[must_use]
    pub fn poll_generation(&self) -> u64 {
        self.poll_generation
    }

    #[must_use]
    pub fn get(&self, key: &str) -> u64 {
        self.store.get(key)
    }

    pub fn set(&mut self, key: &str, value: u64) -> bool {
        let changed = self.store.set(key, value);
        self.notify(key, changed);
        changed
    }

    pub fn increment(&mut self, key: &str, delta: u64) -> bool {
        let changed = self.store.increment(key, delta);
        self.notify(key, changed);
        changed
    }

    pub fn reset(&mut self, key: &str) -> bool {
        let changed = self.store.reset(key);
        self.notify(key, changed);
        changed
    }

    fn notify(&self, key: &str, changed: bool) {
        if !changed {
            return;
        }
        let value = self.store.get(key);
        trace!(key, value, "Counter changed");
        self.events.emit(EngineEvent::CounterChanged {
            key: key.to_string(),
            value,
        });
    }
}

/// Where background tasks deliver counter updates and failures.
///
/// Updates and reports become no-ops once the owner is disposed.
pub trait CounterTarget: Send + Sync + 'static {
    /// Runs `f` with exclusive access to the counters.
    ///
    /// Returns `None` without calling `f` once the owner is disposed.
    fn with_counters<R>(&self, f: impl FnOnce(&mut CounterScope<'_>) -> R) -> Option<R>;

    /// Publishes a failure on the error channel.
    fn report(&self, error: ErrorDetail);

    /// Makes `generation` the only poll allowed to write.
    ///
    /// Called before the poll task is spawned. Targets that never poll can
    /// leave it as is.
    fn begin_poll(&self, _generation: u64) {}
}
