//! The filter sync engine.
//!
//! [`FilterSyncEngine`] owns the catalog, the active filter and the counters
//! for one application context, and wires the resolver, the counter poller
//! and the notification listener together. All shared state sits behind a
//! single mutex that is never held across an `.await`; the background tasks
//! reach it through the [`CounterTarget`] implementation below.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use filtersync_engine::engine::{EngineSettings, FilterSyncEngine};
//! use filtersync_engine::http::HttpBackend;
//! use filtersync_engine::types::Selector;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(HttpBackend::new("http://localhost:8080")?);
//! let mut engine = FilterSyncEngine::new(backend, EngineSettings::default());
//! let mut events = engine.subscribe();
//!
//! engine.set_context("tasks").await?;
//! engine.select(Selector::by_key("mine"));
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info, warn};

use crate::catalog::{FilterBackend, FilterCatalog};
use crate::counters::{CounterScope, CounterStore, CounterTarget};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, ErrorDetail, EventBroadcaster, DEFAULT_EVENT_CAPACITY};
use crate::notifications::{NotificationListener, NotificationStream, RoutingRule, Subscription};
use crate::poller::CounterPoller;
use crate::resolver::resolve;
use crate::retry::RetryPolicy;
use crate::types::{Filter, Selector};

/// Default interval between counter polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime knobs for a [`FilterSyncEngine`], fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Interval between counter polls for the active filter.
    pub poll_interval: Duration,

    /// Whether notification streams may be attached.
    pub notifications_enabled: bool,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,

    /// Retry policy for catalog loads.
    pub load_retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            notifications_enabled: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            load_retry: RetryPolicy::default(),
        }
    }
}

/// Everything the background tasks may observe or mutate.
#[derive(Debug)]
struct SyncState {
    catalog: FilterCatalog,
    active: Option<Filter>,
    selector: Selector,
    counters: CounterStore,
    poll_generation: u64,
    disposed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SyncState>,
    events: EventBroadcaster,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SyncState {
    /// Makes `filter` active, zeroes its counter and announces it.
    fn activate(&mut self, filter: Filter, events: &EventBroadcaster) {
        let key = filter.key.clone();
        self.active = Some(filter.clone());
        let mut scope = CounterScope::new(
            &self.catalog,
            Some(key.as_str()),
            self.poll_generation,
            &mut self.counters,
            events,
        );
        scope.reset(&key);
        info!(filter = %key, "Filter activated");
        events.emit(EngineEvent::FilterSelected(filter));
    }

    /// Whether `filter` is the active filter, matched by id and key.
    fn is_active(&self, filter: &Filter) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.id == filter.id && active.key == filter.key)
    }
}

impl CounterTarget for Shared {
    fn with_counters<R>(&self, f: impl FnOnce(&mut CounterScope<'_>) -> R) -> Option<R> {
        let mut guard = self.lock();
        if guard.disposed {
            return None;
        }
        let state = &mut *guard;
        let mut scope = CounterScope::new(
            &state.catalog,
            state.active.as_ref().map(|filter| filter.key.as_str()),
            state.poll_generation,
            &mut state.counters,
            &self.events,
        );
        Some(f(&mut scope))
    }

    fn report(&self, error: ErrorDetail) {
        let state = self.lock();
        if !state.disposed {
            self.events.emit(EngineEvent::Error(error));
        }
    }

    fn begin_poll(&self, generation: u64) {
        self.lock().poll_generation = generation;
    }
}

/// Resolves the active filter and keeps its siblings' counters live.
///
/// Mutating operations take `&mut self`; there is one owner per engine.
/// Operations that start background work must run inside a Tokio runtime.
pub struct FilterSyncEngine {
    backend: Arc<dyn FilterBackend>,
    settings: EngineSettings,
    shared: Arc<Shared>,
    poller: CounterPoller,
    listener: NotificationListener,
    subscription: Option<Subscription>,
}

impl FilterSyncEngine {
    /// Creates an idle engine with an empty catalog.
    #[must_use]
    pub fn new(backend: Arc<dyn FilterBackend>, settings: EngineSettings) -> Self {
        let events = EventBroadcaster::with_capacity(settings.event_capacity.max(1));
        info!(
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            notifications = settings.notifications_enabled,
            "Filter sync engine created"
        );
        Self {
            backend,
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(SyncState {
                    catalog: FilterCatalog::empty(""),
                    active: None,
                    selector: Selector::none(),
                    counters: CounterStore::new(),
                    poll_generation: 0,
                    disposed: false,
                }),
                events,
            }),
            poller: CounterPoller::new(),
            listener: NotificationListener::default(),
            subscription: None,
        }
    }

    /// Replaces the notification routing rule used by future attachments.
    #[must_use]
    pub fn with_routing(mut self, rule: impl RoutingRule) -> Self {
        self.listener = NotificationListener::new(Arc::new(rule));
        self
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Subscribes to engine events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Loads the catalog for `context` and re-establishes the active filter.
    ///
    /// On failure an `error` event is emitted and the previous catalog,
    /// active filter and poller are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Fetch`] when every load attempt failed and
    /// [`EngineError::Disposed`] after [`dispose`](Self::dispose).
    pub async fn set_context(&mut self, context: &str) -> Result<()> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }

        let backend = self.backend.as_ref();
        let loaded = self
            .settings
            .load_retry
            .run("catalog load", || FilterCatalog::load(backend, context))
            .await;

        let catalog = match loaded {
            Ok(catalog) => catalog,
            Err(err) => {
                warn!(context, error = %err, "Catalog load failed, keeping previous state");
                self.shared.report(ErrorDetail::catalog_load(context, &err));
                return Err(err.into());
            }
        };

        let active = {
            let mut state = self.shared.lock();
            if state.disposed {
                return Err(EngineError::Disposed);
            }

            let context_changed = state.catalog.context() != catalog.context();
            if context_changed {
                let cleared = state.counters.clear();
                if cleared > 0 {
                    debug!(cleared, context, "Context changed, dropped all counters");
                }
            } else {
                let pruned = state.counters.prune(catalog.keys());
                if pruned > 0 {
                    debug!(pruned, "Dropped counters for removed filters");
                }
            }
            state.catalog = catalog.clone();
            self.shared.events.emit(EngineEvent::FiltersLoaded(catalog.clone()));

            let resolved = resolve(catalog.filters(), &state.selector).cloned();
            match resolved {
                Some(filter) if context_changed || !state.is_active(&filter) => {
                    state.activate(filter, &self.shared.events);
                }
                other => state.active = other,
            }
            state.active.clone()
        };

        match &active {
            Some(filter) => self.restart_poller(catalog.context(), filter),
            None => {
                debug!(context, "Empty catalog, no active filter");
                self.poller.stop();
            }
        }

        self.refresh_initial_counts(&catalog, active.as_ref()).await;
        Ok(())
    }

    /// Resolves `selector` and makes the result the active filter.
    ///
    /// The selector is remembered and reapplied on the next catalog load.
    /// Re-selecting the active filter only re-emits `filterSelected`.
    /// Returns `None`, emitting nothing, when the catalog is empty.
    pub fn select(&mut self, selector: Selector) -> Option<Filter> {
        let (filter, changed, context) = {
            let mut state = self.shared.lock();
            if state.disposed {
                debug!("Select after dispose ignored");
                return None;
            }
            state.selector = selector;
            let filter = resolve(state.catalog.filters(), &state.selector).cloned()?;
            let changed = !state.is_active(&filter);
            if changed {
                state.activate(filter.clone(), &self.shared.events);
            } else {
                self.shared.events.emit(EngineEvent::FilterSelected(filter.clone()));
            }
            (filter, changed, state.catalog.context().to_string())
        };

        if changed {
            self.restart_poller(&context, &filter);
        }
        Some(filter)
    }

    /// Selects the filter with id (or else key) `key_or_id` as a UI click.
    ///
    /// Emits `filterClicked` after the `filterSelected` of the selection.
    pub fn click(&mut self, key_or_id: &str) -> Option<Filter> {
        let filter = self.select(Selector::by_id_or_key(key_or_id))?;
        let state = self.shared.lock();
        if !state.disposed {
            self.shared.events.emit(EngineEvent::FilterClicked(filter.clone()));
        }
        Some(filter)
    }

    /// Starts routing `stream` into the counters.
    ///
    /// Replaces any previously attached stream. Returns `false` without
    /// consuming the stream when notifications are disabled or the engine
    /// is disposed.
    pub fn attach_notifications(&mut self, stream: NotificationStream) -> bool {
        if !self.settings.notifications_enabled {
            info!("Live notifications disabled, stream not attached");
            return false;
        }
        if self.is_disposed() {
            debug!("Attach after dispose ignored");
            return false;
        }
        if let Some(mut previous) = self.subscription.take() {
            previous.detach();
        }
        self.subscription = Some(self.listener.attach(stream, Arc::clone(&self.shared)));
        true
    }

    /// Stops all background work. Nothing is mutated or emitted afterwards.
    ///
    /// Calling it again does nothing. Also runs on drop.
    pub fn dispose(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
        }
        self.poller.stop();
        if let Some(mut subscription) = self.subscription.take() {
            subscription.detach();
        }
        info!("Filter sync engine disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    #[must_use]
    pub fn active_filter(&self) -> Option<Filter> {
        self.shared.lock().active.clone()
    }

    /// Pending count for `key`; 0 for unknown keys.
    #[must_use]
    pub fn counter(&self, key: &str) -> u64 {
        self.shared.lock().counters.get(key)
    }

    /// All counters, sorted by key.
    #[must_use]
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.shared.lock().counters.snapshot()
    }

    #[must_use]
    pub fn catalog(&self) -> FilterCatalog {
        self.shared.lock().catalog.clone()
    }

    /// Whether a poll task is currently running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Whether a notification stream is currently being consumed.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_attached)
    }

    fn restart_poller(&mut self, context: &str, filter: &Filter) {
        self.poller.start(
            context,
            filter.clone(),
            self.settings.poll_interval,
            Arc::clone(&self.backend),
            Arc::clone(&self.shared),
        );
    }

    /// Fetches counts for every `showCounter` filter except the active one.
    async fn refresh_initial_counts(&self, catalog: &FilterCatalog, active: Option<&Filter>) {
        let active_key = active.map(|filter| filter.key.as_str());
        let targets: Vec<&Filter> = catalog
            .filters()
            .iter()
            .filter(|filter| filter.show_counter && Some(filter.key.as_str()) != active_key)
            .collect();
        if targets.is_empty() {
            return;
        }

        let backend = self.backend.as_ref();
        let context = catalog.context();
        let results = join_all(targets.iter().map(|filter| async move {
            (*filter, backend.fetch_count(context, filter).await)
        }))
        .await;

        for (filter, result) in results {
            match result {
                Ok(count) => {
                    self.shared.with_counters(|scope| {
                        if scope.catalog().context() == context
                            && scope.catalog().contains_key(&filter.key)
                            && scope.active_key() != Some(filter.key.as_str())
                        {
                            scope.set(&filter.key, count);
                        }
                    });
                }
                Err(err) => {
                    warn!(filter = %filter.key, error = %err, "Initial count fetch failed");
                    self.shared.report(ErrorDetail::counter_fetch(&filter.key, &err));
                }
            }
        }
    }
}

impl Drop for FilterSyncEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for FilterSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterSyncEngine")
            .field("settings", &self.settings)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}
