//! Engine event emission.
//!
//! Every observable state change of a [`FilterSyncEngine`] is published as an
//! [`EngineEvent`] on a tokio broadcast channel. Subscribers that fall behind
//! receive `RecvError::Lagged` and continue from the oldest retained event.
//!
//! [`FilterSyncEngine`]: crate::engine::FilterSyncEngine

use std::fmt::Display;

use serde::Serialize;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::catalog::FilterCatalog;
use crate::types::Filter;

/// Default channel capacity for engine events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Which part of the engine produced an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Loading the filter catalog failed.
    CatalogLoad,
    /// Fetching a counter value failed.
    CounterFetch,
    /// The notification stream reported a failure.
    Notification,
}

/// Payload of an [`EngineEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,

    /// Filter the failure concerns, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_key: Option<String>,
}

impl ErrorDetail {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            filter_key: None,
        }
    }

    #[must_use]
    pub fn catalog_load(context: &str, error: &impl Display) -> Self {
        Self::new(
            ErrorKind::CatalogLoad,
            format!("failed to load filters for '{context}': {error}"),
        )
    }

    #[must_use]
    pub fn counter_fetch(filter_key: &str, error: &impl Display) -> Self {
        Self::new(ErrorKind::CounterFetch, error.to_string()).with_filter_key(filter_key)
    }

    #[must_use]
    pub fn notification(error: &impl Display) -> Self {
        Self::new(ErrorKind::Notification, error.to_string())
    }

    #[must_use]
    pub fn with_filter_key(mut self, key: impl Into<String>) -> Self {
        self.filter_key = Some(key.into());
        self
    }
}

/// Events published by the engine.
///
/// Serialized as `{"type": "...", "data": ...}` with camelCase type names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A catalog was loaded and installed.
    FiltersLoaded(FilterCatalog),

    /// A filter became (or was confirmed as) the active filter.
    FilterSelected(Filter),

    /// A filter was clicked. Always follows the matching `FilterSelected`.
    FilterClicked(Filter),

    /// A counter value changed.
    CounterChanged { key: String, value: u64 },

    Error(ErrorDetail),
}

impl EngineEvent {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FiltersLoaded(_) => "filtersLoaded",
            Self::FilterSelected(_) => "filterSelected",
            Self::FilterClicked(_) => "filterClicked",
            Self::CounterChanged { .. } => "counterChanged",
            Self::Error(_) => "error",
        }
    }
}

/// Fan-out of [`EngineEvent`]s to any number of subscribers.
///
/// Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: Sender<EngineEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster holding up to `capacity` undelivered events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created engine event broadcaster");
        Self { sender }
    }

    /// Subscribes to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let rx = self.sender.subscribe();
        debug!(
            subscriber_count = self.subscriber_count(),
            "New engine subscriber added"
        );
        rx
    }

    /// Publishes `event`, returning how many subscribers will see it.
    ///
    /// Emitting with no subscribers is normal and drops the event.
    pub fn emit(&self, event: EngineEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(event = name, receivers, "Engine event emitted");
                receivers
            }
            Err(_) => {
                trace!(event = name, "No subscribers for engine event");
                0
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}
