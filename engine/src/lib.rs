//! FilterSync Engine - filter resolution and live counter synchronization.
//!
//! Given the server-defined filters of an application context, the engine
//! decides which filter is active and keeps a pending count per filter fresh
//! through periodic polling and a live notification stream.
//!
//! # Overview
//!
//! A [`FilterSyncEngine`] loads a [`FilterCatalog`] from a [`FilterBackend`],
//! resolves the active filter with [`resolver::resolve`], polls the active
//! filter's count with a [`CounterPoller`] and routes notifications into the
//! [`CounterStore`] with a [`NotificationListener`]. Every state change is
//! published as an [`EngineEvent`].
//!
//! # Modules
//!
//! - [`types`]: Filters, selectors and notification events
//! - [`catalog`]: Filter catalogs and the backend trait
//! - [`resolver`]: Active-filter resolution
//! - [`counters`]: Counter store and locked counter access
//! - [`poller`]: Periodic counter refresh
//! - [`notifications`]: Notification routing and subscriptions
//! - [`engine`]: The orchestrating engine
//! - [`events`]: Engine events and their broadcaster
//! - [`retry`]: Exponential backoff
//! - [`http`]: HTTP backend
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types

pub mod catalog;
pub mod config;
pub mod counters;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod notifications;
pub mod poller;
pub mod resolver;
pub mod retry;
pub mod types;

pub use catalog::{FilterBackend, FilterCatalog};
pub use config::{Config, ConfigError};
pub use counters::{CounterScope, CounterStore, CounterTarget};
pub use engine::{EngineSettings, FilterSyncEngine};
pub use error::{EngineError, FetchError, Result, StreamError};
pub use events::{EngineEvent, ErrorDetail, ErrorKind, EventBroadcaster};
pub use http::{wait_until_reachable, HttpBackend};
pub use notifications::{
    HintRouting, NotificationListener, NotificationStream, RoutingRule, Subscription,
};
pub use poller::CounterPoller;
pub use retry::RetryPolicy;
pub use types::{Filter, MatchHints, NotificationEvent, Selector};
