//! Notification broadcasting for the FilterSync server.
//!
//! Every posted notification is stamped with a hub-wide sequence number and
//! fanned out over a tokio broadcast channel. Streaming clients subscribe per
//! application through [`AppSubscription`], which skips other applications'
//! events and rides over lag.
//!
//! # Example
//!
//! ```rust
//! use filtersync_server::broadcast::NotificationHub;
//! use filtersync_engine::MatchHints;
//!
//! let hub = NotificationHub::new();
//! let _sub = hub.subscribe("tasks");
//!
//! let event = hub.publish("tasks", "task-1", None, MatchHints::default());
//! assert_eq!(event.sequence, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace, warn};

use filtersync_engine::types::{MatchHints, NotificationEvent};

/// Default channel capacity.
///
/// Subscribers further behind than this skip the missed events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// A notification tagged with the application it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppNotification {
    pub app: String,
    pub event: NotificationEvent,
}

/// Central fan-out hub for notifications of all applications.
///
/// Cheap to clone; clones share the channel and the sequence counter.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    sender: Sender<AppNotification>,
    sequence: Arc<AtomicU64>,
}

impl NotificationHub {
    /// Creates a hub with [`DEFAULT_CHANNEL_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a hub with the given channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created notification hub");
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribes to the notifications of `app` posted from now on.
    #[must_use]
    pub fn subscribe(&self, app: impl Into<String>) -> AppSubscription {
        let app = app.into();
        let receiver = self.sender.subscribe();
        debug!(
            app = %app,
            subscriber_count = self.subscriber_count(),
            "New notification subscriber"
        );
        AppSubscription { app, receiver }
    }

    /// Stamps a notification with the next sequence number and the current
    /// time, then broadcasts it.
    ///
    /// Returns the stamped event.
    pub fn publish(
        &self,
        app: &str,
        subject_id: impl Into<String>,
        event_type: Option<String>,
        hints: MatchHints,
    ) -> NotificationEvent {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = NotificationEvent {
            sequence,
            subject_id: subject_id.into(),
            event_type,
            timestamp: Utc::now(),
            hints,
        };

        let notification = AppNotification {
            app: app.to_string(),
            event: event.clone(),
        };
        match self.sender.send(notification) {
            Ok(receivers) => trace!(app, sequence, receivers, "Notification broadcast"),
            Err(_) => trace!(app, sequence, "No active notification subscribers"),
        }
        event
    }

    /// Sequence number of the most recently published notification.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions across all applications.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver limited to one application's notifications.
#[derive(Debug)]
pub struct AppSubscription {
    app: String,
    receiver: Receiver<AppNotification>,
}

impl AppSubscription {
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Waits for the next notification of this application.
    ///
    /// Returns `None` once the hub is gone. Lag is logged and skipped.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if notification.app == self.app => {
                    return Some(notification.event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(app = %self.app, missed, "Notification subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
