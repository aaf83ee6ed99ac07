//! Core value types shared by the engine and its backends.
//!
//! All wire types serialize to camelCase JSON so they round-trip with the
//! filter backend unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, server-defined query used to partition a task or process list.
///
/// Filters are immutable value objects once fetched. Their position in the
/// catalog is their implicit index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Backend-stable identifier.
    pub id: String,

    /// Human-stable slug, unique within a catalog.
    pub key: String,

    /// Display name. Not guaranteed to be unique.
    pub name: String,

    /// Optional display icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Whether the filter's counter is fetched when the catalog loads.
    #[serde(default)]
    pub show_counter: bool,

    /// Task status this filter selects, used for attribute routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Task assignee this filter selects, used for attribute routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl Filter {
    /// Creates a filter with only the identifying fields set.
    ///
    /// # Examples
    ///
    /// ```
    /// use filtersync_engine::types::Filter;
    ///
    /// let filter = Filter::new("1", "all", "All tasks");
    /// assert_eq!(filter.key, "all");
    /// assert!(!filter.show_counter);
    /// ```
    #[must_use]
    pub fn new(id: impl Into<String>, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            name: name.into(),
            icon: None,
            show_counter: false,
            status: None,
            assignee: None,
        }
    }

    /// Marks the filter as carrying a counter on initial load.
    #[must_use]
    pub fn with_counter(mut self) -> Self {
        self.show_counter = true;
        self
    }

    /// Sets the display icon.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Sets the task status attribute.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the task assignee attribute.
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }
}

/// Caller-supplied criterion used to pick a filter from a catalog.
///
/// Normally exactly one field is set. When several are set, resolution tries
/// them in the fixed order `id`, `key`, `name`, `index`. An empty selector
/// means "use the default filter".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Zero-based catalog position. Negative values never match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

impl Selector {
    /// The empty selector, resolving to the default filter.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn by_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn by_index(index: i64) -> Self {
        Self {
            index: Some(index),
            ..Self::default()
        }
    }

    /// Matches `value` as an id first and as a key second.
    ///
    /// Used for UI clicks, which may carry either identifier.
    #[must_use]
    pub fn by_id_or_key(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            id: Some(value.clone()),
            key: Some(value),
            ..Self::default()
        }
    }

    /// Returns `true` if no criterion is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.key.is_none() && self.name.is_none() && self.index.is_none()
    }
}

/// Routing hints carried by a notification.
///
/// Routing rules match these against the catalog to decide which filter's
/// counter a notification affects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchHints {
    /// Filter keys the producer already knows the event belongs to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,

    /// Status of the task or process after the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Assignee of the task after the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

/// An out-of-band event announcing new or changed work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Monotonic sequence number assigned by the transport.
    pub sequence: u64,

    /// Identifier of the task or process the event is about.
    pub subject_id: String,

    /// Producer-defined event type (e.g. `TASK_ASSIGNED`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// When the event was produced.
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub hints: MatchHints,
}

impl NotificationEvent {
    /// Creates an event with no hints, timestamped now.
    #[must_use]
    pub fn new(sequence: u64, subject_id: impl Into<String>) -> Self {
        Self {
            sequence,
            subject_id: subject_id.into(),
            event_type: None,
            timestamp: Utc::now(),
            hints: MatchHints::default(),
        }
    }

    /// Adds a filter-key hint.
    #[must_use]
    pub fn with_key_hint(mut self, key: impl Into<String>) -> Self {
        self.hints.keys.push(key.into());
        self
    }

    /// Sets the status hint.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.hints.status = Some(status.into());
        self
    }

    /// Sets the assignee hint.
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.hints.assignee = Some(assignee.into());
        self
    }

    /// Sets the event type.
    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }
}
