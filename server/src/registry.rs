//! In-memory filter registry.
//!
//! Holds, per application, the ordered filter catalog and the stored count
//! of every filter. Counts are plain numbers; a notification bumps the count
//! of each hinted key the catalog contains.
//!
//! The registry can be seeded from a JSON file of the form:
//!
//! ```json
//! {
//!   "apps": {
//!     "tasks": {
//!       "filters": [{"id": "1", "key": "all", "name": "All"}],
//!       "counts": {"all": 12}
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;
use tracing::{debug, info, trace};

use filtersync_engine::types::{Filter, MatchHints};

use crate::error::{ApiError, ConfigError};

#[derive(Debug, Default)]
struct AppData {
    filters: Vec<Filter>,
    counts: HashMap<String, u64>,
}

/// Seed file contents.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub apps: BTreeMap<String, SeedApp>,
}

/// One application's seed data.
#[derive(Debug, Default, Deserialize)]
pub struct SeedApp {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
}

/// Thread-safe store of catalogs and counts keyed by application.
#[derive(Debug, Default)]
pub struct Registry {
    apps: RwLock<HashMap<String, AppData>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from parsed seed data.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if a seeded catalog is invalid.
    pub fn from_seed(seed: Seed) -> Result<Self, ApiError> {
        let registry = Self::new();
        for (app, data) in seed.apps {
            registry.replace_filters(&app, data.filters)?;
            for (key, count) in data.counts {
                registry.set_count(&app, &key, count)?;
            }
        }
        Ok(registry)
    }

    /// Reads and applies a seed file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Seed`] if the file cannot be read, parsed, or
    /// holds an invalid catalog.
    pub fn load_seed_file(path: &Path) -> Result<Self, ConfigError> {
        let seed_error = |message: String| ConfigError::Seed {
            path: path.display().to_string(),
            message,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| seed_error(e.to_string()))?;
        let seed: Seed = serde_json::from_str(&raw).map_err(|e| seed_error(e.to_string()))?;
        let apps = seed.apps.len();
        let registry = Self::from_seed(seed).map_err(|e| seed_error(e.to_string()))?;

        info!(path = %path.display(), apps, "Loaded seed file");
        Ok(registry)
    }

    /// The catalog of `app`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown application.
    pub fn filters(&self, app: &str) -> Result<Vec<Filter>, ApiError> {
        let apps = self.apps.read().unwrap_or_else(PoisonError::into_inner);
        apps.get(app)
            .map(|data| data.filters.clone())
            .ok_or_else(|| unknown_app(app))
    }

    /// Whether `app` has a catalog.
    #[must_use]
    pub fn contains_app(&self, app: &str) -> bool {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(app)
    }

    /// Replaces the catalog of `app`, creating the application if needed.
    ///
    /// Counts of filters no longer in the catalog are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if a key is empty or an id or key
    /// appears twice.
    pub fn replace_filters(&self, app: &str, filters: Vec<Filter>) -> Result<(), ApiError> {
        validate_catalog(&filters)?;

        let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
        let data = apps.entry(app.to_string()).or_default();
        data.counts
            .retain(|key, _| filters.iter().any(|f| &f.key == key));
        debug!(app, filters = filters.len(), "Catalog replaced");
        data.filters = filters;
        Ok(())
    }

    /// Stored count of filter `key`. A filter never counted reads as 0.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown application or key.
    pub fn count(&self, app: &str, key: &str) -> Result<u64, ApiError> {
        let apps = self.apps.read().unwrap_or_else(PoisonError::into_inner);
        let data = apps.get(app).ok_or_else(|| unknown_app(app))?;
        if !data.filters.iter().any(|f| f.key == key) {
            return Err(unknown_filter(app, key));
        }
        Ok(data.counts.get(key).copied().unwrap_or(0))
    }

    /// Overwrites the stored count of filter `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown application or key.
    pub fn set_count(&self, app: &str, key: &str, count: u64) -> Result<(), ApiError> {
        let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
        let data = apps.get_mut(app).ok_or_else(|| unknown_app(app))?;
        if !data.filters.iter().any(|f| f.key == key) {
            return Err(unknown_filter(app, key));
        }
        data.counts.insert(key.to_string(), count);
        trace!(app, key, count, "Count set");
        Ok(())
    }

    /// Increments the count of every hinted key present in the catalog.
    ///
    /// Returns the keys that were bumped, each at most once.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown application.
    pub fn record_notification(
        &self,
        app: &str,
        hints: &MatchHints,
    ) -> Result<Vec<String>, ApiError> {
        let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
        let data = apps.get_mut(app).ok_or_else(|| unknown_app(app))?;

        let mut bumped = Vec::new();
        for key in &hints.keys {
            if bumped.contains(key) || !data.filters.iter().any(|f| &f.key == key) {
                continue;
            }
            let count = data.counts.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            bumped.push(key.clone());
        }

        trace!(app, ?bumped, "Notification recorded");
        Ok(bumped)
    }

    /// Number of known applications.
    #[must_use]
    pub fn app_count(&self) -> usize {
        self.apps.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn validate_catalog(filters: &[Filter]) -> Result<(), ApiError> {
    let mut ids = HashSet::new();
    let mut keys = HashSet::new();
    for filter in filters {
        if filter.key.trim().is_empty() {
            return Err(ApiError::validation(format!(
                "filter '{}' has an empty key",
                filter.id
            )));
        }
        if !ids.insert(filter.id.as_str()) {
            return Err(ApiError::validation(format!(
                "duplicate filter id '{}'",
                filter.id
            )));
        }
        if !keys.insert(filter.key.as_str()) {
            return Err(ApiError::validation(format!(
                "duplicate filter key '{}'",
                filter.key
            )));
        }
    }
    Ok(())
}

fn unknown_app(app: &str) -> ApiError {
    ApiError::not_found(format!("unknown application '{app}'"))
}

fn unknown_filter(app: &str, key: &str) -> ApiError {
    ApiError::not_found(format!("unknown filter '{key}' in application '{app}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Filter> {
        vec![
            Filter::new("1", "all", "All"),
            Filter::new("2", "mine", "Mine").with_counter(),
            Filter::new("3", "done", "Done"),
        ]
    }

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.replace_filters("tasks", catalog()).unwrap();
        registry
    }

    #[test]
    fn unknown_app_is_not_found() {
        let registry = Registry::new();
        assert!(matches!(
            registry.filters("tasks"),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            registry.count("tasks", "all"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn filters_keep_order() {
        let keys: Vec<String> = registry()
            .filters("tasks")
            .unwrap()
            .into_iter()
            .map(|f| f.key)
            .collect();
        assert_eq!(keys, vec!["all", "mine", "done"]);
    }

    #[test]
    fn rejects_duplicate_keys_and_ids() {
        let registry = Registry::new();
        let dup_key = vec![Filter::new("1", "a", "A"), Filter::new("2", "a", "B")];
        let dup_id = vec![Filter::new("1", "a", "A"), Filter::new("1", "b", "B")];
        let empty_key = vec![Filter::new("1", " ", "A")];

        assert!(matches!(
            registry.replace_filters("x", dup_key),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            registry.replace_filters("x", dup_id),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            registry.replace_filters("x", empty_key),
            Err(ApiError::Validation(_))
        ));
        assert!(!registry.contains_app("x"));
    }

    #[test]
    fn empty_catalog_is_a_known_app() {
        let registry = Registry::new();
        registry.replace_filters("empty", Vec::new()).unwrap();
        assert!(registry.filters("empty").unwrap().is_empty());
    }

    #[test]
    fn counts_default_to_zero_and_can_be_set() {
        let registry = registry();
        assert_eq!(registry.count("tasks", "mine").unwrap(), 0);

        registry.set_count("tasks", "mine", 7).unwrap();
        assert_eq!(registry.count("tasks", "mine").unwrap(), 7);
        assert!(matches!(
            registry.set_count("tasks", "nope", 1),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn replacing_catalog_drops_orphaned_counts() {
        let registry = registry();
        registry.set_count("tasks", "mine", 3).unwrap();
        registry.set_count("tasks", "done", 4).unwrap();

        registry
            .replace_filters("tasks", vec![Filter::new("2", "mine", "Mine")])
            .unwrap();
        assert_eq!(registry.count("tasks", "mine").unwrap(), 3);

        registry.replace_filters("tasks", catalog()).unwrap();
        assert_eq!(registry.count("tasks", "done").unwrap(), 0);
    }

    #[test]
    fn notification_bumps_each_known_hinted_key_once() {
        let registry = registry();
        let hints = MatchHints {
            keys: ["mine", "mine", "ghost", "done"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..MatchHints::default()
        };

        let bumped = registry.record_notification("tasks", &hints).unwrap();
        assert_eq!(bumped, vec!["mine".to_string(), "done".to_string()]);
        assert_eq!(registry.count("tasks", "mine").unwrap(), 1);
        assert_eq!(registry.count("tasks", "done").unwrap(), 1);
        assert_eq!(registry.count("tasks", "all").unwrap(), 0);
    }

    #[test]
    fn notification_for_unknown_app_is_not_found() {
        let registry = Registry::new();
        assert!(matches!(
            registry.record_notification("tasks", &MatchHints::default()),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn seed_populates_catalogs_and_counts() {
        let seed: Seed = serde_json::from_str(
            r#"{
                "apps": {
                    "tasks": {
                        "filters": [
                            {"id": "1", "key": "all", "name": "All"},
                            {"id": "2", "key": "mine", "name": "Mine", "showCounter": true}
                        ],
                        "counts": {"mine": 5}
                    },
                    "processes": {}
                }
            }"#,
        )
        .unwrap();

        let registry = Registry::from_seed(seed).unwrap();
        assert_eq!(registry.app_count(), 2);
        assert_eq!(registry.count("tasks", "mine").unwrap(), 5);
        assert!(registry.filters("processes").unwrap().is_empty());
    }

    #[test]
    fn seed_count_for_unknown_key_is_rejected() {
        let seed: Seed = serde_json::from_str(
            r#"{"apps": {"tasks": {"filters": [], "counts": {"ghost": 1}}}}"#,
        )
        .unwrap();
        assert!(Registry::from_seed(seed).is_err());
    }

    #[test]
    fn missing_seed_file_is_a_config_error() {
        let err = Registry::load_seed_file(Path::new("/nonexistent/seed.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Seed { .. }));
    }
}
