//! Filter catalogs and the backend they are loaded from.
//!
//! A [`FilterCatalog`] is the ordered list of filters for one application
//! context. Catalogs are replaced wholesale on every reload; nothing mutates
//! a loaded catalog.

use std::sync::Arc;

use async_trait::async_trait;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::{debug, info};

use crate::error::FetchError;
use crate::types::Filter;

/// Source of filter catalogs and counter values.
///
/// Implementations surface failures as [`FetchError`] and never retry;
/// retrying is the caller's decision.
#[async_trait]
pub trait FilterBackend: Send + Sync + 'static {
    /// Fetches the ordered filter list for `context`.
    async fn fetch_filters(&self, context: &str) -> Result<Vec<Filter>, FetchError>;

    /// Fetches the current pending count for `filter` in `context`.
    async fn fetch_count(&self, context: &str, filter: &Filter) -> Result<u64, FetchError>;
}

/// The ordered filters of one application context.
///
/// Cloning is cheap: the filter list is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCatalog {
    context: String,
    filters: Arc<[Filter]>,
}

impl FilterCatalog {
    /// Builds a catalog from already-fetched filters.
    #[must_use]
    pub fn new(context: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            context: context.into(),
            filters: filters.into(),
        }
    }

    /// An empty catalog for `context`.
    #[must_use]
    pub fn empty(context: impl Into<String>) -> Self {
        Self::new(context, Vec::new())
    }

    /// Loads the catalog for `context` from `backend`.
    ///
    /// A blank context yields an empty catalog without contacting the
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`FetchError`] unchanged.
    pub async fn load(backend: &dyn FilterBackend, context: &str) -> Result<Self, FetchError> {
        let context = context.trim();
        if context.is_empty() {
            debug!("No application context, skipping catalog fetch");
            return Ok(Self::empty(context));
        }

        let filters = backend.fetch_filters(context).await?;
        info!(context, filters = filters.len(), "Filter catalog loaded");
        Ok(Self::new(context, filters))
    }

    /// The application context this catalog belongs to.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }

    /// The filters in catalog order.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Looks up a filter by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Filter> {
        self.filters.iter().find(|filter| filter.key == key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates over the filter keys in catalog order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|filter| filter.key.as_str())
    }
}

impl Serialize for FilterCatalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FilterCatalog", 2)?;
        state.serialize_field("context", &self.context)?;
        state.serialize_field("filters", &*self.filters)?;
        state.end()
    }
}
