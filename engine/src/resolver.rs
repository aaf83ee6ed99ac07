//! Active-filter resolution.
//!
//! [`resolve`] is the single place that decides which filter a selector
//! picks. Criteria are tried in the fixed order id, key, name, index; when
//! none of them matches (or the selector is empty) the first filter in the
//! catalog wins. The result is only `None` when the catalog is empty.

use tracing::trace;

use crate::types::{Filter, Selector};

/// Resolves `selector` against the ordered `catalog`.
///
/// An out-of-range or negative index is treated as "no match" and falls
/// through to the default, never as an error.
///
/// # Examples
///
/// ```
/// use filtersync_engine::resolver::resolve;
/// use filtersync_engine::types::{Filter, Selector};
///
/// let catalog = vec![
///     Filter::new("1", "all", "All"),
///     Filter::new("2", "mine", "Mine"),
///     Filter::new("3", "done", "Done"),
/// ];
///
/// assert_eq!(resolve(&catalog, &Selector::by_index(2)).unwrap().key, "done");
/// assert_eq!(resolve(&catalog, &Selector::by_key("nope")).unwrap().key, "all");
/// assert!(resolve(&[], &Selector::none()).is_none());
/// ```
#[must_use]
pub fn resolve<'a>(catalog: &'a [Filter], selector: &Selector) -> Option<&'a Filter> {
    let matched = by_id(catalog, selector)
        .or_else(|| by_key(catalog, selector))
        .or_else(|| by_name(catalog, selector))
        .or_else(|| by_index(catalog, selector));

    if matched.is_none() && !selector.is_empty() {
        trace!(?selector, "Selector matched no filter, using default");
    }

    matched.or_else(|| catalog.first())
}

fn by_id<'a>(catalog: &'a [Filter], selector: &Selector) -> Option<&'a Filter> {
    let id = selector.id.as_deref()?;
    catalog.iter().find(|filter| filter.id == id)
}

fn by_key<'a>(catalog: &'a [Filter], selector: &Selector) -> Option<&'a Filter> {
    let key = selector.key.as_deref()?;
    catalog.iter().find(|filter| filter.key == key)
}

fn by_name<'a>(catalog: &'a [Filter], selector: &Selector) -> Option<&'a Filter> {
    let name = selector.name.as_deref()?;
    catalog.iter().find(|filter| filter.name == name)
}

fn by_index<'a>(catalog: &'a [Filter], selector: &Selector) -> Option<&'a Filter> {
    let index = usize::try_from(selector.index?).ok()?;
    catalog.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Filter> {
        vec![
            Filter::new("10", "fake-involved-tasks", "FakeInvolvedTasks"),
            Filter::new("11", "fake-my-tasks1", "FakeMyTasks1"),
            Filter::new("12", "fake-my-tasks2", "FakeMyTasks2"),
        ]
    }

    #[test]
    fn empty_selector_picks_first_filter() {
        let catalog = catalog();
        let resolved = resolve(&catalog, &Selector::none()).unwrap();
        assert_eq!(resolved.name, "FakeInvolvedTasks");
    }

    #[test]
    fn empty_catalog_resolves_to_none() {
        assert!(resolve(&[], &Selector::none()).is_none());
        assert!(resolve(&[], &Selector::by_index(0)).is_none());
        assert!(resolve(&[], &Selector::by_key("anything")).is_none());
    }

    #[test]
    fn resolves_each_criterion() {
        let catalog = catalog();
        assert_eq!(resolve(&catalog, &Selector::by_id("12")).unwrap().key, "fake-my-tasks2");
        assert_eq!(
            resolve(&catalog, &Selector::by_key("fake-my-tasks2")).unwrap().id,
            "12"
        );
        assert_eq!(
            resolve(&catalog, &Selector::by_name("FakeMyTasks1")).unwrap().id,
            "11"
        );
        assert_eq!(resolve(&catalog, &Selector::by_index(2)).unwrap().id, "12");
    }

    #[test]
    fn unmatched_name_falls_back_to_first() {
        let catalog = catalog();
        let resolved = resolve(&catalog, &Selector::by_name("UnexistableFilter")).unwrap();
        assert_eq!(resolved.name, "FakeInvolvedTasks");
    }

    #[test]
    fn out_of_range_index_falls_back_to_first() {
        let catalog = catalog();
        assert_eq!(resolve(&catalog, &Selector::by_index(3)).unwrap().id, "10");
        assert_eq!(resolve(&catalog, &Selector::by_index(-1)).unwrap().id, "10");
        assert_eq!(resolve(&catalog, &Selector::by_index(i64::MAX)).unwrap().id, "10");
    }

    #[test]
    fn id_wins_over_conflicting_criteria() {
        let catalog = catalog();
        let selector = Selector {
            id: Some("12".to_string()),
            key: Some("fake-my-tasks1".to_string()),
            name: Some("FakeInvolvedTasks".to_string()),
            index: Some(0),
        };
        assert_eq!(resolve(&catalog, &selector).unwrap().id, "12");
    }

    #[test]
    fn key_wins_over_name_and_index() {
        let catalog = catalog();
        let selector = Selector {
            id: None,
            key: Some("fake-my-tasks1".to_string()),
            name: Some("FakeMyTasks2".to_string()),
            index: Some(0),
        };
        assert_eq!(resolve(&catalog, &selector).unwrap().id, "11");
    }

    #[test]
    fn failed_criterion_falls_through_to_next() {
        let catalog = catalog();
        let selector = Selector {
            id: Some("missing".to_string()),
            key: Some("missing".to_string()),
            name: None,
            index: Some(1),
        };
        assert_eq!(resolve(&catalog, &selector).unwrap().id, "11");
    }

    #[test]
    fn duplicate_names_resolve_to_first_occurrence() {
        let catalog = vec![
            Filter::new("1", "a", "Same"),
            Filter::new("2", "b", "Same"),
        ];
        assert_eq!(resolve(&catalog, &Selector::by_name("Same")).unwrap().id, "1");
    }

    #[test]
    fn id_or_key_selector_matches_key_when_id_unknown() {
        let catalog = catalog();
        let resolved = resolve(&catalog, &Selector::by_id_or_key("fake-my-tasks1")).unwrap();
        assert_eq!(resolved.id, "11");
    }
}
