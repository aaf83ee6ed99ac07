//! Live notification routing.
//!
//! A [`NotificationListener`] consumes a [`NotificationStream`] in a single
//! background task, routes every event to at most one filter through a
//! [`RoutingRule`], and bumps that filter's counter unless it is the active
//! filter. The active-filter check and the increment happen under the same
//! lock, so an event racing a selection change is either counted against the
//! old selection or dropped for the new one, never both.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::counters::{CounterScope, CounterTarget};
use crate::error::StreamError;
use crate::events::ErrorDetail;
use crate::types::{Filter, NotificationEvent};

/// Push stream of notification events.
///
/// Items are processed one at a time in arrival order. An `Err` item is
/// reported and skipped; the stream ending ends the subscription.
pub type NotificationStream = BoxStream<'static, Result<NotificationEvent, StreamError>>;

/// Decides which filter, if any, a notification belongs to.
pub trait RoutingRule: Send + Sync + 'static {
    /// Returns the key of the filter whose counter `event` should bump.
    fn route(&self, event: &NotificationEvent, catalog: &[Filter]) -> Option<String>;
}

impl<F> RoutingRule for F
where
    F: Fn(&NotificationEvent, &[Filter]) -> Option<String> + Send + Sync + 'static,
{
    fn route(&self, event: &NotificationEvent, catalog: &[Filter]) -> Option<String> {
        self(event, catalog)
    }
}

/// Routes by the hints carried on the event.
///
/// An explicit key hint wins: the first filter in catalog order whose key is
/// listed. Otherwise the first filter that declares a status and/or assignee
/// and whose declared attributes all equal the event's hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct HintRouting;

impl RoutingRule for HintRouting {
    fn route(&self, event: &NotificationEvent, catalog: &[Filter]) -> Option<String> {
        let hints = &event.hints;

        let by_key = catalog
            .iter()
            .find(|filter| hints.keys.iter().any(|key| *key == filter.key));
        if let Some(filter) = by_key {
            return Some(filter.key.clone());
        }

        catalog
            .iter()
            .find(|filter| {
                if filter.status.is_none() && filter.assignee.is_none() {
                    return false;
                }
                let status_ok = filter.status.is_none() || filter.status == hints.status;
                let assignee_ok = filter.assignee.is_none() || filter.assignee == hints.assignee;
                status_ok && assignee_ok
            })
            .map(|filter| filter.key.clone())
    }
}

/// What happened to one routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Counted,
    Active,
    Unrouted,
}

/// Attaches notification streams to a counter target.
#[derive(Clone)]
pub struct NotificationListener {
    rule: Arc<dyn RoutingRule>,
}

impl NotificationListener {
    #[must_use]
    pub fn new(rule: Arc<dyn RoutingRule>) -> Self {
        Self { rule }
    }

    /// Spawns a task applying every event of `stream` to `target`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach<T: CounterTarget>(&self, stream: NotificationStream, target: Arc<T>) -> Subscription {
        let rule = Arc::clone(&self.rule);
        let task = tokio::spawn(listen(stream, rule, target));
        info!("Notification listener attached");
        Subscription { task: Some(task) }
    }
}

impl Default for NotificationListener {
    fn default() -> Self {
        Self::new(Arc::new(HintRouting))
    }
}

impl std::fmt::Debug for NotificationListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationListener").finish_non_exhaustive()
    }
}

/// Handle to an attached stream. Dropping it detaches.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stops consuming the stream. Detaching twice does nothing.
    pub fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Notification listener detached");
        }
    }

    /// Whether the listener task is still consuming the stream.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn listen<T: CounterTarget>(
    mut stream: NotificationStream,
    rule: Arc<dyn RoutingRule>,
    target: Arc<T>,
) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                let Some(outcome) = target.with_counters(|scope| apply(rule.as_ref(), &event, scope)) else {
                    debug!("Counter target disposed, listener exiting");
                    return;
                };
                trace!(sequence = event.sequence, subject = %event.subject_id, ?outcome, "Notification processed");
            }
            Err(err) => {
                warn!(error = %err, "Notification stream error");
                target.report(ErrorDetail::notification(&err));
            }
        }
    }
    info!("Notification stream ended");
}

fn apply(rule: &dyn RoutingRule, event: &NotificationEvent, scope: &mut CounterScope<'_>) -> Outcome {
    let Some(key) = rule.route(event, scope.catalog().filters()) else {
        return Outcome::Unrouted;
    };
    if !scope.catalog().contains_key(&key) {
        debug!(key, "Notification routed to unknown filter, ignoring");
        return Outcome::Unrouted;
    }
    if scope.active_key() == Some(key.as_str()) {
        return Outcome::Active;
    }
    scope.increment(&key, 1);
    Outcome::Counted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::stream;
    use tokio::sync::mpsc;

    use crate::catalog::FilterCatalog;
    use crate::counters::CounterStore;
    use crate::events::{EngineEvent, ErrorKind, EventBroadcaster};

    struct TestState {
        catalog: FilterCatalog,
        active: Option<String>,
        store: CounterStore,
        disposed: bool,
    }

    struct TestTarget {
        state: Mutex<TestState>,
        events: EventBroadcaster,
    }

    impl TestTarget {
        fn new(active: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(TestState {
                    catalog: FilterCatalog::new("app", catalog()),
                    active: active.map(str::to_string),
                    store: CounterStore::new(),
                    disposed: false,
                }),
                events: EventBroadcaster::with_capacity(64),
            })
        }

        fn count(&self, key: &str) -> u64 {
            self.state.lock().unwrap().store.get(key)
        }
    }

    impl CounterTarget for TestTarget {
        fn with_counters<R>(&self, f: impl FnOnce(&mut CounterScope<'_>) -> R) -> Option<R> {
            let mut guard = self.state.lock().unwrap();
            if guard.disposed {
                return None;
            }
            let state = &mut *guard;
            let mut scope = CounterScope::new(
                &state.catalog,
                state.active.as_deref(),
                0,
                &mut state.store,
                &self.events,
            );
            Some(f(&mut scope))
        }

        fn report(&self, error: ErrorDetail) {
            self.events.emit(EngineEvent::Error(error));
        }
    }

    fn catalog() -> Vec<Filter> {
        vec![
            Filter::new("1", "all", "All"),
            Filter::new("2", "mine", "Mine").with_assignee("admin").with_status("ASSIGNED"),
            Filter::new("3", "done", "Done").with_status("COMPLETED"),
        ]
    }

    fn event(sequence: u64) -> NotificationEvent {
        NotificationEvent::new(sequence, format!("task-{sequence}"))
    }

    async fn drain(subscription: &Subscription) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while subscription.is_attached() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("listener did not finish");
    }

    #[test]
    fn hint_routing_prefers_key_hints() {
        let event = event(1).with_key_hint("done").with_assignee("admin").with_status("ASSIGNED");
        assert_eq!(HintRouting.route(&event, &catalog()).as_deref(), Some("done"));
    }

    #[test]
    fn hint_routing_uses_first_catalog_match_for_keys() {
        let event = event(1).with_key_hint("done").with_key_hint("all");
        assert_eq!(HintRouting.route(&event, &catalog()).as_deref(), Some("all"));
    }

    #[test]
    fn hint_routing_matches_declared_attributes() {
        let assigned = event(1).with_assignee("admin").with_status("ASSIGNED");
        assert_eq!(HintRouting.route(&assigned, &catalog()).as_deref(), Some("mine"));

        let completed = event(2).with_status("COMPLETED").with_assignee("someone");
        assert_eq!(HintRouting.route(&completed, &catalog()).as_deref(), Some("done"));

        let partial = event(3).with_assignee("admin");
        assert_eq!(HintRouting.route(&partial, &catalog()), None);
    }

    #[test]
    fn hint_routing_never_matches_filters_without_attributes() {
        assert_eq!(HintRouting.route(&event(1), &catalog()), None);
        assert_eq!(HintRouting.route(&event(1).with_key_hint("unknown"), &catalog()), None);
    }

    #[test]
    fn closures_are_routing_rules() {
        let rule = |event: &NotificationEvent, _catalog: &[Filter]| Some(event.subject_id.clone());
        assert_eq!(rule.route(&event(5), &[]).as_deref(), Some("task-5"));
    }

    #[tokio::test]
    async fn counts_non_active_filters_in_order() {
        let target = TestTarget::new(Some("all"));
        let events = vec![
            Ok(event(1).with_key_hint("mine")),
            Ok(event(2).with_key_hint("mine")),
            Ok(event(3).with_key_hint("all")),
            Ok(event(4)),
        ];
        let subscription = NotificationListener::default()
            .attach(stream::iter(events).boxed(), Arc::clone(&target));

        drain(&subscription).await;
        assert_eq!(target.count("mine"), 2);
        assert_eq!(target.count("all"), 0);
    }

    #[tokio::test]
    async fn stream_errors_are_reported_and_reading_continues() {
        let target = TestTarget::new(None);
        let mut rx = target.events.subscribe();
        let events = vec![
            Err(StreamError::Decode("bad line".to_string())),
            Ok(event(1).with_key_hint("done")),
        ];
        let subscription = NotificationListener::default()
            .attach(stream::iter(events).boxed(), Arc::clone(&target));

        drain(&subscription).await;

        match rx.recv().await.unwrap() {
            EngineEvent::Error(detail) => assert_eq!(detail.kind, ErrorKind::Notification),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(target.count("done"), 1);
    }

    #[tokio::test]
    async fn unknown_routed_keys_are_ignored() {
        let target = TestTarget::new(None);
        let listener = NotificationListener::new(Arc::new(
            |_: &NotificationEvent, _: &[Filter]| Some("nope".to_string()),
        ));
        let subscription = listener.attach(stream::iter(vec![Ok(event(1))]).boxed(), Arc::clone(&target));

        drain(&subscription).await;
        assert_eq!(target.count("nope"), 0);
        assert!(target.state.lock().unwrap().store.is_empty());
    }

    #[tokio::test]
    async fn detach_is_idempotent_and_stops_processing() {
        let target = TestTarget::new(None);
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let mut subscription = NotificationListener::default().attach(stream.boxed(), Arc::clone(&target));

        tx.send(Ok(event(1).with_key_hint("mine"))).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while target.count("mine") == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first event not applied");

        subscription.detach();
        subscription.detach();
        assert!(!subscription.is_attached());

        let _ = tx.send(Ok(event(2).with_key_hint("mine")));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(target.count("mine"), 1);
    }

    #[tokio::test]
    async fn disposed_target_stops_the_listener() {
        let target = TestTarget::new(None);
        target.state.lock().unwrap().disposed = true;
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let subscription = NotificationListener::default().attach(stream.boxed(), Arc::clone(&target));

        tx.send(Ok(event(1).with_key_hint("mine"))).unwrap();
        drain(&subscription).await;
        assert_eq!(target.count("mine"), 0);
    }
}
