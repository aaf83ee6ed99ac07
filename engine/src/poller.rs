//! Periodic counter refresh for the active filter.
//!
//! A [`CounterPoller`] owns at most one background task. Each `start` bumps
//! the poller's generation and hands it to the target before the task runs;
//! a fetched count is only written when the target still reports that
//! generation and the same active filter, so a result that lands after a
//! selection change is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::catalog::FilterBackend;
use crate::counters::CounterTarget;
use crate::events::ErrorDetail;
use crate::types::Filter;

/// Shortest period a poller runs at. Smaller intervals are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of applying one poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Written,
    Stale,
}

/// Recurring count fetch for a single filter.
#[derive(Debug, Default)]
pub struct CounterPoller {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl CounterPoller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts polling `filter` every `interval`, replacing any running task.
    ///
    /// The first fetch happens right away, then once per `interval`. An
    /// interval below [`MIN_POLL_INTERVAL`] is raised to it. Returns the
    /// generation the new task carries, which `target` has already recorded
    /// through [`CounterTarget::begin_poll`]. Must be called from within a
    /// Tokio runtime.
    pub fn start<T: CounterTarget>(
        &mut self,
        context: impl Into<String>,
        filter: Filter,
        interval: Duration,
        backend: Arc<dyn FilterBackend>,
        target: Arc<T>,
    ) -> u64 {
        self.stop();
        self.generation += 1;
        let generation = self.generation;
        let context = context.into();
        let interval = if interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                min_ms = MIN_POLL_INTERVAL.as_millis() as u64,
                "Poll interval too small, clamping"
            );
            MIN_POLL_INTERVAL
        } else {
            interval
        };

        debug!(
            filter = %filter.key,
            generation,
            interval_ms = interval.as_millis() as u64,
            "Starting counter poller"
        );

        target.begin_poll(generation);
        self.task = Some(tokio::spawn(poll_loop(
            context, filter, interval, generation, backend, target,
        )));
        generation
    }

    /// Cancels the running task. Stopping a stopped poller does nothing.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(generation = self.generation, "Counter poller stopped");
        }
    }

    /// Whether a poll task is currently owned.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Generation of the most recently started task.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for CounterPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<T: CounterTarget>(
    context: String,
    filter: Filter,
    period: Duration,
    generation: u64,
    backend: Arc<dyn FilterBackend>,
    target: Arc<T>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match backend.fetch_count(&context, &filter).await {
            Ok(count) => {
                let applied = target.with_counters(|scope| {
                    if scope.poll_generation() != generation
                        || scope.active_key() != Some(filter.key.as_str())
                    {
                        return Applied::Stale;
                    }
                    scope.set(&filter.key, count);
                    Applied::Written
                });

                match applied {
                    Some(Applied::Written) => {
                        debug!(filter = %filter.key, count, "Counter polled");
                    }
                    Some(Applied::Stale) => {
                        debug!(filter = %filter.key, generation, "Poll result superseded, stopping");
                        return;
                    }
                    None => return,
                }
            }
            Err(err) => {
                warn!(filter = %filter.key, error = %err, "Counter poll failed");
                target.report(ErrorDetail::counter_fetch(&filter.key, &err));
            }
        }
    }
}
