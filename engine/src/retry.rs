//! Retry with exponential backoff.
//!
//! Delays double after every failed attempt up to a cap, with ±25% jitter so
//! that many engines restarted together do not hit the backend in lockstep.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Jitter factor (±25%).
const JITTER_FACTOR: f64 = 0.25;

/// Default delay before the second attempt.
const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

/// Default upper bound on any single delay.
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Default total number of attempts.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How often, and how patiently, to retry a fallible operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Default delays with a custom attempt count.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self::with_max_attempts(1)
    }

    /// Three attempts with millisecond delays.
    #[must_use]
    pub fn fast_for_tests() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    /// Base delay before attempt `attempt + 1`, without jitter.
    ///
    /// `attempt` is 1-based: the delay after the first failure is
    /// `initial_delay`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }

    /// Runs `operation` until it succeeds or the attempts are exhausted.
    ///
    /// Returns the last error on give-up.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => {
                    warn!(what, attempts, error = %err, "Giving up after final attempt");
                    return Err(err);
                }
                Err(err) => {
                    let delay = add_jitter(self.delay_after(attempt));
                    warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Adds ±25% jitter to a duration.
fn add_jitter(duration: Duration) -> Duration {
    let base = duration.as_secs_f64();
    if base == 0.0 {
        return duration;
    }
    let jitter_range = base * JITTER_FACTOR;
    let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
    let jittered = Duration::from_secs_f64((base + jitter).max(0.0));
    debug!(
        base_ms = duration.as_millis() as u64,
        jittered_ms = jittered.as_millis() as u64,
        "Backoff computed"
    );
    jittered
}
