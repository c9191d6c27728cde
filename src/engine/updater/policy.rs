//! Update eligibility and retry backoff.

use std::time::Duration;

use serde::Serialize;

use super::state::StoredState;

/// Timing rules for the update job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatePolicy {
    /// How often the scheduler wakes the job
    pub poll_interval: Duration,
    /// Minimum gap between attempts after a success
    pub refresh_interval: Duration,
    /// Retry gap after the first failure; doubles per further failure
    pub initial_backoff: Duration,
    /// Upper bound on the retry gap
    pub max_backoff: Duration,
    /// Age of the last success after which a refresh is forced
    pub max_staleness: Duration,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60 * 60),
            refresh_interval: Duration::from_secs(24 * 60 * 60),
            initial_backoff: Duration::from_secs(30 * 60),
            max_backoff: Duration::from_secs(12 * 60 * 60),
            max_staleness: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl UpdatePolicy {
    /// Minimum gap after the last attempt given `failure_count` consecutive failures.
    pub fn retry_interval(&self, failure_count: i32) -> Duration {
        if failure_count <= 0 {
            return self.refresh_interval;
        }
        let exponent = (failure_count - 1).min(30) as u32;
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Whether an update attempt is due at `now` (epoch millis).
    ///
    /// Staleness forces a refresh past a grown backoff, but never sooner
    /// than `initial_backoff` after the previous attempt.
    pub fn is_due(&self, state: &StoredState, now: i64) -> bool {
        if !state.has_attempted() {
            return true;
        }
        let since_attempt = now.saturating_sub(state.last_attempt_timestamp);
        if since_attempt < 0 {
            // Clock moved backwards; the recorded attempt cannot be trusted.
            return true;
        }
        if since_attempt >= millis(self.retry_interval(state.failure_count)) {
            return true;
        }
        self.is_stale(state, now) && since_attempt >= millis(self.initial_backoff)
    }

    /// Whether the committed content is older than `max_staleness`.
    pub fn is_stale(&self, state: &StoredState, now: i64) -> bool {
        state.last_success_timestamp < 0
            || now.saturating_sub(state.last_success_timestamp) >= millis(self.max_staleness)
    }

    /// Earliest time (epoch millis) at which `is_due` becomes true.
    pub fn next_due(&self, state: &StoredState) -> i64 {
        if !state.has_attempted() {
            return 0;
        }
        let attempt = state.last_attempt_timestamp;
        let by_backoff = attempt.saturating_add(millis(self.retry_interval(state.failure_count)));
        let stale_at = if state.last_success_timestamp < 0 {
            attempt
        } else {
            state.last_success_timestamp.saturating_add(millis(self.max_staleness))
        };
        let by_staleness = stale_at.max(attempt.saturating_add(millis(self.initial_backoff)));
        by_backoff.min(by_staleness)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
