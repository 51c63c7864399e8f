//! Step-off reconnect backoff.
//!
//! Unlike a plain exponential backoff, the next delay depends on how long
//! the connection actually stayed up: a fast re-failure keeps doubling the
//! delay, but a connection that ran for a while resets it to the floor.
//! Used by the Direct WebSocket block connection and by worker restarts.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StepBackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    /// Extra grace window added to the current delay when deciding whether
    /// the last connection attempt counts as a "fast" failure.
    pub grace: Duration,
}

impl Default for StepBackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            grace: Duration::from_secs(3),
        }
    }
}

/// Stateful step-off backoff counter.
#[derive(Debug, Clone)]
pub struct StepBackoff {
    config: StepBackoffConfig,
    current: Duration,
}

impl StepBackoff {
    pub fn new(config: StepBackoffConfig) -> Self {
        let current = config.initial;
        Self { config, current }
    }

    /// Record that a reconnect attempt happened `since_last` after the
    /// previous one settled, and return the delay to wait before the next
    /// attempt.
    pub fn next(&mut self, since_last: Duration) -> Duration {
        if since_last <= self.current + self.config.grace {
            self.current = (self.current * 2).min(self.config.max);
        } else {
            self.current = self.config.initial;
        }
        self.current
    }

    /// The delay that would be returned by the next [`Self::next`] call
    /// without a fast-failure reset, i.e. the current step.
    pub fn current(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> StepBackoff {
        StepBackoff::new(StepBackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            grace: Duration::from_secs(3),
        })
    }

    #[test]
    fn fast_failures_double_up_to_cap() {
        let mut b = backoff();
        assert_eq!(b.next(Duration::from_millis(500)), Duration::from_secs(2));
        assert_eq!(b.next(Duration::from_millis(500)), Duration::from_secs(4));
        assert_eq!(b.next(Duration::from_millis(500)), Duration::from_secs(8));
    }

    #[test]
    fn doubling_is_capped_at_max() {
        let mut b = backoff();
        for _ in 0..10 {
            b.next(Duration::from_millis(1));
        }
        assert_eq!(b.current(), Duration::from_secs(60));
    }

    #[test]
    fn long_lived_connection_resets_to_initial() {
        let mut b = backoff();
        b.next(Duration::from_millis(1));
        b.next(Duration::from_millis(1));
        assert_eq!(b.current(), Duration::from_secs(4));
        let reset = b.next(Duration::from_secs(3600));
        assert_eq!(reset, Duration::from_secs(1));
    }

    #[test]
    fn within_grace_window_still_counts_as_fast() {
        let mut b = backoff();
        // current = 1s, grace = 3s -> anything <= 4s is "fast"
        let d = b.next(Duration::from_millis(3900));
        assert_eq!(d, Duration::from_secs(2));
    }
}
