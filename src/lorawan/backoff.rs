//! Reconnect backoff policy.
//!
//! Geometric growth with a floor and a ceiling:
//!
//! 1. A fresh disconnect (or enabling the link) starts at the initial period
//! 2. Every failed reconnect attempt doubles the period
//! 3. The period is clamped to the maximum
//!
//! Unlike CSMA backoff there is no jitter; a single node reconnecting on its
//! own schedule does not contend with anything.

use std::time::Duration;

/// Reconnect period state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl ReconnectBackoff {
    /// Create a backoff starting at `initial` and capped at `max`.
    ///
    /// `max` below `initial` is raised to `initial`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
            failures: 0,
        }
    }

    /// Current reconnect period.
    pub fn period(&self) -> Duration {
        self.current
    }

    /// Failed attempts since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Floor of the period.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Ceiling of the period.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Return to the initial period. Returns the new period.
    pub fn reset(&mut self) -> Duration {
        self.current = self.initial;
        self.failures = 0;
        self.current
    }

    /// Record a failed attempt and double the period, up to the ceiling.
    /// Returns the new period.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }
}
