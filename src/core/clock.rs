// src/core/clock.rs

//! Monotonic "now" and duration comparisons, pluggable so tests can inject a
//! fake clock instead of depending on wall-clock sleeps.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of monotonic time for the FSM and health evaluator.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// Returns whether `d_ms` has elapsed between `t_start` and `t_now`.
pub fn elapsed_exceeds(t_start: Instant, t_now: Instant, d_ms: u64) -> bool {
    t_now.saturating_duration_since(t_start) > Duration::from_millis(d_ms)
}

/// The production clock, backed by `Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock tests can advance deterministically, avoiding real sleeps.
#[derive(Debug, Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<Instant>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut t = self.inner.lock();
        *t += d;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.inner.lock()
    }
}

/// The three tunable durations from the monitor's configuration, carried
/// through an explicit context handed to the FSM rather than process
/// globals, so tests can parametrize them freely.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// How long a demoted primary is given to flush before its drain is
    /// considered complete regardless of whether it reports back.
    pub drain_timeout_ms: u64,
    /// Silence (no report) that makes a node a candidate for unhealthy,
    /// combined with a bad out-of-band health check.
    pub unhealthy_timeout_ms: u64,
    /// Post-monitor-start period during which no node is declared
    /// unhealthy from absence alone.
    pub startup_grace_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 30_000,
            unhealthy_timeout_ms: 20_000,
            startup_grace_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_millis(500));
        let t1 = clock.now();
        assert!(elapsed_exceeds(t0, t1, 100));
        assert!(!elapsed_exceeds(t0, t1, 1000));
    }
}
