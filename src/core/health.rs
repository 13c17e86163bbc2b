// src/core/health.rs

//! Classifies nodes as healthy / unhealthy given report freshness,
//! health-probe outcome, and startup grace. `is_healthy` and `is_unhealthy`
//! are not complements: a node with a recent report and unknown health is
//! neither.

use super::clock::{Clock, Timeouts, elapsed_exceeds};
use super::model::{Health, Node};
use std::time::Instant;

/// `is_healthy(node) = health == good AND pg_is_running`.
pub fn is_healthy(node: &Node) -> bool {
    node.health == Health::Good && node.pg_is_running
}

/// A node is unhealthy if its agent has stopped reporting PostgreSQL as
/// running, or if both its report is stale and its last health probe was
/// bad, past the monitor's startup grace period.
pub fn is_unhealthy(
    node: &Node,
    now: Instant,
    monitor_start: Instant,
    timeouts: &Timeouts,
) -> bool {
    if !node.pg_is_running {
        return true;
    }

    let report_stale = elapsed_exceeds(node.report_time, now, timeouts.unhealthy_timeout_ms);
    let past_grace = elapsed_exceeds(monitor_start, now, timeouts.startup_grace_ms);

    report_stale && node.health == Health::Bad && past_grace
}

/// Convenience wrapper taking a `Clock` instead of a bare `Instant`.
pub fn is_unhealthy_now(node: &Node, clock: &dyn Clock, monitor_start: Instant, timeouts: &Timeouts) -> bool {
    is_unhealthy(node, clock.now(), monitor_start, timeouts)
}
