// src/core/fsm.rs

//! The group state machine: a primary-centric rule set and a
//! replica-centric rule set, evaluated as a guarded-command list —
//! condition, then action, first match wins. The FSM is pure: it reads a
//! snapshot of the group's nodes and returns the goal-state assignments to
//! make, without touching the catalog or the notifier itself. Callers
//! (the API layer) are responsible for persisting assignments and
//! publishing events, and for retrying on a transaction conflict — the FSM
//! never retries on its own.

use super::clock::{Timeouts, elapsed_exceeds};
use super::errors::{MonitorError, MonitorResult};
use super::health::{is_healthy, is_unhealthy};
use super::lag::wal_diff_within;
use super::model::{Formation, Node, ReplicationState};
use std::time::Instant;

/// One goal-state assignment the FSM wants applied. Carries the
/// human-readable description so the caller can hand it straight to
/// `Notifier::notify_state_change`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub node_id: i64,
    pub state: ReplicationState,
    pub description: String,
}

/// The tunables the FSM needs beyond the catalog snapshot itself.
#[derive(Debug, Clone, Copy)]
pub struct FsmContext {
    pub now: Instant,
    pub monitor_start: Instant,
    pub timeouts: Timeouts,
    pub enable_sync_xlog_threshold: u64,
    pub promote_xlog_threshold: u64,
}

impl FsmContext {
    fn node_is_unhealthy(&self, node: &Node) -> bool {
        is_unhealthy(node, self.now, self.monitor_start, &self.timeouts)
    }

    /// Drain-time expiry: a primary whose goal is `demote_timeout` is
    /// considered drained once `drain_timeout_ms` has passed since that
    /// goal was assigned, whether or not it ever reports back.
    fn drain_time_expired(&self, primary: &Node) -> bool {
        primary.goal_state == ReplicationState::DemoteTimeout
            && elapsed_exceeds(
                primary.state_change_time,
                self.now,
                self.timeouts.drain_timeout_ms,
            )
    }
}

/// Evaluates the group's transition rules for the node that just reported
/// in (`active_node_id`), and returns the goal-state assignments (zero,
/// one, or two) that result. `group_nodes` must be every node in the
/// active node's (formation_id, group_id), including the active node.
pub fn evaluate(
    active_node_id: i64,
    formation: &Formation,
    group_nodes: &[Node],
    ctx: &FsmContext,
) -> MonitorResult<Vec<Assignment>> {
    let active = group_nodes
        .iter()
        .find(|n| n.node_id == active_node_id)
        .ok_or_else(|| MonitorError::NotFound(format!("node {active_node_id} not in group snapshot")))?;

    // R1: Alone. When only one node exists in the group, it's single,
    // full stop — this overrides every other rule, including the
    // primary/replica split below.
    if group_nodes.len() == 1 && active.reported_state != ReplicationState::Single {
        let description = format!(
            "Setting goal state of {}:{} to single as there is no other node.",
            active.node_name, active.node_port
        );
        return Ok(vec![Assignment {
            node_id: active.node_id,
            state: ReplicationState::Single,
            description,
        }]);
    }

    if active.reported_state.role() == super::model::StateRole::Primary {
        return evaluate_primary_centric(active, group_nodes, formation, ctx);
    }

    evaluate_replica_centric(active, group_nodes, formation, ctx)
}

/// Replica-centric rules R2–R9, evaluated when the reporting node is not
/// itself in a primary-role state. Where a rule touches both the primary's
/// row and the active node's row, the primary's assignment is always
/// pushed first, matching the fixed lock-acquisition order (primary, then
/// active) a per-row-locked catalog must follow to avoid deadlocking
/// against a rule evaluated from the other node's perspective.
fn evaluate_replica_centric(
    active: &Node,
    group_nodes: &[Node],
    formation: &Formation,
    ctx: &FsmContext,
) -> MonitorResult<Vec<Assignment>> {
    let primary = group_nodes
        .iter()
        .find(|n| n.reported_state.is_primary_role())
        .ok_or_else(|| {
            MonitorError::InvalidState(format!(
                "no primary found in formation '{}' group {} while node {} reported in",
                active.formation_id, active.group_id, active.node_id
            ))
        })?;

    let waiting_for_standby = matches!(
        primary.reported_state,
        ReplicationState::WaitPrimary | ReplicationState::JoinPrimary
    );

    // R2: Standby recognized.
    if active.reported_state == ReplicationState::WaitStandby && waiting_for_standby {
        let description = format!(
            "Setting goal state of {}:{} to catchingup after {}:{} converged to wait_primary.",
            active.node_name, active.node_port, primary.node_name, primary.node_port
        );
        return Ok(vec![single(active.node_id, ReplicationState::CatchingUp, description)]);
    }

    // R3: Caught up.
    if active.reported_state == ReplicationState::CatchingUp
        && waiting_for_standby
        && is_healthy(active)
        && wal_diff_within(Some(active), Some(primary), ctx.enable_sync_xlog_threshold)
    {
        let description = format!(
            "Setting goal state of {}:{} to primary and {}:{} to secondary after {}:{} caught up.",
            primary.node_name, primary.node_port, active.node_name, active.node_port,
            active.node_name, active.node_port
        );
        return Ok(vec![
            single(primary.node_id, ReplicationState::Primary, description.clone()),
            single(active.node_id, ReplicationState::Secondary, description),
        ]);
    }

    // R4: Failover candidate chosen.
    if active.reported_state == ReplicationState::Secondary
        && primary.reported_state.is_primary_role()
        && ctx.node_is_unhealthy(primary)
        && is_healthy(active)
        && wal_diff_within(Some(active), Some(primary), ctx.promote_xlog_threshold)
    {
        let description = format!(
            "Setting goal state of {}:{} to draining and {}:{} to prepare_promotion after {}:{} became unhealthy.",
            primary.node_name, primary.node_port, active.node_name, active.node_port,
            primary.node_name, primary.node_port
        );
        return Ok(vec![
            single(primary.node_id, ReplicationState::Draining, description.clone()),
            single(active.node_id, ReplicationState::PreparePromotion, description),
        ]);
    }

    // R5: Sharded short-circuit.
    if active.reported_state == ReplicationState::PreparePromotion
        && formation.kind.is_sharded()
        && active.group_id > 0
    {
        let description = sharded_demote_description(active, primary);
        return Ok(vec![
            single(primary.node_id, ReplicationState::Demoted, description.clone()),
            single(active.node_id, ReplicationState::WaitPrimary, description),
        ]);
    }

    // R6: Promotion progresses.
    if active.reported_state == ReplicationState::PreparePromotion {
        let description = format!(
            "Setting goal state of {}:{} to demote_timeout and {}:{} to stop_replication after {}:{} converged to prepare_promotion.",
            primary.node_name, primary.node_port, active.node_name, active.node_port,
            active.node_name, active.node_port
        );
        return Ok(vec![
            single(primary.node_id, ReplicationState::DemoteTimeout, description.clone()),
            single(active.node_id, ReplicationState::StopReplication, description),
        ]);
    }

    // R7: Drain complete.
    if active.reported_state == ReplicationState::StopReplication
        && (primary.reported_state == ReplicationState::DemoteTimeout || ctx.drain_time_expired(primary))
    {
        let description = format!(
            "Setting goal state of {}:{} to wait_primary and {}:{} to demoted after the demote timeout expired.",
            active.node_name, active.node_port, primary.node_name, primary.node_port
        );
        return Ok(vec![
            single(primary.node_id, ReplicationState::Demoted, description.clone()),
            single(active.node_id, ReplicationState::WaitPrimary, description),
        ]);
    }

    // R8: Sharded demote during stop_replication.
    if active.reported_state == ReplicationState::StopReplication
        && formation.kind.is_sharded()
        && active.group_id > 0
    {
        let description = sharded_demote_description(active, primary);
        return Ok(vec![
            single(primary.node_id, ReplicationState::Demoted, description.clone()),
            single(active.node_id, ReplicationState::WaitPrimary, description),
        ]);
    }

    // R9: Rejoin after demotion.
    if active.reported_state == ReplicationState::Demoted
        && primary.reported_state == ReplicationState::WaitPrimary
    {
        let description = format!(
            "Setting goal state of {}:{} to catchingup after it converged to demotion and {}:{} converged to wait_primary.",
            active.node_name, active.node_port, primary.node_name, primary.node_port
        );
        return Ok(vec![single(active.node_id, ReplicationState::CatchingUp, description)]);
    }

    Ok(vec![])
}

fn sharded_demote_description(active: &Node, primary: &Node) -> String {
    format!(
        "Setting goal state of {}:{} to wait_primary and {}:{} to demoted after the coordinator metadata was updated.",
        active.node_name, active.node_port, primary.node_name, primary.node_port
    )
}

/// Primary-centric rules P1–P4, evaluated when the reporting node is
/// itself in a primary-role state.
fn evaluate_primary_centric(
    active: &Node,
    group_nodes: &[Node],
    _formation: &Formation,
    ctx: &FsmContext,
) -> MonitorResult<Vec<Assignment>> {
    let others: Vec<&Node> = group_nodes.iter().filter(|n| n.node_id != active.node_id).collect();

    // P1: First standby.
    if active.reported_state == ReplicationState::Single {
        if let Some(waiting) = others
            .iter()
            .find(|n| n.reported_state == ReplicationState::WaitStandby)
        {
            let description = format!(
                "Setting goal state of {}:{} to wait_primary after {}:{} joined.",
                active.node_name, active.node_port, waiting.node_name, waiting.node_port
            );
            return Ok(vec![single(active.node_id, ReplicationState::WaitPrimary, description)]);
        }
        return Ok(vec![]);
    }

    // P2: Additional standby.
    if active.reported_state == ReplicationState::Primary {
        if let Some(waiting) = others
            .iter()
            .find(|n| n.reported_state == ReplicationState::WaitStandby)
        {
            let description = format!(
                "Setting goal state of {}:{} to join_primary after {}:{} joined.",
                active.node_name, active.node_port, waiting.node_name, waiting.node_port
            );
            return Ok(vec![single(active.node_id, ReplicationState::JoinPrimary, description)]);
        }

        // P3: All standbys failed. A failover candidate is a secondary
        // that is not unhealthy, participates in the sync quorum, and has
        // a non-zero candidate priority.
        let mut assignments = Vec::new();
        let mut candidate_count = 0usize;
        for other in &others {
            if other.reported_state == ReplicationState::Secondary && ctx.node_is_unhealthy(other) {
                let description = format!(
                    "Setting goal state of {}:{} to catchingup after it became unhealthy.",
                    other.node_name, other.node_port
                );
                assignments.push(single(other.node_id, ReplicationState::CatchingUp, description));
                continue;
            }
            if other.reported_state == ReplicationState::Secondary
                && other.replication_quorum
                && other.candidate_priority > 0
            {
                candidate_count += 1;
            }
        }

        if candidate_count == 0 {
            let description = format!(
                "Setting goal state of {}:{} to wait_primary now that none of the standbys are healthy anymore.",
                active.node_name, active.node_port
            );
            assignments.push(single(active.node_id, ReplicationState::WaitPrimary, description));
        }

        return Ok(assignments);
    }

    // P4: Settings applied.
    if active.reported_state == ReplicationState::ApplySettings {
        let description = format!(
            "Setting goal state of {}:{} to primary after it applied replication properties change.",
            active.node_name, active.node_port
        );
        return Ok(vec![single(active.node_id, ReplicationState::Primary, description)]);
    }

    Ok(vec![])
}

fn single(node_id: i64, state: ReplicationState, description: String) -> Assignment {
    Assignment { node_id, state, description }
}

/// Selects the best replica for an operator-initiated failover, per the
/// tie-break the monitor documents in DESIGN.md: highest
/// `candidate_priority`, then smallest `|lsn - primary.lsn|`, then smallest
/// `node_id`.
pub fn select_best_failover_candidate(candidates: &[Node], primary: &Node) -> Option<i64> {
    candidates
        .iter()
        .filter(|n| n.reported_state == ReplicationState::Secondary && n.replication_quorum && n.candidate_priority > 0)
        .min_by_key(|n| {
            (
                std::cmp::Reverse(n.candidate_priority),
                n.reported_lsn.abs_diff(primary.reported_lsn),
                n.node_id,
            )
        })
        .map(|n| n.node_id)
}
