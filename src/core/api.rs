// src/core/api.rs

//! `MonitorApi`: the agent-facing surface (C7). Each method runs one
//! catalog transaction, re-evaluates the FSM for every node touched by the
//! call, applies the resulting goal-state assignments, and publishes a
//! notification per assignment — mirroring the
//! `AssignGoalState` / `LogAndNotifyMessage` / `NotifyStateChange` sequence
//! the original monitor runs inside its own transaction per RPC.

use super::catalog::InMemoryCatalog;
use super::clock::{Clock, SystemClock, Timeouts};
use super::errors::{MonitorError, MonitorResult};
use super::events::Notifier;
use super::fsm::{self, FsmContext};
use super::model::{Formation, FormationKind, Health, Node, ReplicationState, SyncState};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span};

/// Tunables the monitor needs beyond the catalog: timeouts, the two
/// replication-lag thresholds, the monotonic clock, and the default
/// `number_sync_standbys` a formation gets when `register_node` creates it
/// implicitly.
#[derive(Clone)]
pub struct MonitorSettings {
    pub timeouts: Timeouts,
    pub enable_sync_xlog_threshold: u64,
    pub promote_xlog_threshold: u64,
    pub clock: Arc<dyn Clock>,
    pub monitor_start: Instant,
    pub default_number_sync_standbys: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            enable_sync_xlog_threshold: super::lag::DEFAULT_XLOG_SEG_SIZE,
            promote_xlog_threshold: super::lag::DEFAULT_XLOG_SEG_SIZE,
            clock: Arc::new(SystemClock),
            monitor_start: Instant::now(),
            default_number_sync_standbys: 1,
        }
    }
}

/// Everything a node agent (or the HTTP server) calls into. Holds an
/// `Arc`-free catalog and notifier directly; `MonitorApi` itself is meant
/// to live behind one `Arc` shared across request handlers.
pub struct MonitorApi {
    catalog: InMemoryCatalog,
    notifier: Notifier,
    settings: MonitorSettings,
}

/// The caller-visible result of a node reporting its state, after the FSM
/// has run: the node's own (possibly just-assigned) goal state plus any
/// other node the same call touched.
#[derive(Debug, Clone)]
pub struct NodeStateView {
    pub node: Node,
}

impl MonitorApi {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            catalog: InMemoryCatalog::new(),
            notifier: Notifier::new(),
            settings,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn fsm_context(&self) -> FsmContext {
        FsmContext {
            now: self.settings.clock.now(),
            monitor_start: self.settings.monitor_start,
            timeouts: self.settings.timeouts,
            enable_sync_xlog_threshold: self.settings.enable_sync_xlog_threshold,
            promote_xlog_threshold: self.settings.promote_xlog_threshold,
        }
    }

    /// Runs the FSM for `active_node_id` against its current group and
    /// applies every resulting assignment, publishing a notification for
    /// each one. Returns the (possibly updated) active node.
    fn run_fsm_and_apply(&self, active_node_id: i64) -> MonitorResult<Node> {
        let ctx = self.fsm_context();
        self.catalog.transaction(|tx| {
            let active = tx
                .get_node(active_node_id)
                .ok_or_else(|| MonitorError::NotFound(format!("node {active_node_id}")))?;
            let formation = tx
                .get_formation(&active.formation_id)
                .ok_or_else(|| MonitorError::NotFound(format!("formation {}", active.formation_id)))?;
            let group_nodes = tx.list_nodes(&active.formation_id, active.group_id);

            let assignments = fsm::evaluate(active_node_id, &formation, &group_nodes, &ctx)?;

            for assignment in &assignments {
                let before = tx
                    .get_node(assignment.node_id)
                    .ok_or_else(|| MonitorError::NotFound(format!("node {}", assignment.node_id)))?;
                let after = tx.set_goal_state(assignment.node_id, assignment.state, ctx.now)?;

                if before.goal_state != after.goal_state {
                    self.notifier.notify_state_change(
                        after.node_id,
                        &after.node_name,
                        after.node_port,
                        &after.formation_id,
                        after.group_id,
                        after.reported_state,
                        after.goal_state,
                        after.pgsr_sync_state,
                        after.reported_lsn,
                        after.candidate_priority,
                        after.replication_quorum,
                        self.notifier.log_and_notify(assignment.description.clone()),
                    );
                }
            }

            tx.get_node(active_node_id)
                .ok_or_else(|| MonitorError::NotFound(format!("node {active_node_id}")))
        })
    }

    /// Registers a new node in a formation/group, creating the formation
    /// (standalone, default replication settings) on first use.
    pub fn register_node(
        &self,
        formation_id: &str,
        group_id: i32,
        node_name: &str,
        node_host: &str,
        node_port: u16,
        candidate_priority: u8,
        replication_quorum: bool,
    ) -> MonitorResult<Node> {
        let span = info_span!("register_node", formation_id, group_id, node_name);
        let _enter = span.enter();

        let now = self.settings.clock.now();
        let node_id = self.catalog.transaction(|tx| {
            if tx.get_formation(formation_id).is_none() {
                tx.upsert_formation(Formation {
                    formation_id: formation_id.to_string(),
                    kind: FormationKind::Standalone,
                    number_sync_standbys: self.settings.default_number_sync_standbys,
                });
            }

            if tx.get_node_by_name(node_name, node_port).is_some() {
                return Err(MonitorError::Conflict(format!(
                    "node {node_name}:{node_port} already registered"
                )));
            }

            // A node always arrives as `init` — `reported_state` reflects
            // what the agent has actually told us, never a value the
            // monitor fabricates. Only the goal differs by whether it's
            // joining an empty group (single) or an existing one
            // (wait_standby).
            let nodes_in_group = tx.list_nodes(formation_id, group_id);
            let goal_state = if nodes_in_group.is_empty() {
                ReplicationState::Single
            } else {
                ReplicationState::WaitStandby
            };

            Ok(tx.insert_node(Node {
                node_id: 0,
                node_name: node_name.to_string(),
                node_host: node_host.to_string(),
                node_port,
                formation_id: formation_id.to_string(),
                group_id,
                reported_state: ReplicationState::Init,
                goal_state,
                reported_lsn: 0,
                pgsr_sync_state: SyncState::Unknown,
                candidate_priority,
                replication_quorum,
                health: Health::Unknown,
                report_time: now,
                health_check_time: now,
                state_change_time: now,
                pg_is_running: true,
            }))
        })?;

        info!(node_id, "node registered");
        self.run_fsm_and_apply(node_id)
    }

    /// The periodic "I'm alive, here's my state" call a node agent makes.
    /// Updates the reported fields, runs the FSM, and returns the node's
    /// current goal state.
    #[allow(clippy::too_many_arguments)]
    pub fn node_active(
        &self,
        node_id: i64,
        reported_state: ReplicationState,
        reported_lsn: u64,
        pgsr_sync_state: SyncState,
        health: Health,
        pg_is_running: bool,
    ) -> MonitorResult<Node> {
        let span = info_span!("node_active", node_id);
        let _enter = span.enter();

        let now = self.settings.clock.now();
        self.catalog.transaction(|tx| {
            let mut node = tx
                .get_node(node_id)
                .ok_or_else(|| MonitorError::NotFound(format!("node {node_id}")))?;
            node.reported_state = reported_state;
            node.reported_lsn = reported_lsn;
            node.pgsr_sync_state = pgsr_sync_state;
            node.health = health;
            node.pg_is_running = pg_is_running;
            node.report_time = now;
            node.health_check_time = now;
            tx.update_node(node);
            Ok(())
        })?;

        self.run_fsm_and_apply(node_id)
    }

    pub fn remove_node(&self, node_id: i64) -> MonitorResult<()> {
        let span = info_span!("remove_node", node_id);
        let _enter = span.enter();

        let removed = self.catalog.transaction(|tx| tx.remove_node(node_id))?;
        self.notifier.log_and_notify(format!(
            "Node {}:{} removed from formation {}.",
            removed.node_name, removed.node_port, removed.formation_id
        ));

        // Removing a node can unstick P3 (one fewer unhealthy standby to
        // account for) or R1 (down to a single remaining node), so the
        // remaining group members need a fresh pass.
        let remaining = self.catalog.transaction(|tx| {
            Ok(tx.list_nodes(&removed.formation_id, removed.group_id))
        })?;
        for node in remaining {
            self.run_fsm_and_apply(node.node_id)?;
        }
        Ok(())
    }

    pub fn set_replication_settings(
        &self,
        formation_id: &str,
        number_sync_standbys: u32,
    ) -> MonitorResult<Formation> {
        let span = info_span!("set_replication_settings", formation_id);
        let _enter = span.enter();

        let formation = self.catalog.transaction(|tx| {
            let mut formation = tx
                .get_formation(formation_id)
                .ok_or_else(|| MonitorError::NotFound(format!("formation {formation_id}")))?;
            formation.number_sync_standbys = number_sync_standbys;
            tx.upsert_formation(formation.clone());
            Ok(formation)
        })?;

        self.apply_settings_on_every_primary(formation_id)?;
        Ok(formation)
    }

    pub fn set_node_candidate_priority(&self, node_id: i64, candidate_priority: u8) -> MonitorResult<Node> {
        let node = self.catalog.transaction(|tx| {
            let mut node = tx
                .get_node(node_id)
                .ok_or_else(|| MonitorError::NotFound(format!("node {node_id}")))?;
            node.candidate_priority = candidate_priority;
            tx.update_node(node.clone());
            Ok(node)
        })?;
        self.apply_settings_on_group_primary(&node.formation_id, node.group_id)?;
        self.get_node_state(node_id)
    }

    pub fn set_node_replication_quorum(&self, node_id: i64, replication_quorum: bool) -> MonitorResult<Node> {
        let node = self.catalog.transaction(|tx| {
            let mut node = tx
                .get_node(node_id)
                .ok_or_else(|| MonitorError::NotFound(format!("node {node_id}")))?;
            node.replication_quorum = replication_quorum;
            tx.update_node(node.clone());
            Ok(node)
        })?;
        self.apply_settings_on_group_primary(&node.formation_id, node.group_id)?;
        self.get_node_state(node_id)
    }

    /// A replication-settings change (quorum, priority, sync-standby count)
    /// invalidates the primary's `synchronous_standby_names`. Nudge any
    /// primary currently converged on `primary` back through
    /// `apply_settings` so its agent regenerates its configuration; P4
    /// then carries it back to `primary` once it reports in.
    fn apply_settings_on_group_primary(&self, formation_id: &str, group_id: i32) -> MonitorResult<()> {
        let now = self.settings.clock.now();
        let primary_id = self.catalog.transaction(|tx| {
            let Some(primary) = tx.primary_node(formation_id, group_id) else {
                return Ok(None);
            };
            if primary.reported_state != ReplicationState::Primary
                || primary.goal_state == ReplicationState::ApplySettings
            {
                return Ok(None);
            }
            tx.set_goal_state(primary.node_id, ReplicationState::ApplySettings, now)?;
            Ok(Some(primary.node_id))
        })?;

        if let Some(primary_id) = primary_id {
            let primary = self.get_node_state(primary_id)?;
            self.notifier.notify_state_change(
                primary.node_id,
                &primary.node_name,
                primary.node_port,
                &primary.formation_id,
                primary.group_id,
                primary.reported_state,
                primary.goal_state,
                primary.pgsr_sync_state,
                primary.reported_lsn,
                primary.candidate_priority,
                primary.replication_quorum,
                self.notifier.log_and_notify(format!(
                    "Setting goal state of {}:{} to apply_settings after a replication setting changed.",
                    primary.node_name, primary.node_port
                )),
            );
        }
        Ok(())
    }

    /// Same as `apply_settings_on_group_primary`, but for every group in a
    /// formation — used when a formation-wide setting like
    /// `number_sync_standbys` changes.
    fn apply_settings_on_every_primary(&self, formation_id: &str) -> MonitorResult<()> {
        let group_ids: std::collections::BTreeSet<i32> = self
            .catalog
            .transaction(|tx| Ok(tx.list_nodes_in_formation(formation_id)))?
            .into_iter()
            .map(|n| n.group_id)
            .collect();

        for group_id in group_ids {
            self.apply_settings_on_group_primary(formation_id, group_id)?;
        }
        Ok(())
    }

    /// Operator-initiated failover: picks the best candidate among the
    /// primary's current secondaries (highest `candidate_priority`,
    /// smallest LSN gap, smallest `node_id`, in that order) and forces the
    /// primary into `draining` to kick off the same promotion path R4–R7
    /// would otherwise drive.
    pub fn perform_failover(&self, formation_id: &str, group_id: i32) -> MonitorResult<Node> {
        let span = info_span!("perform_failover", formation_id, group_id);
        let _enter = span.enter();

        let now = self.settings.clock.now();
        let (primary_id, candidate_id) = self.catalog.transaction(|tx| {
            let nodes = tx.list_nodes(formation_id, group_id);
            let primary = nodes
                .iter()
                .find(|n| n.reported_state.is_primary_role())
                .cloned()
                .ok_or_else(|| {
                    MonitorError::InvalidState(format!(
                        "no primary in formation '{formation_id}' group {group_id}"
                    ))
                })?;

            let candidate_id = fsm::select_best_failover_candidate(&nodes, &primary).ok_or_else(|| {
                MonitorError::InvalidState("no eligible failover candidate".to_string())
            })?;

            tx.set_goal_state(primary.node_id, ReplicationState::Draining, now)?;
            Ok((primary.node_id, candidate_id))
        })?;

        self.notifier.log_and_notify(format!(
            "Operator-initiated failover: draining primary {primary_id}, promoting candidate {candidate_id}."
        ));
        self.run_fsm_and_apply(primary_id)?;
        self.run_fsm_and_apply(candidate_id)
    }

    pub fn get_node_state(&self, node_id: i64) -> MonitorResult<Node> {
        self.catalog
            .transaction(|tx| tx.get_node(node_id).ok_or_else(|| MonitorError::NotFound(format!("node {node_id}"))))
    }

    pub fn get_nodes(&self, formation_id: &str, group_id: i32) -> MonitorResult<Vec<Node>> {
        self.catalog.transaction(|tx| Ok(tx.list_nodes(formation_id, group_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FakeClock;

    fn api_with_fake_clock() -> (MonitorApi, FakeClock) {
        let clock = FakeClock::new();
        let settings = MonitorSettings {
            clock: Arc::new(clock.clone()),
            monitor_start: clock.now(),
            ..MonitorSettings::default()
        };
        (MonitorApi::new(settings), clock)
    }

    #[test]
    fn single_node_converges_to_single() {
        let (api, _clock) = api_with_fake_clock();
        let node = api
            .register_node("default", 0, "a", "localhost", 5432, 100, true)
            .unwrap();
        assert_eq!(node.goal_state, ReplicationState::Single);
    }

    #[test]
    fn second_node_drives_primary_to_wait_primary_then_catchingup() {
        let (api, _clock) = api_with_fake_clock();
        let a = api
            .register_node("default", 0, "a", "localhost", 5432, 100, true)
            .unwrap();
        assert_eq!(a.goal_state, ReplicationState::Single);

        // a reports converged to single.
        let a = api
            .node_active(a.node_id, ReplicationState::Single, 0, SyncState::Unknown, Health::Good, true)
            .unwrap();
        assert_eq!(a.goal_state, ReplicationState::Single);

        let b = api
            .register_node("default", 0, "b", "localhost", 5433, 100, true)
            .unwrap();
        assert_eq!(b.reported_state, ReplicationState::Init);
        assert_eq!(b.goal_state, ReplicationState::WaitStandby);

        // b's agent actually reports wait_standby.
        api.node_active(b.node_id, ReplicationState::WaitStandby, 0, SyncState::Unknown, Health::Good, true)
            .unwrap();

        // a notices b waiting and is driven to wait_primary once it reports
        // its own current (single) state again.
        let a_after = api
            .node_active(a.node_id, ReplicationState::Single, 0, SyncState::Unknown, Health::Good, true)
            .unwrap();
        assert_eq!(a_after.goal_state, ReplicationState::WaitPrimary);
    }

    #[test]
    fn remove_node_errors_on_unknown_id() {
        let (api, _clock) = api_with_fake_clock();
        let err = api.remove_node(999).unwrap_err();
        assert!(matches!(err, MonitorError::NotFound(_)));
    }

    #[test]
    fn set_replication_settings_accepts_zero_standbys() {
        let (api, _clock) = api_with_fake_clock();
        api.register_node("default", 0, "a", "localhost", 5432, 100, true)
            .unwrap();
        let formation = api.set_replication_settings("default", 0).unwrap();
        assert_eq!(formation.number_sync_standbys, 0);
    }

    #[test]
    fn get_nodes_lists_group_members_sorted() {
        let (api, _clock) = api_with_fake_clock();
        api.register_node("default", 0, "a", "localhost", 5432, 100, true)
            .unwrap();
        api.register_node("default", 0, "b", "localhost", 5433, 100, true)
            .unwrap();
        let nodes = api.get_nodes("default", 0).unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].node_id < nodes[1].node_id);
    }
}
