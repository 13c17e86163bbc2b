// src/core/catalog.rs

//! A transactional store for formations and nodes. Per spec, persistence of
//! the monitor's own catalog is treated as an external collaborator — a
//! generic transactional key/value store — consumed through this narrow
//! interface. `InMemoryCatalog` is the in-process realization used by the
//! monitor binary; every API call that may change goal states runs its
//! reads and writes inside a single `transaction()` call, which this
//! implementation serializes with one process-wide lock (see DESIGN.md for
//! the trade-off against a real MVCC/2PL-backed store).

use super::errors::{MonitorError, MonitorResult};
use super::model::{Formation, Node, ReplicationState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Default)]
struct CatalogState {
    formations: HashMap<String, Formation>,
    nodes: HashMap<i64, Node>,
    next_node_id: i64,
}

/// A transactional node/formation catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against a consistent snapshot of the catalog under a single
    /// exclusive lock. Because only one transaction can run at a time,
    /// writes never interleave and there is nothing for a caller to
    /// actually retry on `MonitorError::Conflict` in this implementation —
    /// the error variant is kept for API parity with a real transactional
    /// store, where a `serialize` failure is a legitimate outcome.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut CatalogTxn) -> MonitorResult<R>,
    ) -> MonitorResult<R> {
        let mut state = self.state.lock();
        let mut txn = CatalogTxn { state: &mut state };
        f(&mut txn)
    }
}

/// A handle into the catalog valid only for the lifetime of one
/// transaction.
pub struct CatalogTxn<'a> {
    state: &'a mut CatalogState,
}

impl CatalogTxn<'_> {
    pub fn get_formation(&self, formation_id: &str) -> Option<Formation> {
        self.state.formations.get(formation_id).cloned()
    }

    pub fn upsert_formation(&mut self, formation: Formation) {
        self.state
            .formations
            .insert(formation.formation_id.clone(), formation);
    }

    pub fn get_node(&self, node_id: i64) -> Option<Node> {
        self.state.nodes.get(&node_id).cloned()
    }

    pub fn get_node_by_name(&self, node_name: &str, port: u16) -> Option<Node> {
        self.state
            .nodes
            .values()
            .find(|n| n.node_name == node_name && n.node_port == port)
            .cloned()
    }

    /// Nodes in a (formation, group), ordered by `node_id`.
    pub fn list_nodes(&self, formation_id: &str, group_id: i32) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .state
            .nodes
            .values()
            .filter(|n| n.formation_id == formation_id && n.group_id == group_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    /// Every node in a formation, across all of its groups, ordered by
    /// `node_id`.
    pub fn list_nodes_in_formation(&self, formation_id: &str) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .state
            .nodes
            .values()
            .filter(|n| n.formation_id == formation_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    /// Same group as `node`, excluding `node` itself.
    pub fn other_nodes(&self, node: &Node) -> Vec<Node> {
        self.list_nodes(&node.formation_id, node.group_id)
            .into_iter()
            .filter(|n| n.node_id != node.node_id)
            .collect()
    }

    /// The unique node in a primary-role reported state, or `None`.
    /// Invariant 1 guarantees at most one match.
    pub fn primary_node(&self, formation_id: &str, group_id: i32) -> Option<Node> {
        self.list_nodes(formation_id, group_id)
            .into_iter()
            .find(|n| n.reported_state.is_primary_role())
    }

    pub fn insert_node(&mut self, mut node: Node) -> i64 {
        if node.node_id == 0 {
            self.state.next_node_id += 1;
            node.node_id = self.state.next_node_id;
        } else {
            self.state.next_node_id = self.state.next_node_id.max(node.node_id);
        }
        let id = node.node_id;
        self.state.nodes.insert(id, node);
        id
    }

    pub fn update_node(&mut self, node: Node) {
        self.state.nodes.insert(node.node_id, node);
    }

    pub fn remove_node(&mut self, node_id: i64) -> MonitorResult<Node> {
        self.state
            .nodes
            .remove(&node_id)
            .ok_or_else(|| MonitorError::NotFound(format!("node {node_id}")))
    }

    /// Assigns a new goal state to a node. Invariant 2 (agents never write
    /// `goal_state`) is enforced by construction: this is the only mutator
    /// of `goal_state`, and only the FSM / API layer calls it. Invariant 3
    /// (`state_change_time` updates iff `goal_state` changes) is enforced
    /// here.
    pub fn set_goal_state(&mut self, node_id: i64, state: ReplicationState, now: Instant) -> MonitorResult<Node> {
        let node = self
            .state
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| MonitorError::NotFound(format!("node {node_id}")))?;
        if node.goal_state != state {
            node.goal_state = state;
            node.state_change_time = now;
        }
        Ok(node.clone())
    }
}
