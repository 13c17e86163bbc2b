// src/core/model.rs

//! The data model: formations, nodes, and the closed tagged-variant
//! enumerations the FSM rule tables are exhaustively checked against.
//! Replaces the source's integer-enum-plus-string-conversion idiom.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A node's role in the replication topology, derived from `ReplicationState`
/// but useful on its own for grouping rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateRole {
    PreRole,
    Primary,
    Replica,
    Demoting,
    Demoted,
    Paused,
}

/// The full set of states a node's `reported_state`/`goal_state` can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationState {
    Init,
    Single,
    WaitPrimary,
    JoinPrimary,
    Primary,
    ApplySettings,
    WaitStandby,
    CatchingUp,
    Secondary,
    PreparePromotion,
    StopReplication,
    Draining,
    DemoteTimeout,
    Demoted,
    Maintenance,
    Dropped,
}

impl ReplicationState {
    /// Whether this state counts toward invariant 1: at most one node per
    /// group may be in a primary-role reported state.
    pub fn is_primary_role(self) -> bool {
        matches!(
            self,
            ReplicationState::Primary
                | ReplicationState::WaitPrimary
                | ReplicationState::JoinPrimary
                | ReplicationState::Single
                | ReplicationState::ApplySettings
        )
    }

    pub fn role(self) -> StateRole {
        use ReplicationState::*;
        match self {
            Init => StateRole::PreRole,
            Single | WaitPrimary | JoinPrimary | Primary | ApplySettings => StateRole::Primary,
            WaitStandby | CatchingUp | Secondary | PreparePromotion | StopReplication => {
                StateRole::Replica
            }
            Draining | DemoteTimeout => StateRole::Demoting,
            Demoted => StateRole::Demoted,
            Maintenance => StateRole::Paused,
            Dropped => StateRole::Demoted,
        }
    }
}

/// Synchronous-replication state as reported by the node agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Unknown,
    Async,
    Potential,
    Sync,
    Quorum,
}

/// Health as observed by an out-of-band health probe. Distinct from
/// freshness of agent reports: both dimensions participate in
/// `is_unhealthy`, and neither should be conflated with the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    #[default]
    Unknown,
    Good,
    Bad,
}

/// The kind of formation, controlling whether the sharded short-circuit
/// rules (R5/R8) can ever fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormationKind {
    Standalone,
    ShardedCoordinator,
    ShardedWorker,
}

impl FormationKind {
    pub fn is_sharded(self) -> bool {
        matches!(
            self,
            FormationKind::ShardedCoordinator | FormationKind::ShardedWorker
        )
    }
}

/// Named container of one or more groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formation {
    pub formation_id: String,
    pub kind: FormationKind,
    pub number_sync_standbys: u32,
}

/// A single database node's identity, membership, and state fields.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: i64,
    pub node_name: String,
    pub node_host: String,
    pub node_port: u16,

    pub formation_id: String,
    pub group_id: i32,

    pub reported_state: ReplicationState,
    pub goal_state: ReplicationState,
    pub reported_lsn: u64,
    pub pgsr_sync_state: SyncState,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
    pub health: Health,

    pub report_time: Instant,
    pub health_check_time: Instant,
    pub state_change_time: Instant,
    pub pg_is_running: bool,
}

impl Node {
    /// Invariant 4: a node has converged when its reported state matches
    /// its assigned goal state.
    pub fn has_converged(&self) -> bool {
        self.reported_state == self.goal_state
    }

    /// A sync candidate per the glossary: a caught-up secondary with
    /// `replication_quorum = true` and `candidate_priority > 0`.
    pub fn is_sync_candidate(&self) -> bool {
        self.reported_state == ReplicationState::Secondary
            && self.replication_quorum
            && self.candidate_priority > 0
    }
}
