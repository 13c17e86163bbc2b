// src/core/lag.rs

//! Computes the WAL-position delta between two nodes and compares it to a
//! threshold. Used both to decide when a catching-up secondary becomes a
//! sync candidate, and when a secondary is promotable on primary failure.

use super::model::Node;

/// One WAL segment, matching the original's `DEFAULT_XLOG_SEG_SIZE`.
pub const DEFAULT_XLOG_SEG_SIZE: u64 = 16 * 1024 * 1024;

/// Returns whether the two nodes' most recently reported LSNs differ by no
/// more than `delta`. Returns `false` if either LSN is zero (no data
/// reported yet); vacuously `true` if either optional node pointer is
/// absent (nothing to contradict).
pub fn wal_diff_within(a: Option<&Node>, b: Option<&Node>, delta: u64) -> bool {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return true,
    };

    if a.reported_lsn == 0 || b.reported_lsn == 0 {
        return false;
    }

    a.reported_lsn.abs_diff(b.reported_lsn) <= delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Health, ReplicationState, SyncState};
    use std::time::Instant;

    fn node_with_lsn(lsn: u64) -> Node {
        let now = Instant::now();
        Node {
            node_id: 1,
            node_name: "n".into(),
            node_host: "h".into(),
            node_port: 5432,
            formation_id: "f".into(),
            group_id: 0,
            reported_state: ReplicationState::Secondary,
            goal_state: ReplicationState::Secondary,
            reported_lsn: lsn,
            pgsr_sync_state: SyncState::Sync,
            candidate_priority: 100,
            replication_quorum: true,
            health: Health::Good,
            report_time: now,
            health_check_time: now,
            state_change_time: now,
            pg_is_running: true,
        }
    }

    #[test]
    fn zero_lsn_is_never_within() {
        let a = node_with_lsn(0);
        let b = node_with_lsn(100);
        assert!(!wal_diff_within(Some(&a), Some(&b), 1_000_000));
    }

    #[test]
    fn missing_node_is_vacuously_true() {
        let a = node_with_lsn(100);
        assert!(wal_diff_within(Some(&a), None, 0));
        assert!(wal_diff_within(None, Some(&a), 0));
    }

    #[test]
    fn within_threshold() {
        let a = node_with_lsn(1000);
        let b = node_with_lsn(1500);
        assert!(wal_diff_within(Some(&a), Some(&b), 500));
        assert!(!wal_diff_within(Some(&a), Some(&b), 499));
    }
}
