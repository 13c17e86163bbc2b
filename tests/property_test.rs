// tests/property_test.rs

//! Property-based tests for invariants that must hold regardless of the
//! particular sequence of agent reports the monitor receives.

use pgwarden::core::api::{MonitorApi, MonitorSettings};
use pgwarden::core::clock::FakeClock;
use pgwarden::core::model::{Health, ReplicationState, SyncState};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn new_api() -> (MonitorApi, FakeClock) {
    let clock = FakeClock::new();
    clock.advance(Duration::from_secs(60));
    let settings = MonitorSettings {
        clock: Arc::new(clock.clone()),
        monitor_start: clock.now() - Duration::from_secs(60),
        ..MonitorSettings::default()
    };
    (MonitorApi::new(settings), clock)
}

/// A small universe of reported states an agent might plausibly claim,
/// reachable from each other in some order; deliberately includes states
/// that are guard-incompatible with each other so the FSM's first-match
/// ordering gets exercised.
fn arb_reported_state() -> impl Strategy<Value = ReplicationState> {
    prop_oneof![
        Just(ReplicationState::Single),
        Just(ReplicationState::WaitPrimary),
        Just(ReplicationState::Primary),
        Just(ReplicationState::WaitStandby),
        Just(ReplicationState::CatchingUp),
        Just(ReplicationState::Secondary),
    ]
}

fn arb_health() -> impl Strategy<Value = Health> {
    prop_oneof![Just(Health::Good), Just(Health::Bad), Just(Health::Unknown)]
}

proptest! {
    /// Invariant 1: at most one node per group is in a primary-role
    /// reported state at any commit boundary, regardless of the sequence
    /// of (possibly nonsensical) reports two agents send.
    #[test]
    fn invariant_at_most_one_primary_role_node(
        reports in prop::collection::vec((any::<bool>(), arb_reported_state(), 0u64..2000, arb_health()), 1..30)
    ) {
        let (api, _clock) = new_api();
        let a = api.register_node("f", 0, "a", "h", 5432, 100, true).unwrap();
        let b = api.register_node("f", 0, "b", "h", 5433, 100, true).unwrap();

        for (pick_a, state, lsn, health) in reports {
            let node_id = if pick_a { a.node_id } else { b.node_id };
            // Ignore errors: a malformed report is still required not to
            // break the invariant even if the catalog rejects the call.
            let _ = api.node_active(node_id, state, lsn, SyncState::Unknown, health, true);

            let nodes = api.get_nodes("f", 0).unwrap();
            let primary_role_count = nodes.iter().filter(|n| n.reported_state.is_primary_role()).count();
            prop_assert!(primary_role_count <= 1, "more than one primary-role node: {:?}", nodes);
        }
    }

    /// Invariant 2: `state_change_time` advances exactly when `goal_state`
    /// does, never on its own and never silently skipped.
    #[test]
    fn invariant_state_change_time_tracks_goal_state(
        reports in prop::collection::vec((arb_reported_state(), 0u64..2000), 1..20)
    ) {
        let (api, clock) = new_api();
        let a = api.register_node("f", 0, "a", "h", 5432, 100, true).unwrap();

        let mut prev_goal = a.goal_state;
        let mut prev_change_time = a.state_change_time;

        for (state, lsn) in reports {
            clock.advance(Duration::from_millis(1));
            let node = api
                .node_active(a.node_id, state, lsn, SyncState::Unknown, Health::Good, true)
                .unwrap();

            if node.goal_state != prev_goal {
                prop_assert_ne!(node.state_change_time, prev_change_time);
            } else {
                prop_assert_eq!(node.state_change_time, prev_change_time);
            }

            prev_goal = node.goal_state;
            prev_change_time = node.state_change_time;
        }
    }

    /// Invariant 3: `reported_lsn` never decreases within a run that does
    /// not cross `demoted`. A demotion legitimately resets the tracked
    /// position (the node may resync from a different point), so only
    /// runs between demotions are checked for monotonicity.
    #[test]
    fn invariant_lsn_monotonic_outside_demotion(
        steps in prop::collection::vec((1u64..1000, any::<bool>()), 1..25)
    ) {
        let (api, _clock) = new_api();
        let a = api.register_node("f", 0, "a", "h", 5432, 100, true).unwrap();
        api.node_active(a.node_id, ReplicationState::Single, 100, SyncState::Unknown, Health::Good, true)
            .unwrap();

        let mut lsn = 100u64;
        let mut floor = lsn;

        for (delta, cross_demote) in steps {
            if cross_demote {
                let node = api
                    .node_active(a.node_id, ReplicationState::Demoted, lsn, SyncState::Unknown, Health::Good, true)
                    .unwrap();
                prop_assert_eq!(node.reported_lsn, lsn);

                // A resync after demotion may legitimately start from a
                // lower position; this does not violate the invariant.
                lsn = delta;
                let node = api
                    .node_active(a.node_id, ReplicationState::CatchingUp, lsn, SyncState::Sync, Health::Good, true)
                    .unwrap();
                prop_assert_eq!(node.reported_lsn, lsn);
                floor = lsn;
            } else {
                lsn += delta;
                let node = api
                    .node_active(a.node_id, ReplicationState::Secondary, lsn, SyncState::Sync, Health::Good, true)
                    .unwrap();
                prop_assert_eq!(node.reported_lsn, lsn);
                prop_assert!(node.reported_lsn >= floor, "lsn decreased without crossing demoted");
                floor = lsn;
            }
        }
    }

    /// Invariant 5: one node joining an empty group and a second node
    /// joining after it always reach converged (`primary`, `secondary`),
    /// however much redundant re-reporting of already-converged state is
    /// interleaved along the way (idempotent by invariant 4).
    #[test]
    fn invariant_eventual_convergence(noise in prop::collection::vec(any::<bool>(), 0..15)) {
        let (api, _clock) = new_api();
        let a = api.register_node("f", 0, "a", "h", 5432, 100, true).unwrap();
        let a = api
            .node_active(a.node_id, ReplicationState::Single, 100, SyncState::Unknown, Health::Good, true)
            .unwrap();
        let b = api.register_node("f", 0, "b", "h", 5433, 100, true).unwrap();

        // Noise: redundant re-reports of a's already-converged state.
        for _ in noise.iter().filter(|keep| **keep) {
            api.node_active(a.node_id, ReplicationState::Single, 100, SyncState::Unknown, Health::Good, true)
                .unwrap();
        }

        // A notices B waiting for a standby slot.
        let a = api
            .node_active(a.node_id, ReplicationState::Single, 100, SyncState::Unknown, Health::Good, true)
            .unwrap();
        prop_assert_eq!(a.goal_state, ReplicationState::WaitPrimary);
        api.node_active(a.node_id, ReplicationState::WaitPrimary, 100, SyncState::Unknown, Health::Good, true)
            .unwrap();

        // B notices A is now waiting for a standby to catch up.
        let b = api
            .node_active(b.node_id, ReplicationState::WaitStandby, 100, SyncState::Unknown, Health::Good, true)
            .unwrap();
        prop_assert_eq!(b.goal_state, ReplicationState::CatchingUp);

        // B catches up to A's LSN, driving both goals at once.
        let b = api
            .node_active(b.node_id, ReplicationState::CatchingUp, 100, SyncState::Sync, Health::Good, true)
            .unwrap();
        prop_assert_eq!(b.goal_state, ReplicationState::Secondary);

        // B reports secondary before A reports primary — the fixed
        // primary-first lock order governs catalog writes, not report
        // order, and the new secondary must be visible before the primary
        // re-checks for a failover candidate.
        api.node_active(b.node_id, ReplicationState::Secondary, 100, SyncState::Sync, Health::Good, true)
            .unwrap();
        let a = api
            .node_active(a.node_id, ReplicationState::Primary, 100, SyncState::Unknown, Health::Good, true)
            .unwrap();

        let b = api.get_node_state(b.node_id).unwrap();
        prop_assert!(a.has_converged(), "a did not converge: {:?}", a);
        prop_assert!(b.has_converged(), "b did not converge: {:?}", b);
        prop_assert_eq!(a.reported_state, ReplicationState::Primary);
        prop_assert_eq!(b.reported_state, ReplicationState::Secondary);
    }
}

/// Invariant 4: re-reporting an unchanged state is a no-op at the event
/// log level — the FSM may re-derive the same assignment, but since the
/// goal state already matches, no second notification is published.
#[test]
fn invariant_repeated_identical_report_emits_no_new_events() {
    let (api, _clock) = new_api();
    let a = api.register_node("f", 0, "a", "h", 5432, 100, true).unwrap();
    let a = api
        .node_active(a.node_id, ReplicationState::Single, 0, SyncState::Unknown, Health::Good, true)
        .unwrap();
    assert_eq!(a.goal_state, ReplicationState::Single);

    let events_before = api.notifier().events().len();
    api.node_active(a.node_id, ReplicationState::Single, 0, SyncState::Unknown, Health::Good, true)
        .unwrap();
    let events_after = api.notifier().events().len();

    assert_eq!(events_before, events_after, "no-op report must not publish a new state-change event");
}

/// Boundary behavior: a zero LSN on either side never counts as "within"
/// any threshold, however large.
#[test]
fn boundary_zero_lsn_never_within_any_threshold() {
    use pgwarden::core::lag::wal_diff_within;
    use pgwarden::core::model::{Node, SyncState as SS};
    use std::time::Instant;

    fn node(lsn: u64) -> Node {
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
            pgsr_sync_state: SS::Sync,
            candidate_priority: 100,
            replication_quorum: true,
            health: Health::Good,
            report_time: now,
            health_check_time: now,
            state_change_time: now,
            pg_is_running: true,
        }
    }

    let zero = node(0);
    let nonzero = node(1_000_000);
    assert!(!wal_diff_within(Some(&zero), Some(&nonzero), u64::MAX));
}
