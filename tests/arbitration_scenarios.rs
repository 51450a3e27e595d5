//! End-to-end scenarios from the arbitration loop's testable properties:
//! healthy clusters, stragglers, maintenance, clean and tied partitions,
//! and the force-members/clear failure split.
//!
//! `MockNode` wraps a shared `Arc<Mutex<..>>`, so `with_*` builders can be
//! called on a clone to mutate the same underlying state in place; the
//! return value is then discarded rather than rebound.

mod support;

use std::sync::Arc;

use quorumd::core::arbitrator::Arbitrator;
use quorumd::core::node::MemberState;
use quorumd::core::state::ArbitratorState;

use support::MockNode;

fn seeded(host: &str, port: u16) -> MockNode {
    MockNode::new(host, port).with_state(MemberState::Online)
}

#[tokio::test(start_paused = true)]
async fn healthy_cluster_takes_no_action() {
    let seed = seeded("s", 3306).with_quorum(true).with_online_participants(3);
    let a = seeded("a", 3307).with_quorum(true);
    let b = seeded("b", 3308).with_quorum(true);
    seed.clone().with_members(vec![seed.clone(), a.clone(), b.clone()]);

    let state = Arc::new(ArbitratorState::new(seed.clone()));
    let mut arbitrator = Arbitrator::new(state, seed);
    let mut last_view = vec![seeded("s", 3306), a.clone(), b.clone()];

    arbitrator.tick(&mut last_view).await;

    assert_eq!(a.shutdown_calls(), 0);
    assert_eq!(b.shutdown_calls(), 0);
    assert_eq!(last_view.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn straggler_in_error_state_is_shut_down() {
    let seed = seeded("s", 3306).with_quorum(true).with_online_participants(3);
    let a_peer = MockNode::new("a", 3307).with_state(MemberState::Error).with_quorum(false);
    let b_peer = seeded("b", 3308).with_quorum(true);
    seed.clone()
        .with_members(vec![seed.clone(), a_peer.clone(), b_peer.clone()]);

    let state = Arc::new(ArbitratorState::new(seed.clone()));
    let mut arbitrator = Arbitrator::new(state, seed);
    let mut last_view = vec![seeded("s", 3306), a_peer.clone(), b_peer.clone()];

    arbitrator.tick(&mut last_view).await;

    assert_eq!(a_peer.shutdown_calls(), 1);
    assert_eq!(b_peer.shutdown_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn offline_member_is_fenced_read_only_not_shut_down() {
    let seed = seeded("s", 3306).with_quorum(true).with_online_participants(2);
    let a_peer = MockNode::new("a", 3307).with_state(MemberState::Offline);
    seed.clone().with_members(vec![seed.clone(), a_peer.clone()]);

    let state = Arc::new(ArbitratorState::new(seed.clone()));
    let mut arbitrator = Arbitrator::new(state, seed);
    let mut last_view = vec![seeded("s", 3306), a_peer.clone()];

    arbitrator.tick(&mut last_view).await;

    assert_eq!(a_peer.set_read_only_calls(), vec![true]);
    assert_eq!(a_peer.shutdown_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn clean_partition_picks_the_larger_side_and_fences_the_smaller() {
    // S, A form the 2-node partition; B, C, D form the 3-node partition.
    // `replication_group_members` always lists every configured member, so
    // each node's own GetMembers() returns all five, scoped by what that
    // node can see as ONLINE.
    let s = MockNode::new("s", 1).with_state(MemberState::Online).with_online_participants(2).with_quorum(false);
    let a = MockNode::new("a", 2).with_state(MemberState::Online).with_online_participants(2).with_quorum(false);
    let b = MockNode::new("b", 3).with_state(MemberState::Online).with_online_participants(3).with_quorum(false);
    let c = MockNode::new("c", 4).with_state(MemberState::Online).with_online_participants(3).with_quorum(false);
    let d = MockNode::new("d", 5).with_state(MemberState::Online).with_online_participants(3).with_quorum(false);

    let whole = vec![s.clone(), a.clone(), b.clone(), c.clone(), d.clone()];
    s.clone().with_members(whole.clone());
    // D's own view of the winning sub-partition only names B, C, D.
    d.clone().with_members(vec![b.clone(), c.clone(), d.clone()]);

    let state = Arc::new(ArbitratorState::new(s.clone()));
    let mut arbitrator = Arbitrator::new(state, s.clone());
    let mut last_view = whole;

    arbitrator.tick(&mut last_view).await;

    let force_calls = d.force_members_calls();
    assert_eq!(force_calls.len(), 1);
    for expect_host in ["b", "c", "d"] {
        assert!(force_calls[0].contains(expect_host));
    }
    assert_eq!(s.shutdown_calls(), 0);
    assert_eq!(a.shutdown_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn tied_partition_breaks_on_transaction_count() {
    let s = MockNode::new("s", 1).with_state(MemberState::Online).with_online_participants(2).with_quorum(false).with_gtid_count(999_999);
    let a = MockNode::new("a", 2).with_state(MemberState::Online).with_online_participants(2).with_quorum(false).with_gtid_count(999_999);
    let x = MockNode::new("x", 3).with_state(MemberState::Online).with_online_participants(2).with_quorum(false).with_gtid_count(1_000_000);
    let y = MockNode::new("y", 4).with_state(MemberState::Online).with_online_participants(2).with_quorum(false).with_gtid_count(999_999);

    let whole = vec![s.clone(), a.clone(), x.clone(), y.clone()];
    s.clone().with_members(whole.clone());
    x.clone().with_members(vec![x.clone(), y.clone()]);

    let state = Arc::new(ArbitratorState::new(s.clone()));
    let mut arbitrator = Arbitrator::new(state, s.clone());
    let mut last_view = whole;

    arbitrator.tick(&mut last_view).await;

    let force_calls = x.force_members_calls();
    assert_eq!(force_calls.len(), 1, "only x's partition should be forced");
    assert_eq!(a.force_members_calls().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn force_members_succeeds_then_clear_fails_loser_shutdown_still_runs() {
    let s = MockNode::new("s", 1).with_state(MemberState::Online).with_online_participants(1).with_quorum(false);
    let loser = MockNode::new("loser", 2).with_state(MemberState::Error).with_online_participants(0).with_quorum(false);

    let whole = vec![s.clone(), loser.clone()];
    s.clone().with_members(whole.clone());

    let state = Arc::new(ArbitratorState::new(s.clone()));
    let mut arbitrator = Arbitrator::new(state, s.clone());
    let mut last_view = whole;

    arbitrator.tick(&mut last_view).await;

    assert_eq!(loser.shutdown_calls(), 1);
    assert_eq!(s.force_members_calls().len(), 1);

    // The variable was left dirty by a failed clear: the operator has to
    // intervene, and force_members keeps failing until they do.
    s.set_force_members_fails(true);

    let mut last_view2 = vec![s.clone()];
    arbitrator.tick(&mut last_view2).await;
    assert!(s.force_members_calls().len() >= 2);
}

#[tokio::test(start_paused = true)]
async fn empty_last_view_with_failing_seed_never_forces_or_shuts_down() {
    let seed = MockNode::new("s", 3306).with_connect_fails(true);
    let state = Arc::new(ArbitratorState::new(seed.clone()));
    let mut arbitrator = Arbitrator::new(state, seed.clone());
    let mut last_view: Vec<MockNode> = Vec::new();

    arbitrator.tick(&mut last_view).await;

    assert_eq!(seed.force_members_calls().len(), 0);
    assert_eq!(seed.shutdown_calls(), 0);
    assert!(last_view.is_empty());
}

#[tokio::test(start_paused = true)]
async fn single_node_cluster_with_quorum_takes_no_action() {
    let seed = seeded("solo", 3306).with_quorum(true).with_online_participants(1);
    seed.clone().with_members(vec![seed.clone()]);

    let state = Arc::new(ArbitratorState::new(seed.clone()));
    let mut arbitrator = Arbitrator::new(state, seed.clone());
    let mut last_view = vec![seed.clone()];

    arbitrator.tick(&mut last_view).await;

    assert_eq!(seed.shutdown_calls(), 0);
    assert_eq!(seed.force_members_calls().len(), 0);
}
