//! The iterative state machine that watches the cluster through a seed node
//! and drives partition recovery.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::core::node::{MemberState, NodeLike};
use crate::core::state::ArbitratorState;

const TICK: Duration = Duration::from_secs(2);
const RETRY_TICK: Duration = Duration::from_secs(1);

/// Whether an OFFLINE member is fenced read-only during the quorum branch.
/// A single named switch rather than a CLI flag: flip it here if an
/// operator ever needs the narrower upstream behavior back.
const FENCE_OFFLINE_MEMBERS: bool = true;

/// Drives the arbitration loop against any `NodeLike` implementation, so
/// tests can substitute an in-memory double for a real MySQL connection.
pub struct Arbitrator<N: NodeLike> {
    state: Arc<ArbitratorState<N>>,
    seed: N,
}

impl<N: NodeLike> Arbitrator<N> {
    pub fn new(state: Arc<ArbitratorState<N>>, seed: N) -> Self {
        Self { state, seed }
    }

    /// Runs the loop forever. Only returns (for tests) when `make_seed`
    /// signals there is nothing left to try; the production binary never
    /// observes this return.
    pub async fn run(&mut self, last_view: &mut Vec<N>) {
        loop {
            self.tick(last_view).await;
        }
    }

    /// Runs exactly one iteration of steps (a) through (f). Broken out from
    /// `run` so tests can drive individual iterations deterministically.
    pub async fn tick(&mut self, last_view: &mut Vec<N>) {
        self.state.publish(self.seed.clone(), last_view.clone());

        if !self.validate_seed(last_view).await {
            sleep(RETRY_TICK).await;
            return;
        }

        let Some(has_quorum) = self.refresh_view(last_view).await else {
            sleep(RETRY_TICK).await;
            return;
        };

        if has_quorum {
            debug!(seed = self.seed.host(), "seed reports quorum");
            self.quorum_branch(last_view).await;
        } else {
            self.no_quorum_branch(last_view).await;
        }

        sleep(TICK).await;
    }

    /// Step (b). Returns false if no usable seed could be found this tick.
    async fn validate_seed(&mut self, last_view: &[N]) -> bool {
        let ok = self.seed.connect().await.is_ok() && self.seed.member_state() == Some(MemberState::Online);
        if ok {
            return true;
        }

        for candidate in last_view {
            if *candidate == self.seed {
                continue;
            }
            let mut candidate = candidate.clone();
            if candidate.connect().await.is_ok() && candidate.member_state() == Some(MemberState::Online) {
                info!(host = candidate.host(), port = candidate.port(), "replacing seed");
                self.seed = candidate;
                return true;
            }
        }

        warn!("no usable seed found, resetting and retrying");
        self.seed.reset();
        false
    }

    /// Step (c). Returns `None` (triggering reset-and-retry) on any failure
    /// or when the seed reports fewer than one online participant;
    /// otherwise returns whether the seed currently holds quorum.
    async fn refresh_view(&mut self, last_view: &mut Vec<N>) -> Option<bool> {
        let members = match self.seed.get_members().await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "get_members failed");
                return None;
            }
        };
        let has_quorum = match self.seed.has_quorum().await {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "has_quorum failed");
                return None;
            }
        };

        if self.seed.online_participants().unwrap_or(0) < 1 {
            warn!("seed reports no online participants");
            return None;
        }

        *last_view = members;
        Some(has_quorum)
    }

    /// Step (d). Reconciles every non-seed node: fences OFFLINE members,
    /// shoots ERROR or no-quorum members.
    async fn quorum_branch(&mut self, last_view: &[N]) {
        for node in last_view {
            if *node == self.seed {
                continue;
            }
            let mut node = node.clone();
            if node.connect().await.is_err() {
                continue;
            }

            if node.member_state() == Some(MemberState::Offline) {
                if FENCE_OFFLINE_MEMBERS {
                    if let Err(e) = node.set_read_only(true).await {
                        warn!(host = node.host(), port = node.port(), error = %e, "set_read_only failed");
                    }
                }
                continue;
            }

            let state = node.member_status().await.unwrap_or(MemberState::Unreachable);
            let quorum = node.has_quorum().await.unwrap_or(false);
            if state == MemberState::Error || !quorum {
                if let Err(e) = node.shutdown().await {
                    warn!(host = node.host(), port = node.port(), error = %e, "shutdown failed");
                }
            }
        }
    }

    /// Step (e). Called from within `refresh_view` once no-quorum is
    /// detected on the seed.
    async fn no_quorum_branch(&mut self, last_view: &mut Vec<N>) {
        self.state.record_partition();

        // (e.2) re-scan for a node that independently reports quorum.
        for candidate in last_view.iter() {
            let mut candidate = candidate.clone();
            if candidate.connect().await.is_err() {
                continue;
            }
            if candidate.has_quorum().await.unwrap_or(false) {
                if let Ok(members) = candidate.get_members().await {
                    info!(host = candidate.host(), port = candidate.port(), "healed quorum found");
                    self.seed = candidate;
                    *last_view = members;
                    return;
                }
            }
        }

        // (e.3) no healed quorum: pick the winning sub-partition.
        let Some(winner_idx) = Self::pick_winner(last_view).await else {
            warn!("no winning partition could be determined this tick");
            return;
        };

        let mut chosen = last_view[winner_idx].clone();
        if chosen.connect().await.is_err() {
            warn!(host = chosen.host(), port = chosen.port(), "winning seed unreachable, resetting and retrying next tick");
            chosen.reset();
            return;
        }

        // (e.5) fresh members from the winner's perspective.
        let Ok(mut members) = chosen.get_members().await else {
            warn!("winner's get_members failed, retrying next tick");
            return;
        };

        let mut gcs_addrs = Vec::new();
        for member in members.iter_mut() {
            if member.connect().await.is_err() {
                member.mark_shoot_me();
                continue;
            }
            if member.member_state() == Some(MemberState::Online) {
                match member.get_gcs_address().await {
                    Ok(addr) if !addr.is_empty() => gcs_addrs.push(addr),
                    _ => member.mark_shoot_me(),
                }
            } else {
                member.mark_shoot_me();
            }
        }

        if gcs_addrs.is_empty() {
            info!("no online members to force membership with, no corrective action this tick");
            self.seed = chosen;
            Self::sanitize_for_publish(&mut members);
            *last_view = members;
            return;
        }

        let list = gcs_addrs.join(",");
        match chosen.force_members(&list).await {
            Ok(()) => {
                info!(list = %list, "forced membership");
                for member in members.iter_mut() {
                    if member.member_state() == Some(MemberState::ShootMe) {
                        if let Err(e) = member.shutdown().await {
                            warn!(host = member.host(), port = member.port(), error = %e, "shutdown of losing member failed");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "force_members failed");
            }
        }

        self.seed = chosen;
        Self::sanitize_for_publish(&mut members);
        *last_view = members;
    }

    /// Strips the scratch `SHOOT_ME` bookkeeping marker before a view is
    /// published. `SHOOT_ME` only ever exists on the working copy built
    /// while deciding which members to fence this tick; `LastView` must
    /// read the same as the winner's own `GetMembers` response, never that
    /// scratch copy, so any member still tagged `SHOOT_ME` at this point
    /// (its owning node has already been shut down) has its cache cleared
    /// instead of carrying the sentinel into a published or serialized view.
    fn sanitize_for_publish(members: &mut [N]) {
        for member in members.iter_mut() {
            if member.member_state() == Some(MemberState::ShootMe) {
                member.reset();
            }
        }
    }

    /// (e.3): sort ascending by `OnlineParticipants`, the last entry wins on
    /// size alone; ties are broken by scanning backward from the top while
    /// equality holds, keeping the earliest-encountered highest transaction
    /// count. Returns `None` only for an empty view.
    async fn pick_winner(last_view: &mut [N]) -> Option<usize> {
        if last_view.is_empty() {
            return None;
        }
        last_view.sort_by_key(|n| n.online_participants().unwrap_or(0));

        let top = last_view.len() - 1;
        let top_count = last_view[top].online_participants().unwrap_or(0);

        let mut tie_start = top;
        while tie_start > 0 && last_view[tie_start - 1].online_participants().unwrap_or(0) == top_count {
            tie_start -= 1;
        }

        if tie_start == top {
            return Some(top);
        }

        // A malformed GTID set anywhere in the tie group makes transaction
        // count an unreliable signal for the whole comparison; per §7, a
        // parse failure must fall through to the size-based winner (`top`)
        // rather than be treated as a zero count, which would let a
        // candidate win purely because another one failed to parse.
        let mut best_idx = top;
        let mut best_count = None;
        for idx in (tie_start..=top).rev() {
            let count = match last_view[idx].transactions_executed_count().await {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, "GTID parse failed during tie-break, falling back to size-based winner");
                    return Some(top);
                }
            };
            if best_count.map_or(true, |best| count > best) {
                best_count = Some(count);
                best_idx = idx;
            }
        }
        Some(best_idx)
    }
}
