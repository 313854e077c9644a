use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot};
// Use external log crate
use ::log::{debug, info, warn};

use super::message::{VoteReply, VoteRequest};
use super::node::ClusterNode;
use super::state::{NodeRole, VotedFor};
use crate::network::metrics;

/// Receiver-side vote rule, evaluated in order.
pub fn should_grant(request: &VoteRequest, current_term: i32, voted_for: &VotedFor) -> bool {
    if request.term < current_term {
        return false;
    }
    // Equal term: the earlier request wins the tie.
    if request.term == voted_for.term && request.timestamp < voted_for.timestamp {
        return true;
    }
    if request.term > voted_for.term {
        return true;
    }
    request.term == voted_for.term && voted_for.id.is_empty()
}

/// Tally of one candidate round. The candidate's own vote is counted in
/// `granted_by` from the start.
#[derive(Debug, Clone)]
pub struct ElectionRound {
    pub term: i32,
    pub granted_by: HashSet<String>,
    pub denied: usize,
    pub dead: usize,
    pub pending: usize,
    /// Highest term reported by a denying peer.
    pub highest_term: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Won,
    Lost,
    /// A peer is already past our term.
    Superseded(i32),
}

impl ElectionRound {
    pub fn new(term: i32, self_id: &str, peers: usize) -> Self {
        let mut granted_by = HashSet::new();
        granted_by.insert(self_id.to_string());
        Self {
            term,
            granted_by,
            denied: 0,
            dead: 0,
            pending: peers,
            highest_term: term,
        }
    }

    pub fn record_reply(&mut self, peer: &str, reply: VoteReply) {
        self.pending = self.pending.saturating_sub(1);
        if reply.granted {
            self.granted_by.insert(peer.to_string());
        } else {
            self.denied += 1;
            self.highest_term = self.highest_term.max(reply.term);
        }
    }

    pub fn record_dead(&mut self) {
        self.pending = self.pending.saturating_sub(1);
        self.dead += 1;
    }

    pub fn peer_responses(&self) -> usize {
        self.granted_by.len() - 1 + self.denied
    }

    /// Strict majority of responders, or no responder at all.
    pub fn has_quorum(&self) -> bool {
        if self.peer_responses() == 0 {
            return true;
        }
        let grants = self.granted_by.len();
        let responded = grants + self.denied;
        grants * 100 / responded > 50
    }

    pub fn outcome(&self) -> RoundOutcome {
        if self.highest_term > self.term {
            RoundOutcome::Superseded(self.highest_term)
        } else if self.has_quorum() {
            RoundOutcome::Won
        } else {
            RoundOutcome::Lost
        }
    }
}

impl ClusterNode {
    pub(crate) async fn run_election(self, generation: u64, mut stop: oneshot::Receiver<()>) {
        metrics::record_election();

        let (request, peers) = {
            let state = self.shared.state.lock().await;
            let local = state.view.local().clone();
            let request = VoteRequest {
                term: state.persistent.current_term,
                candidate_id: self.shared.id.clone(),
                candidate_url: local.rpc_endpoint(),
                last_leader_id: state.persistent.leader_id.clone(),
                last_term: state.persistent.current_term,
                last_version: state.persistent.version,
                timestamp: state.persistent.voted_for.timestamp,
                candidate: Some(local),
            };
            (request, state.view.peers())
        };

        info!(
            "Node {} requesting votes for term {} from {} peers",
            self.shared.id,
            request.term,
            peers.len()
        );

        let mut round = ElectionRound::new(request.term, &self.shared.id, peers.len());
        let (tx, mut rx) = mpsc::channel(peers.len().max(1));
        for peer in peers {
            let node = self.clone();
            let tx = tx.clone();
            let request = request.clone();
            self.shared.pools.vote.spawn(async move {
                let outcome = node
                    .with_deadline(node.shared.transport.request_vote(&peer, request))
                    .await;
                let _ = tx.send((peer.id, outcome)).await;
            });
        }
        drop(tx);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("Election round for term {} aborted", request.term);
                    return;
                }
                next = rx.recv() => match next {
                    Some((peer, Ok(reply))) => round.record_reply(&peer, reply),
                    Some((peer, Err(e))) => {
                        debug!("Vote request to {peer} failed: {e}");
                        round.record_dead();
                    }
                    None => break,
                },
            }
        }

        match round.outcome() {
            RoundOutcome::Won => {
                if round.peer_responses() == 0 && round.dead > 0 {
                    warn!(
                        "Node {} promoting itself at term {}: all {} peers unreachable",
                        self.shared.id, round.term, round.dead
                    );
                } else {
                    info!(
                        "Node {} won term {} with {}/{} votes ({} unreachable)",
                        self.shared.id,
                        round.term,
                        round.granted_by.len(),
                        round.granted_by.len() + round.denied,
                        round.dead
                    );
                }
                self.request_role(NodeRole::Leader, generation);
            }
            RoundOutcome::Lost => {
                info!(
                    "Node {} lost term {} with {}/{} votes",
                    self.shared.id,
                    round.term,
                    round.granted_by.len(),
                    round.granted_by.len() + round.denied
                );
                self.request_role(NodeRole::Follower, generation);
            }
            RoundOutcome::Superseded(term) => {
                info!(
                    "Node {} abandoning term {}: peer reported term {term}",
                    self.shared.id, round.term
                );
                self.shared.state.lock().await.persistent.adopt_term(term);
                self.request_role(NodeRole::Follower, generation);
            }
        }
    }

    pub async fn handle_request_vote(&self, request: VoteRequest) -> VoteReply {
        let (grant, role, grew) = {
            let mut state = self.shared.state.lock().await;
            let grew = match &request.candidate {
                Some(candidate) if state.view.learn(candidate) => Some(state.view.len()),
                _ => None,
            };
            let grant = should_grant(
                &request,
                state.persistent.current_term,
                &state.persistent.voted_for,
            );
            if !grant {
                debug!(
                    "Node {} denies vote to {} for term {} (term {}, voted {:?})",
                    self.shared.id,
                    request.candidate_id,
                    request.term,
                    state.persistent.current_term,
                    state.persistent.voted_for
                );
            }
            (grant, state.role, grew)
        };
        if let Some(size) = grew {
            self.on_membership_grew(size);
        }

        if !grant {
            return VoteReply {
                granted: false,
                term: self.shared.state.lock().await.persistent.current_term,
            };
        }

        // A granting leader or candidate concedes before recording the vote.
        if role != NodeRole::Follower {
            self.transition(NodeRole::Follower).await;
        }

        let mut state = self.shared.state.lock().await;
        if !should_grant(
            &request,
            state.persistent.current_term,
            &state.persistent.voted_for,
        ) {
            return VoteReply {
                granted: false,
                term: state.persistent.current_term,
            };
        }
        state.persistent.adopt_term(request.term);
        state.persistent.voted_for = VotedFor {
            id: request.candidate_id.clone(),
            term: request.term,
            timestamp: request.timestamp,
        };
        ClusterNode::touch(&mut state);
        info!(
            "Node {} granted vote to {} for term {}",
            self.shared.id, request.candidate_id, request.term
        );

        VoteReply {
            granted: true,
            term: state.persistent.current_term,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(term: i32, timestamp: i64) -> VoteRequest {
        VoteRequest {
            term,
            candidate_id: "b".into(),
            candidate_url: "127.0.0.1:9090".into(),
            last_leader_id: String::new(),
            last_term: 0,
            last_version: 0,
            timestamp,
            candidate: None,
        }
    }

    fn voted(id: &str, term: i32, timestamp: i64) -> VotedFor {
        VotedFor {
            id: id.into(),
            term,
            timestamp,
        }
    }

    #[test]
    fn lower_term_is_denied() {
        assert!(!should_grant(&request(1, 5), 2, &VotedFor::default()));
    }

    #[test]
    fn earlier_timestamp_wins_equal_term() {
        assert!(should_grant(&request(3, 10), 3, &voted("c", 3, 20)));
        assert!(!should_grant(&request(3, 30), 3, &voted("c", 3, 20)));
    }

    #[test]
    fn higher_term_than_recorded_vote_is_granted() {
        assert!(should_grant(&request(4, 99), 3, &voted("c", 3, 1)));
    }

    #[test]
    fn equal_term_without_vote_is_granted() {
        assert!(should_grant(&request(2, 50), 2, &voted("", 2, 100)));
    }

    #[test]
    fn second_candidate_same_term_is_denied() {
        let first = voted("b", 5, 100);
        let mut later = request(5, 200);
        later.candidate_id = "c".into();
        assert!(!should_grant(&later, 5, &first));
    }

    #[test]
    fn all_peers_dead_wins() {
        let mut round = ElectionRound::new(1, "a", 2);
        round.record_dead();
        round.record_dead();
        assert_eq!(round.pending, 0);
        assert_eq!(round.outcome(), RoundOutcome::Won);
    }

    #[test]
    fn no_peers_wins() {
        let round = ElectionRound::new(1, "a", 0);
        assert!(round.has_quorum());
    }

    #[test]
    fn quorum_needs_strict_majority_of_responders() {
        // 2 of 4 responders (self included) is exactly half: not enough.
        let mut round = ElectionRound::new(1, "a", 4);
        round.record_reply("b", VoteReply { granted: true, term: 1 });
        round.record_reply("c", VoteReply { granted: false, term: 1 });
        round.record_reply("d", VoteReply { granted: false, term: 1 });
        round.record_dead();
        assert_eq!(round.outcome(), RoundOutcome::Lost);

        let mut round = ElectionRound::new(1, "a", 2);
        round.record_reply("b", VoteReply { granted: true, term: 1 });
        round.record_reply("c", VoteReply { granted: false, term: 1 });
        assert_eq!(round.outcome(), RoundOutcome::Won);
    }

    #[test]
    fn dead_peers_do_not_count_against_quorum() {
        let mut round = ElectionRound::new(2, "a", 5);
        round.record_reply("b", VoteReply { granted: false, term: 2 });
        round.record_dead();
        round.record_dead();
        round.record_dead();
        // 1 grant (self) of 2 responders is not a strict majority.
        assert_eq!(round.outcome(), RoundOutcome::Lost);

        round.record_reply("c", VoteReply { granted: true, term: 2 });
        assert_eq!(round.outcome(), RoundOutcome::Won);
    }

    #[test]
    fn higher_term_denial_supersedes() {
        let mut round = ElectionRound::new(2, "a", 2);
        round.record_reply("b", VoteReply { granted: true, term: 2 });
        round.record_reply("c", VoteReply { granted: false, term: 7 });
        assert_eq!(round.outcome(), RoundOutcome::Superseded(7));
    }
}
