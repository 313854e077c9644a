// Use external log crate
use ::log::{debug, info, warn};

use super::message::{FollowMeReply, LeaderMeReply, Membership};
use super::node::ClusterNode;
use super::state::{Node, NodeRole};

impl ClusterNode {
    /// Inbound FollowMe from a node that just took leadership.
    pub async fn handle_follow_me(&self, leader: Node, term: i32) -> FollowMeReply {
        let (role, current, grew) = {
            let mut state = self.shared.state.lock().await;
            let grew = state.view.learn(&leader).then(|| state.view.len());
            (state.role, state.persistent.current_term, grew)
        };
        if let Some(size) = grew {
            self.on_membership_grew(size);
        }

        if term < current {
            debug!(
                "Node {} refusing FollowMe from {} at stale term {term} (ours {current})",
                self.shared.id, leader.id
            );
            return FollowMeReply::Term(current);
        }
        if role == NodeRole::Leader && term == current {
            warn!(
                "Node {} and {} both lead term {term}, re-running election",
                self.shared.id, leader.id
            );
            self.transition(NodeRole::Candidate).await;
            return FollowMeReply::Term(current);
        }
        if role != NodeRole::Follower {
            self.transition(NodeRole::Follower).await;
        }

        let mut state = self.shared.state.lock().await;
        state.persistent.follow_leader(&leader.id, term);
        state.view.mark_leader(&leader.id);
        ClusterNode::touch(&mut state);
        info!(
            "Node {} following {} at term {}",
            self.shared.id, leader.id, state.persistent.current_term
        );
        FollowMeReply::Ok
    }

    /// Inbound LeaderMe: a node announcing itself and asking who leads.
    pub async fn handle_leader_me(&self, node: Node) -> LeaderMeReply {
        let (reply, grew, role) = {
            let mut state = self.shared.state.lock().await;
            let grew = state.view.learn(&node).then(|| state.view.len());
            let term = state.persistent.current_term;
            let reply = match state.role {
                NodeRole::Leader => LeaderMeReply::FollowMe {
                    leader: state.view.local().clone(),
                    term,
                },
                NodeRole::Candidate => LeaderMeReply::VoteMe { term },
                NodeRole::Follower => match state.view.get(&state.persistent.leader_id) {
                    Some(leader) => LeaderMeReply::LeaderNode {
                        leader: leader.clone(),
                        term,
                    },
                    None => LeaderMeReply::Ok,
                },
            };
            (reply, grew, state.role)
        };

        if let Some(size) = grew {
            self.on_membership_grew(size);
            if role == NodeRole::Leader {
                let leader = self.clone();
                tokio::spawn(async move { leader.broadcast_sync_node().await });
            }
        }
        reply
    }

    /// Inbound SyncNode: merge the remote view and answer with ours.
    pub async fn handle_sync_node(&self, nodes: Membership) -> Membership {
        let (merged, grew) = {
            let mut state = self.shared.state.lock().await;
            let grew = state.view.merge(&nodes).then(|| state.view.len());
            (state.view.nodes().clone(), grew)
        };
        if let Some(size) = grew {
            self.on_membership_grew(size);
        }
        merged
    }

    /// Probe the seed peers once at startup and record any leader they know.
    pub(crate) async fn announce(&self) {
        let local = self.shared.state.lock().await.view.local().clone();
        let calls: Vec<_> = self
            .shared
            .config
            .peers
            .iter()
            .cloned()
            .map(|peer| {
                let node = self.clone();
                let local = local.clone();
                self.shared.pools.sync.spawn(async move {
                    let reply = node
                        .with_deadline(node.shared.transport.leader_me(&peer, local))
                        .await;
                    (peer.id, reply)
                })
            })
            .collect();

        for call in calls {
            match call.await {
                Ok(Some((_, Ok(LeaderMeReply::FollowMe { leader, term }))))
                | Ok(Some((_, Ok(LeaderMeReply::LeaderNode { leader, term })))) => {
                    self.record_announced_leader(leader, term).await
                }
                Ok(Some((peer, Ok(other)))) => debug!("LeaderMe to {peer}: {other:?}"),
                Ok(Some((peer, Err(e)))) => debug!("LeaderMe to {peer} failed: {e}"),
                Ok(None) | Err(_) => {}
            }
        }
    }

    async fn record_announced_leader(&self, leader: Node, term: i32) {
        let grew = {
            let mut state = self.shared.state.lock().await;
            if state.role != NodeRole::Follower || term < state.persistent.current_term {
                return;
            }
            let grew = state.view.learn(&leader).then(|| state.view.len());
            state.persistent.follow_leader(&leader.id, term);
            state.view.mark_leader(&leader.id);
            ClusterNode::touch(&mut state);
            info!(
                "Node {} discovered leader {} at term {term}",
                self.shared.id, leader.id
            );
            grew
        };
        if let Some(size) = grew {
            self.on_membership_grew(size);
        }
    }

    /// Leader only: tell the new leadership to every known node.
    pub(crate) fn assert_leadership(&self, generation: u64) {
        let node = self.clone();
        tokio::spawn(async move {
            let (local, term, peers) = {
                let state = node.shared.state.lock().await;
                if state.generation != generation {
                    return;
                }
                (
                    state.view.local().clone(),
                    state.persistent.current_term,
                    state.view.peers(),
                )
            };

            let calls: Vec<_> = peers
                .into_iter()
                .map(|peer| {
                    let sender = node.clone();
                    let local = local.clone();
                    node.shared.pools.sync.spawn(async move {
                        let reply = sender
                            .with_deadline(sender.shared.transport.follow_me(&peer, local, term))
                            .await;
                        (peer.id, reply)
                    })
                })
                .collect();

            let mut highest = term;
            for call in calls {
                match call.await {
                    Ok(Some((_, Ok(FollowMeReply::Term(t))))) => highest = highest.max(t),
                    Ok(Some((_, Ok(FollowMeReply::Ok)))) => {}
                    Ok(Some((peer, Err(e)))) => node.warn_rpc("FollowMe", &peer, &e),
                    Ok(None) | Err(_) => {}
                }
            }

            if highest > term {
                let mut state = node.shared.state.lock().await;
                if state.generation != generation {
                    return;
                }
                state.persistent.adopt_term(highest);
                info!(
                    "Leader {} superseded by term {highest}, stepping down",
                    node.shared.id
                );
                drop(state);
                node.request_role(NodeRole::Follower, generation);
                return;
            }

            node.broadcast_sync_node().await;
        });
    }

    /// Leader only: push the full membership to every peer and merge replies.
    pub(crate) async fn broadcast_sync_node(&self) {
        let (nodes, peers) = {
            let state = self.shared.state.lock().await;
            if state.role != NodeRole::Leader {
                return;
            }
            (state.view.nodes().clone(), state.view.peers())
        };

        let calls: Vec<_> = peers
            .into_iter()
            .map(|peer| {
                let node = self.clone();
                let nodes = nodes.clone();
                self.shared.pools.sync.spawn(async move {
                    let reply = node
                        .with_deadline(node.shared.transport.sync_node(&peer, nodes))
                        .await;
                    (peer.id, reply)
                })
            })
            .collect();

        for call in calls {
            match call.await {
                Ok(Some((_, Ok(remote)))) => {
                    let grew = {
                        let mut state = self.shared.state.lock().await;
                        state.view.merge(&remote).then(|| state.view.len())
                    };
                    if let Some(size) = grew {
                        self.on_membership_grew(size);
                    }
                }
                Ok(Some((peer, Err(e)))) => debug!("SyncNode to {peer} failed: {e}"),
                Ok(None) | Err(_) => {}
            }
        }
    }
}
