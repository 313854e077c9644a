use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
// Use external log crate
use ::log::{debug, error, info, warn};

use super::message::{Heartbeat, HeartbeatReply};
use super::node::ClusterNode;
use super::state::{Node, NodeRole};
use super::ConfigSnapshot;
use crate::network::metrics;

/// Peers with a heartbeat still outstanding; they are skipped until it settles.
type InFlight = Arc<StdMutex<HashSet<String>>>;

impl ClusterNode {
    pub(crate) async fn run_heartbeats(self, generation: u64, mut stop: oneshot::Receiver<()>) {
        self.assert_leadership(generation);

        let in_flight: InFlight = Arc::new(StdMutex::new(HashSet::new()));
        let mut ticker = interval(self.shared.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => self.broadcast_heartbeat(generation, &in_flight).await,
            }
        }
        debug!("Heartbeat ticker for node {} stopped", self.shared.id);
    }

    async fn broadcast_heartbeat(&self, generation: u64, in_flight: &InFlight) {
        let (heartbeat, peers) = {
            let state = self.shared.state.lock().await;
            if state.generation != generation || state.role != NodeRole::Leader {
                return;
            }
            let config = match state.snapshot.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to encode config snapshot: {e}");
                    return;
                }
            };
            let heartbeat = Heartbeat {
                term: state.persistent.current_term,
                leader_id: self.shared.id.clone(),
                version: state.persistent.version,
                config,
            };
            (heartbeat, state.view.peers())
        };

        let mut sent = 0;
        for peer in peers {
            let claimed = in_flight
                .lock()
                .map(|mut set| set.insert(peer.id.clone()))
                .unwrap_or(false);
            if !claimed {
                continue;
            }
            sent += 1;
            let node = self.clone();
            let heartbeat = heartbeat.clone();
            let in_flight = Arc::clone(in_flight);
            self.shared.pools.heartbeat.spawn(async move {
                let peer_id = peer.id.clone();
                node.send_heartbeat(peer, heartbeat, generation).await;
                if let Ok(mut set) = in_flight.lock() {
                    set.remove(&peer_id);
                }
            });
        }
        metrics::record_heartbeats(sent);
    }

    async fn send_heartbeat(&self, peer: Node, heartbeat: Heartbeat, generation: u64) {
        let term = heartbeat.term;
        let result = self
            .with_deadline(self.shared.transport.heartbeat(&peer, heartbeat))
            .await;

        let mut state = self.shared.state.lock().await;
        match result {
            Ok(reply) => {
                state.view.record_reachable(&peer.id);
                if reply.success || reply.term <= term {
                    return;
                }
                if state.generation != generation || state.role != NodeRole::Leader {
                    return;
                }
                state.persistent.adopt_term(reply.term);
                info!(
                    "Leader {} saw term {} from {}, stepping down",
                    self.shared.id, reply.term, peer.id
                );
                drop(state);
                self.request_role(NodeRole::Candidate, generation);
            }
            Err(e) => {
                if state.view.record_unreachable(&peer.id) {
                    warn!("Peer {} unreachable, marking dead: {e}", peer.id);
                } else {
                    debug!("Heartbeat to {} failed: {e}", peer.id);
                }
            }
        }
    }

    pub async fn handle_heartbeat(&self, heartbeat: Heartbeat) -> HeartbeatReply {
        let (role, current, decoded) = {
            let state = self.shared.state.lock().await;
            let current = state.persistent.current_term;
            if heartbeat.term < current {
                debug!(
                    "Rejecting heartbeat from {} at stale term {} (ours {current})",
                    heartbeat.leader_id, heartbeat.term
                );
                return HeartbeatReply {
                    success: false,
                    term: current,
                };
            }

            let decoded = if state.persistent.matches_heartbeat(
                heartbeat.term,
                &heartbeat.leader_id,
                heartbeat.version,
            ) {
                None
            } else {
                match ConfigSnapshot::from_bytes(&heartbeat.config) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        warn!(
                            "Rejecting heartbeat from {}: malformed config: {e}",
                            heartbeat.leader_id
                        );
                        return HeartbeatReply {
                            success: false,
                            term: current,
                        };
                    }
                }
            };
            (state.role, current, decoded)
        };

        if heartbeat.term == current {
            match role {
                NodeRole::Leader => {
                    warn!(
                        "Node {} and {} both lead term {current}, re-running election",
                        self.shared.id, heartbeat.leader_id
                    );
                    self.transition(NodeRole::Candidate).await;
                    return HeartbeatReply {
                        success: false,
                        term: current,
                    };
                }
                NodeRole::Candidate => {
                    self.transition(NodeRole::Follower).await;
                }
                NodeRole::Follower => {}
            }
        } else if role != NodeRole::Follower {
            self.transition(NodeRole::Follower).await;
        }

        self.apply_config_sync(&heartbeat, decoded).await
    }

    /// Adopt the leader's snapshot when `(term, leader, version)` moved on;
    /// otherwise the heartbeat only refreshes the watchdog.
    async fn apply_config_sync(
        &self,
        heartbeat: &Heartbeat,
        decoded: Option<ConfigSnapshot>,
    ) -> HeartbeatReply {
        let mut state = self.shared.state.lock().await;
        if let Some(snapshot) = decoded {
            state.snapshot = snapshot;
            state.persistent.adopt_term(heartbeat.term);
            state.persistent.leader_id = heartbeat.leader_id.clone();
            state.persistent.version = heartbeat.version;
            info!(
                "Node {} adopted config version {} from leader {} at term {}",
                self.shared.id, heartbeat.version, heartbeat.leader_id, heartbeat.term
            );
        }
        state.view.mark_leader(&heartbeat.leader_id);
        ClusterNode::touch(&mut state);

        HeartbeatReply {
            success: true,
            term: state.persistent.current_term,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;
    use crate::raft::local::LocalNetwork;
    use crate::raft::RaftConfig;

    fn follower(id: &str) -> ClusterNode {
        let mut cfg = RaftConfig::new(Node::new(id, "127.0.0.1", "9090", "8080"));
        cfg.election_timeout = 60_000;
        ClusterNode::new(cfg, Arc::new(LocalNetwork::new().transport()))
    }

    fn heartbeat(term: i32, version: i32, snapshot: &ConfigSnapshot) -> Heartbeat {
        Heartbeat {
            term,
            leader_id: "leader".into(),
            version,
            config: snapshot.to_bytes().expect("encode"),
        }
    }

    fn snapshot_with(key: &str) -> ConfigSnapshot {
        let mut snap = ConfigSnapshot::default();
        snap.put(key, json!(true));
        snap
    }

    #[tokio::test]
    async fn stale_heartbeat_is_rejected_without_change() {
        let node = follower("a");
        node.shared.state.lock().await.persistent.current_term = 5;

        let reply = node
            .handle_heartbeat(heartbeat(4, 1, &snapshot_with("x")))
            .await;
        assert_eq!(reply, HeartbeatReply { success: false, term: 5 });
        assert!(node.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn newer_heartbeat_replaces_snapshot() {
        let node = follower("a");
        node.start().await;

        let snap = snapshot_with("channel/mychannel");
        let reply = node.handle_heartbeat(heartbeat(1, 0, &snap)).await;
        assert_eq!(reply, HeartbeatReply { success: true, term: 1 });

        let st = node.persistent_state().await;
        assert_eq!(st.current_term, 1);
        assert_eq!(st.leader_id, "leader");
        assert_eq!(node.snapshot().await, snap);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_heartbeat_only_refreshes_timer() {
        let node = follower("a");
        node.start().await;

        node.handle_heartbeat(heartbeat(1, 3, &snapshot_with("first")))
            .await;
        // Same (term, leader, version) with a different payload: the payload
        // must not be applied a second time.
        let before = node.shared.state.lock().await.last_heartbeat;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let reply = node
            .handle_heartbeat(heartbeat(1, 3, &snapshot_with("second")))
            .await;

        assert!(reply.success);
        assert!(node.snapshot().await.get("first").is_some());
        assert!(node.snapshot().await.get("second").is_none());
        assert!(node.shared.state.lock().await.last_heartbeat > before);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn version_bump_is_adopted() {
        let node = follower("a");
        node.start().await;

        node.handle_heartbeat(heartbeat(1, 0, &ConfigSnapshot::default()))
            .await;
        node.handle_heartbeat(heartbeat(1, 1, &snapshot_with("org/org2")))
            .await;

        assert_eq!(node.persistent_state().await.version, 1);
        assert!(node.snapshot().await.get("org/org2").is_some());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn first_heartbeat_after_follow_me_installs_leader_snapshot() {
        let node = follower("a");
        node.start().await;

        // FollowMe names the leader but carries no config.
        let leader = Node::new("leader", "127.0.0.1", "9091", "8081");
        node.handle_follow_me(leader, 1).await;

        let snap = snapshot_with("org/org1");
        let reply = node.handle_heartbeat(heartbeat(1, 0, &snap)).await;

        assert_eq!(reply, HeartbeatReply { success: true, term: 1 });
        assert_eq!(node.snapshot().await, snap);
        assert_eq!(node.persistent_state().await.version, 0);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_config_is_rejected_and_previous_snapshot_kept() {
        let node = follower("a");
        node.start().await;
        node.handle_heartbeat(heartbeat(1, 0, &snapshot_with("keep")))
            .await;

        let bad = Heartbeat {
            term: 1,
            leader_id: "leader".into(),
            version: 1,
            config: b"{oops".to_vec(),
        };
        let reply = node.handle_heartbeat(bad).await;

        assert_eq!(reply, HeartbeatReply { success: false, term: 1 });
        assert_eq!(node.persistent_state().await.version, 0);
        assert!(node.snapshot().await.get("keep").is_some());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn leader_at_equal_term_backs_off_to_candidate() {
        let node = follower("a");
        node.switch_role(NodeRole::Leader, None).await;
        let term = node.persistent_state().await.current_term;

        let reply = node
            .handle_heartbeat(heartbeat(term, 0, &ConfigSnapshot::default()))
            .await;
        assert!(!reply.success);

        // The candidate round finds no peers and may already have promoted
        // the node again, but only after moving to a higher term.
        assert!(node.persistent_state().await.current_term > term);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn candidate_at_equal_term_steps_down_and_syncs() {
        let mut cfg = RaftConfig::new(Node::new("a", "127.0.0.1", "9090", "8080"));
        cfg.add_peer(Node::new("b", "127.0.0.2", "9090", "8080"));
        cfg.election_timeout = 60_000;
        // Long RPC deadline keeps the round pending against the silent peer.
        cfg.rpc_timeout = 60_000;
        let network = LocalNetwork::new();
        network.register_silent("b");
        let node = ClusterNode::new(cfg, Arc::new(network.transport()));

        node.switch_role(NodeRole::Candidate, None).await;
        assert_eq!(node.current_role().await, NodeRole::Candidate);
        let term = node.persistent_state().await.current_term;

        let reply = node
            .handle_heartbeat(heartbeat(term, 2, &snapshot_with("x")))
            .await;
        assert!(reply.success);
        assert_eq!(node.current_role().await, NodeRole::Follower);
        assert_eq!(node.persistent_state().await.leader_id, "leader");

        let deadline = Instant::now() + Duration::from_millis(100);
        while Instant::now() < deadline {
            assert_eq!(node.current_role().await, NodeRole::Follower);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        node.shutdown().await;
    }
}
