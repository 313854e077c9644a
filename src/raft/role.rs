use tokio::sync::oneshot;
use tokio::task::JoinHandle;
// Use external log crate
use ::log::{debug, error, info};

use super::node::{ClusterNode, ClusterState};
use super::state::{now_nanos, NodeRole};

/// Background work owned by the active role: the watchdog for a follower,
/// the election round for a candidate, the heartbeat ticker for a leader.
pub(crate) struct RoleDriver {
    role: NodeRole,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RoleDriver {
    /// Signal the driver to stop and wait until it has exited.
    pub(crate) async fn release(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                error!("{} driver terminated abnormally: {e}", self.role);
            }
        }
    }
}

impl ClusterNode {
    /// Move to `target`.
    ///
    /// The old role's driver is stopped and awaited before the new role's entry
    /// actions run. With `expected` set, the switch only happens if no other
    /// transition took place since that generation; drivers use this so a
    /// result computed under an old role is discarded. Without it, switching
    /// to the role the node already holds is a no-op.
    pub(crate) async fn switch_role(&self, target: NodeRole, expected: Option<u64>) -> bool {
        let mut driver = self.shared.driver.lock().await;

        {
            let state = self.shared.state.lock().await;
            match expected {
                Some(generation) if generation != state.generation => {
                    debug!(
                        "Dropping stale transition to {target} (generation {generation}, now {})",
                        state.generation
                    );
                    return false;
                }
                None if driver.is_some() && state.role == target => return true,
                _ => {}
            }
        }

        if let Some(old) = driver.take() {
            old.release().await;
        }

        let (from, term, generation) = {
            let mut state = self.shared.state.lock().await;
            let from = state.role;
            state.generation += 1;
            state.role = target;
            self.on_enter(&mut state, target);
            (from, state.persistent.current_term, state.generation)
        };
        info!(
            "Node {} transitioned {from} -> {target} at term {term}",
            self.shared.id
        );

        *driver = Some(self.spawn_driver(target, generation));
        true
    }

    /// Ask for a transition from inside a driver. The switch runs on its own
    /// task because it has to wait for the requesting driver to exit.
    pub(crate) fn request_role(&self, target: NodeRole, generation: u64) {
        let node = self.clone();
        tokio::spawn(async move {
            node.switch_role(target, Some(generation)).await;
        });
    }

    /// Transition on behalf of an inbound RPC. The switch runs detached so a
    /// caller dropping the handler future cannot leave the node without a
    /// driver.
    pub(crate) async fn transition(&self, target: NodeRole) {
        let node = self.clone();
        if let Err(e) = tokio::spawn(async move { node.switch_role(target, None).await }).await {
            error!("Transition to {target} failed: {e}");
        }
    }

    fn on_enter(&self, state: &mut ClusterState, target: NodeRole) {
        let self_id = self.shared.id.clone();
        state.view.set_status(&self_id, target);
        match target {
            NodeRole::Follower => {
                state.persistent.voted_for.clear();
                state.election_deadline = self.shared.config.randomized_election_timeout();
                ClusterNode::touch(state);
            }
            NodeRole::Candidate => {
                state.persistent.current_term += 1;
                state.persistent.voted_for.id = self_id;
                state.persistent.voted_for.term = state.persistent.current_term;
                state.persistent.voted_for.timestamp = now_nanos();
            }
            NodeRole::Leader => {
                state.persistent.version = 0;
                state.persistent.leader_id = self_id;
                state.persistent.voted_for.clear();
            }
        }
    }

    fn spawn_driver(&self, role: NodeRole, generation: u64) -> RoleDriver {
        let (stop, stop_rx) = oneshot::channel();
        let node = self.clone();
        let handle = match role {
            NodeRole::Follower => tokio::spawn(node.run_watchdog(generation, stop_rx)),
            NodeRole::Candidate => tokio::spawn(node.run_election(generation, stop_rx)),
            NodeRole::Leader => tokio::spawn(node.run_heartbeats(generation, stop_rx)),
        };
        RoleDriver { role, stop, handle }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::raft::local::LocalNetwork;
    use crate::raft::state::Node;
    use crate::raft::RaftConfig;

    fn lone_node(id: &str) -> ClusterNode {
        let mut cfg = RaftConfig::new(Node::new(id, "127.0.0.1", "9090", "8080"));
        cfg.election_timeout = 60_000;
        ClusterNode::new(cfg, Arc::new(LocalNetwork::new().transport()))
    }

    #[tokio::test]
    async fn candidate_entry_bumps_term_and_votes_for_self() {
        let node = lone_node("a");
        node.switch_role(NodeRole::Follower, None).await;
        {
            let mut state = node.shared.state.lock().await;
            node.on_enter(&mut state, NodeRole::Candidate);
            assert_eq!(state.persistent.current_term, 1);
            assert_eq!(state.persistent.voted_for.id, "a");
            assert_eq!(state.persistent.voted_for.term, 1);
            assert!(state.persistent.voted_for.timestamp > 0);
        }
        node.shutdown().await;
    }

    #[tokio::test]
    async fn leader_entry_resets_version_and_claims_leadership() {
        let node = lone_node("a");
        {
            let mut state = node.shared.state.lock().await;
            state.persistent.version = 9;
            state.persistent.voted_for.id = "b".into();
            state.persistent.voted_for.term = 4;
            node.on_enter(&mut state, NodeRole::Leader);
            assert_eq!(state.persistent.version, 0);
            assert_eq!(state.persistent.leader_id, "a");
            assert!(state.persistent.voted_for.id.is_empty());
            assert_eq!(state.persistent.voted_for.term, 0);
        }
    }

    #[tokio::test]
    async fn stale_generation_is_rejected() {
        let node = lone_node("a");
        node.switch_role(NodeRole::Follower, None).await;
        let generation = node.shared.state.lock().await.generation;

        assert!(node.switch_role(NodeRole::Follower, Some(generation)).await);
        assert!(!node.switch_role(NodeRole::Leader, Some(generation)).await);
        assert_eq!(node.current_role().await, NodeRole::Follower);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn follower_entry_clears_vote_and_self_status_follows_role() {
        let node = lone_node("a");
        {
            let mut state = node.shared.state.lock().await;
            state.persistent.voted_for.id = "b".into();
            state.persistent.voted_for.term = 2;
        }
        node.switch_role(NodeRole::Follower, None).await;
        let state = node.shared.state.lock().await;
        assert!(state.persistent.voted_for.id.is_empty());
        assert_eq!(state.view.local().status, NodeRole::Follower);
        drop(state);
        node.shutdown().await;
    }
}
