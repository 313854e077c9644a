use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
// Use external log crate
use ::log::{info, warn};

use super::pool::FanoutPools;
use super::role::RoleDriver;
use super::state::{ClusterView, Node, NodeRole, PersistentState};
use super::{ConfigSnapshot, PeerTransport, RaftConfig, RaftError};

pub struct ClusterState {
    pub role: NodeRole,
    pub persistent: PersistentState,
    pub view: ClusterView,
    pub snapshot: ConfigSnapshot,
    pub(crate) last_heartbeat: Instant,
    pub(crate) election_deadline: Duration,
    // Bumped on every role transition; stale drivers compare against it.
    pub(crate) generation: u64,
}

pub(crate) struct Shared {
    pub(crate) id: String,
    pub(crate) config: RaftConfig,
    pub(crate) state: Mutex<ClusterState>,
    // Active role driver. Holding this lock serializes transitions.
    pub(crate) driver: Mutex<Option<RoleDriver>>,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) pools: FanoutPools,
}

// Cheap to clone; every clone drives the same node.
#[derive(Clone)]
pub struct ClusterNode {
    pub(crate) shared: Arc<Shared>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusReport {
    pub id: String,
    pub role: NodeRole,
    pub term: i32,
    pub leader_id: String,
    pub version: i32,
    pub cluster_size: usize,
    pub standalone: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberReport {
    #[serde(flatten)]
    pub node: Node,
    pub dead: bool,
    pub consecutive_failures: u32,
}

impl ClusterNode {
    pub fn new(config: RaftConfig, transport: Arc<dyn PeerTransport>) -> Self {
        let mut view = ClusterView::new(config.local.clone());
        for peer in &config.peers {
            view.learn(peer);
        }
        let pools = FanoutPools::new(view.len());
        let state = ClusterState {
            role: NodeRole::Follower,
            persistent: PersistentState::default(),
            view,
            snapshot: ConfigSnapshot::default(),
            last_heartbeat: Instant::now(),
            election_deadline: config.randomized_election_timeout(),
            generation: 0,
        };

        Self {
            shared: Arc::new(Shared {
                id: config.local.id.clone(),
                config,
                state: Mutex::new(state),
                driver: Mutex::new(None),
                transport,
                pools,
            }),
        }
    }

    pub async fn with_seed(self, snapshot: ConfigSnapshot) -> Self {
        self.shared.state.lock().await.snapshot = snapshot;
        self
    }

    /// Enter the initial role and start its driver. Clustered nodes also probe
    /// their seed peers for an existing leader.
    pub async fn start(&self) {
        if self.shared.config.standalone {
            info!("Node {} starting in standalone mode", self.shared.id);
            self.switch_role(NodeRole::Leader, None).await;
            return;
        }

        info!(
            "Node {} starting as follower with {} seed peers",
            self.shared.id,
            self.shared.config.peers.len()
        );
        self.switch_role(NodeRole::Follower, None).await;

        let node = self.clone();
        tokio::spawn(async move { node.announce().await });
    }

    pub async fn shutdown(&self) {
        let mut driver = self.shared.driver.lock().await;
        if let Some(old) = driver.take() {
            old.release().await;
        }
        info!("Node {} stopped", self.shared.id);
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn config(&self) -> &RaftConfig {
        &self.shared.config
    }

    pub fn is_standalone(&self) -> bool {
        self.shared.config.standalone
    }

    pub async fn current_role(&self) -> NodeRole {
        self.shared.state.lock().await.role
    }

    pub async fn is_leader(&self) -> bool {
        self.current_role().await == NodeRole::Leader
    }

    pub async fn persistent_state(&self) -> PersistentState {
        self.shared.state.lock().await.persistent.clone()
    }

    pub async fn leader_node(&self) -> Option<Node> {
        let state = self.shared.state.lock().await;
        if state.role == NodeRole::Leader {
            return Some(state.view.local().clone());
        }
        let leader_id = &state.persistent.leader_id;
        if leader_id.is_empty() {
            return None;
        }
        state.view.get(leader_id).cloned()
    }

    pub async fn leader_external_endpoint(&self) -> Option<String> {
        self.leader_node().await.map(|n| n.http_endpoint())
    }

    pub async fn snapshot(&self) -> ConfigSnapshot {
        self.shared.state.lock().await.snapshot.clone()
    }

    pub async fn update_config<R>(&self, apply: impl FnOnce(&mut ConfigSnapshot) -> R) -> R {
        let mut state = self.shared.state.lock().await;
        apply(&mut state.snapshot)
    }

    pub async fn status(&self) -> NodeStatusReport {
        let state = self.shared.state.lock().await;
        NodeStatusReport {
            id: self.shared.id.clone(),
            role: state.role,
            term: state.persistent.current_term,
            leader_id: state.persistent.leader_id.clone(),
            version: state.persistent.version,
            cluster_size: state.view.len(),
            standalone: self.shared.config.standalone,
        }
    }

    pub async fn members(&self) -> Vec<MemberReport> {
        let state = self.shared.state.lock().await;
        let mut members: Vec<MemberReport> = state
            .view
            .nodes()
            .values()
            .map(|node| {
                let health = state.view.health(&node.id);
                MemberReport {
                    node: node.clone(),
                    dead: health.is_dead(),
                    consecutive_failures: health.consecutive_failures,
                }
            })
            .collect();
        members.sort_by(|a, b| a.node.id.cmp(&b.node.id));
        members
    }

    pub(crate) async fn with_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, RaftError>>,
    ) -> Result<T, RaftError> {
        match tokio::time::timeout(self.shared.config.rpc_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(RaftError::Timeout),
        }
    }

    pub(crate) fn touch(state: &mut ClusterState) {
        state.last_heartbeat = Instant::now();
    }

    pub(crate) fn on_membership_grew(&self, size: usize) {
        info!("Node {} now knows {} cluster members", self.shared.id, size);
        self.shared.pools.tune(size);
    }

    pub(crate) fn warn_rpc(&self, what: &str, peer: &str, err: &RaftError) {
        warn!("{what} to {peer} failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::local::LocalNetwork;

    fn node(id: &str) -> Node {
        Node::new(id, "127.0.0.1", "9090", "8080")
    }

    #[tokio::test]
    async fn fresh_node_is_follower_at_term_zero() {
        let mut cfg = RaftConfig::new(node("a"));
        cfg.add_peer(node("b"));
        let n = ClusterNode::new(cfg, Arc::new(LocalNetwork::new().transport()));

        assert_eq!(n.current_role().await, NodeRole::Follower);
        assert!(!n.is_leader().await);
        let st = n.persistent_state().await;
        assert_eq!(st.current_term, 0);
        assert!(st.leader_id.is_empty());
        assert!(n.leader_external_endpoint().await.is_none());
        assert_eq!(n.status().await.cluster_size, 2);
    }

    #[tokio::test]
    async fn members_are_sorted_and_report_health() {
        let mut cfg = RaftConfig::new(node("b"));
        cfg.add_peer(node("a"));
        let n = ClusterNode::new(cfg, Arc::new(LocalNetwork::new().transport()));

        let members = n.members().await;
        let ids: Vec<&str> = members.iter().map(|m| m.node.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(members.iter().all(|m| !m.dead));
    }

    #[tokio::test]
    async fn seed_snapshot_is_visible() {
        let mut snap = ConfigSnapshot::default();
        snap.put("org/org1", serde_json::json!({"mspid": "Org1MSP"}));
        let n = ClusterNode::new(RaftConfig::new(node("a")), Arc::new(LocalNetwork::new().transport()))
            .with_seed(snap.clone())
            .await;
        assert_eq!(n.snapshot().await, snap);
    }
}
