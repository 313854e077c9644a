use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::message::{
    FollowMeReply, Heartbeat, HeartbeatReply, LeaderMeReply, Membership, VoteReply, VoteRequest,
};
use super::node::ClusterNode;
use super::state::Node;
use super::transport::PeerTransport;
use super::RaftError;

#[derive(Default)]
struct Registry {
    nodes: HashMap<String, ClusterNode>,
    /// Ids that accept calls but never answer.
    silent: HashSet<String>,
    isolated: HashSet<String>,
}

enum Route {
    Deliver(ClusterNode),
    Silent,
    Unreachable,
}

/// In-process network for running several nodes inside one runtime.
///
/// Calls are delivered straight to the target's handlers. Nodes can be
/// isolated and healed to simulate partitions.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport with no sender identity; isolation only applies to targets.
    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            from: None,
        }
    }

    /// Transport for the node `id`; calls fail while either end is isolated.
    pub fn transport_for(&self, id: &str) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            from: Some(id.to_string()),
        }
    }

    pub fn register(&self, node: ClusterNode) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.nodes.insert(node.id().to_string(), node);
        }
    }

    pub fn register_silent(&self, id: &str) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.silent.insert(id.to_string());
        }
    }

    pub fn isolate(&self, id: &str) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.isolated.insert(id.to_string());
        }
    }

    pub fn heal(&self, id: &str) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.isolated.remove(id);
        }
    }

    fn route(&self, from: Option<&str>, to: &str) -> Route {
        let Ok(registry) = self.registry.lock() else {
            return Route::Unreachable;
        };
        let cut = registry.isolated.contains(to)
            || from.is_some_and(|from| registry.isolated.contains(from));
        if cut {
            return Route::Unreachable;
        }
        if registry.silent.contains(to) {
            return Route::Silent;
        }
        match registry.nodes.get(to) {
            Some(node) => Route::Deliver(node.clone()),
            None => Route::Unreachable,
        }
    }
}

pub struct LocalTransport {
    network: LocalNetwork,
    from: Option<String>,
}

impl LocalTransport {
    async fn target(&self, target: &Node) -> Result<ClusterNode, RaftError> {
        match self.network.route(self.from.as_deref(), &target.id) {
            Route::Deliver(node) => Ok(node),
            Route::Silent => std::future::pending().await,
            Route::Unreachable => Err(RaftError::NetworkError(format!(
                "node {} unreachable",
                target.id
            ))),
        }
    }
}

#[tonic::async_trait]
impl PeerTransport for LocalTransport {
    async fn heartbeat(&self, target: &Node, request: Heartbeat) -> Result<HeartbeatReply, RaftError> {
        Ok(self.target(target).await?.handle_heartbeat(request).await)
    }

    async fn request_vote(&self, target: &Node, request: VoteRequest) -> Result<VoteReply, RaftError> {
        Ok(self.target(target).await?.handle_request_vote(request).await)
    }

    async fn follow_me(&self, target: &Node, leader: Node, term: i32) -> Result<FollowMeReply, RaftError> {
        Ok(self.target(target).await?.handle_follow_me(leader, term).await)
    }

    async fn leader_me(&self, target: &Node, node: Node) -> Result<LeaderMeReply, RaftError> {
        Ok(self.target(target).await?.handle_leader_me(node).await)
    }

    async fn sync_node(&self, target: &Node, nodes: Membership) -> Result<Membership, RaftError> {
        Ok(self.target(target).await?.handle_sync_node(nodes).await)
    }
}
