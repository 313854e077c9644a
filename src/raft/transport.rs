use super::message::{
    FollowMeReply, Heartbeat, HeartbeatReply, LeaderMeReply, Membership, VoteReply, VoteRequest,
};
use super::state::Node;
use super::RaftError;

/// Outbound side of the coordination RPCs.
///
/// Implementations are not required to enforce deadlines; the cluster node
/// wraps every call in its own RPC timeout.
#[tonic::async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn heartbeat(&self, target: &Node, request: Heartbeat) -> Result<HeartbeatReply, RaftError>;

    async fn request_vote(&self, target: &Node, request: VoteRequest) -> Result<VoteReply, RaftError>;

    async fn follow_me(&self, target: &Node, leader: Node, term: i32) -> Result<FollowMeReply, RaftError>;

    async fn leader_me(&self, target: &Node, node: Node) -> Result<LeaderMeReply, RaftError>;

    async fn sync_node(&self, target: &Node, nodes: Membership) -> Result<Membership, RaftError>;
}
