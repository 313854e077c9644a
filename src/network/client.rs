use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::network::convert::{membership_from_wire, membership_to_wire};
use crate::network::proto::cluster_service_client::ClusterServiceClient;
use crate::raft::{
    FollowMeReply, Heartbeat, HeartbeatReply, LeaderMeReply, Membership, Node, PeerTransport,
    RaftError, VoteReply, VoteRequest,
};

use super::proto::*;
use super::NetworkError;

#[derive(Clone)]
pub struct ClusterClient {
    client: ClusterServiceClient<Channel>,
}

impl ClusterClient {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?
            .connect_timeout(timeout)
            .timeout(timeout);

        Ok(Self {
            client: ClusterServiceClient::new(endpoint.connect_lazy()),
        })
    }

    pub async fn heartbeat(&mut self, request: Heartbeat) -> Result<HeartbeatReply, NetworkError> {
        let request: HeartbeatRequest = request.into();
        let response = self
            .client
            .heartbeat(Request::new(request))
            .await?
            .into_inner();
        Ok(response.into())
    }

    pub async fn request_vote(&mut self, request: VoteRequest) -> Result<VoteReply, NetworkError> {
        let request: RequestVoteRequest = request.into();
        let response = self
            .client
            .request_vote(Request::new(request))
            .await?
            .into_inner();
        Ok(response.into())
    }

    pub async fn follow_me(&mut self, leader: Node, term: i32) -> Result<FollowMeReply, NetworkError> {
        let request = FollowMeRequest {
            node: Some(leader.into()),
            term,
        };
        let response = self
            .client
            .follow_me(Request::new(request))
            .await?
            .into_inner();
        Ok(response.into())
    }

    pub async fn leader_me(&mut self, node: Node) -> Result<LeaderMeReply, NetworkError> {
        let request = LeaderMeRequest {
            node: Some(node.into()),
        };
        let response = self
            .client
            .leader_me(Request::new(request))
            .await?
            .into_inner();
        Ok(response.into())
    }

    pub async fn sync_node(&mut self, nodes: Membership) -> Result<Membership, NetworkError> {
        let request = SyncNodeRequest {
            nodes: membership_to_wire(nodes),
        };
        let response = self
            .client
            .sync_node(Request::new(request))
            .await?
            .into_inner();
        Ok(membership_from_wire(response.nodes))
    }
}

pub struct GrpcTransport {
    timeout: Duration,
    clients: Mutex<HashMap<String, ClusterClient>>,
}

impl GrpcTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, target: &Node) -> Result<ClusterClient, RaftError> {
        let address = target.rpc_endpoint();
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| RaftError::NetworkError("client cache poisoned".into()))?;
        if let Some(client) = clients.get(&address) {
            return Ok(client.clone());
        }
        let client = ClusterClient::new(&address, self.timeout)?;
        clients.insert(address, client.clone());
        Ok(client)
    }
}

#[tonic::async_trait]
impl PeerTransport for GrpcTransport {
    async fn heartbeat(&self, target: &Node, request: Heartbeat) -> Result<HeartbeatReply, RaftError> {
        Ok(self.client(target)?.heartbeat(request).await?)
    }

    async fn request_vote(&self, target: &Node, request: VoteRequest) -> Result<VoteReply, RaftError> {
        Ok(self.client(target)?.request_vote(request).await?)
    }

    async fn follow_me(&self, target: &Node, leader: Node, term: i32) -> Result<FollowMeReply, RaftError> {
        Ok(self.client(target)?.follow_me(leader, term).await?)
    }

    async fn leader_me(&self, target: &Node, node: Node) -> Result<LeaderMeReply, RaftError> {
        Ok(self.client(target)?.leader_me(node).await?)
    }

    async fn sync_node(&self, target: &Node, nodes: Membership) -> Result<Membership, RaftError> {
        Ok(self.client(target)?.sync_node(nodes).await?)
    }
}
