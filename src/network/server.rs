use std::net::SocketAddr;

use log::{debug, info};
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::network::convert::{membership_from_wire, membership_to_wire};
use crate::network::proto::cluster_service_server::{ClusterService, ClusterServiceServer};
use crate::raft::ClusterNode;

use super::proto::*;
use super::NetworkError;

#[derive(Clone)]
pub struct ClusterServer {
    node: ClusterNode,
}

impl ClusterServer {
    pub fn new(node: ClusterNode) -> Self {
        Self { node }
    }

    pub fn into_service(self) -> ClusterServiceServer<Self> {
        ClusterServiceServer::new(self)
    }
}

fn required_node(node: Option<NodeInfo>, rpc: &str) -> Result<crate::raft::Node, Status> {
    node.map(Into::into)
        .ok_or_else(|| Status::invalid_argument(format!("{rpc}: missing node")))
}

#[tonic::async_trait]
impl ClusterService for ClusterServer {
    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        debug!(
            "Received Heartbeat: term={}, leader={}, version={}",
            req.term, req.leader_id, req.version
        );

        let reply = self.node.handle_heartbeat(req.into()).await;
        Ok(Response::new(reply.into()))
    }

    async fn request_vote(
        &self,
        request: Request<RequestVoteRequest>,
    ) -> Result<Response<RequestVoteResponse>, Status> {
        let req = request.into_inner();
        debug!(
            "Received RequestVote: term={}, candidate={}",
            req.term, req.candidate_id
        );

        let reply = self.node.handle_request_vote(req.into()).await;
        Ok(Response::new(reply.into()))
    }

    async fn follow_me(
        &self,
        request: Request<FollowMeRequest>,
    ) -> Result<Response<FollowMeResponse>, Status> {
        let req = request.into_inner();
        let leader = required_node(req.node, "FollowMe")?;
        debug!("Received FollowMe: leader={}, term={}", leader.id, req.term);

        let reply = self.node.handle_follow_me(leader, req.term).await;
        Ok(Response::new(reply.into()))
    }

    async fn leader_me(
        &self,
        request: Request<LeaderMeRequest>,
    ) -> Result<Response<LeaderMeResponse>, Status> {
        let node = required_node(request.into_inner().node, "LeaderMe")?;
        debug!("Received LeaderMe from {}", node.id);

        let reply = self.node.handle_leader_me(node).await;
        Ok(Response::new(reply.into()))
    }

    async fn sync_node(
        &self,
        request: Request<SyncNodeRequest>,
    ) -> Result<Response<SyncNodeResponse>, Status> {
        let req = request.into_inner();
        debug!("Received SyncNode with {} members", req.nodes.len());

        let merged = self
            .node
            .handle_sync_node(membership_from_wire(req.nodes))
            .await;
        Ok(Response::new(SyncNodeResponse {
            nodes: membership_to_wire(merged),
        }))
    }
}

pub async fn run_cluster_server(addr: SocketAddr, node: ClusterNode) -> Result<(), NetworkError> {
    info!("Cluster RPC listening on {addr}");
    Server::builder()
        .add_service(ClusterServer::new(node).into_service())
        .serve(addr)
        .await?;
    Ok(())
}
