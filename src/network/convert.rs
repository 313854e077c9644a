use std::collections::HashMap;

use super::proto;
use crate::raft::{
    FollowMeReply, Heartbeat, HeartbeatReply, LeaderMeReply, Membership, Node, NodeRole,
    VoteReply, VoteRequest,
};

// Conversions between the generated wire types and the core's payloads.

impl From<NodeRole> for proto::NodeStatus {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Follower => proto::NodeStatus::Follower,
            NodeRole::Candidate => proto::NodeStatus::Candidate,
            NodeRole::Leader => proto::NodeStatus::Leader,
        }
    }
}

impl From<proto::NodeStatus> for NodeRole {
    fn from(status: proto::NodeStatus) -> Self {
        match status {
            proto::NodeStatus::Follower => NodeRole::Follower,
            proto::NodeStatus::Candidate => NodeRole::Candidate,
            proto::NodeStatus::Leader => NodeRole::Leader,
        }
    }
}

impl From<Node> for proto::NodeInfo {
    fn from(node: Node) -> Self {
        let mut info = proto::NodeInfo {
            id: node.id,
            addr: node.addr,
            rpc_port: node.rpc_port,
            http_port: node.http_port,
            status: 0,
        };
        info.set_status(node.status.into());
        info
    }
}

impl From<proto::NodeInfo> for Node {
    fn from(info: proto::NodeInfo) -> Self {
        let status = info.status().into();
        Node {
            id: info.id,
            addr: info.addr,
            rpc_port: info.rpc_port,
            http_port: info.http_port,
            status,
        }
    }
}

pub(crate) fn membership_to_wire(nodes: Membership) -> HashMap<String, proto::NodeInfo> {
    nodes.into_iter().map(|(id, node)| (id, node.into())).collect()
}

pub(crate) fn membership_from_wire(nodes: HashMap<String, proto::NodeInfo>) -> Membership {
    nodes.into_iter().map(|(id, info)| (id, info.into())).collect()
}

impl From<Heartbeat> for proto::HeartbeatRequest {
    fn from(hb: Heartbeat) -> Self {
        proto::HeartbeatRequest {
            term: hb.term,
            leader_id: hb.leader_id,
            version: hb.version,
            config: hb.config,
        }
    }
}

impl From<proto::HeartbeatRequest> for Heartbeat {
    fn from(req: proto::HeartbeatRequest) -> Self {
        Heartbeat {
            term: req.term,
            leader_id: req.leader_id,
            version: req.version,
            config: req.config,
        }
    }
}

impl From<HeartbeatReply> for proto::HeartbeatResponse {
    fn from(reply: HeartbeatReply) -> Self {
        proto::HeartbeatResponse {
            success: reply.success,
            term: reply.term,
        }
    }
}

impl From<proto::HeartbeatResponse> for HeartbeatReply {
    fn from(resp: proto::HeartbeatResponse) -> Self {
        HeartbeatReply {
            success: resp.success,
            term: resp.term,
        }
    }
}

impl From<VoteRequest> for proto::RequestVoteRequest {
    fn from(req: VoteRequest) -> Self {
        proto::RequestVoteRequest {
            term: req.term,
            candidate_id: req.candidate_id,
            candidate_url: req.candidate_url,
            last_leader_id: req.last_leader_id,
            last_term: req.last_term,
            last_version: req.last_version,
            timestamp: req.timestamp,
            candidate: req.candidate.map(Into::into),
        }
    }
}

impl From<proto::RequestVoteRequest> for VoteRequest {
    fn from(req: proto::RequestVoteRequest) -> Self {
        VoteRequest {
            term: req.term,
            candidate_id: req.candidate_id,
            candidate_url: req.candidate_url,
            last_leader_id: req.last_leader_id,
            last_term: req.last_term,
            last_version: req.last_version,
            timestamp: req.timestamp,
            candidate: req.candidate.map(Into::into),
        }
    }
}

impl From<VoteReply> for proto::RequestVoteResponse {
    fn from(reply: VoteReply) -> Self {
        proto::RequestVoteResponse {
            granted: reply.granted,
            term: reply.term,
        }
    }
}

impl From<proto::RequestVoteResponse> for VoteReply {
    fn from(resp: proto::RequestVoteResponse) -> Self {
        VoteReply {
            granted: resp.granted,
            term: resp.term,
        }
    }
}

impl From<FollowMeReply> for proto::FollowMeResponse {
    fn from(reply: FollowMeReply) -> Self {
        let mut resp = proto::FollowMeResponse::default();
        match reply {
            FollowMeReply::Ok => resp.set_reply(proto::FollowMeReply::Ok),
            FollowMeReply::Term(term) => {
                resp.set_reply(proto::FollowMeReply::Term);
                resp.term = term;
            }
        }
        resp
    }
}

impl From<proto::FollowMeResponse> for FollowMeReply {
    fn from(resp: proto::FollowMeResponse) -> Self {
        match resp.reply() {
            proto::FollowMeReply::Ok => FollowMeReply::Ok,
            proto::FollowMeReply::Term => FollowMeReply::Term(resp.term),
        }
    }
}

impl From<LeaderMeReply> for proto::LeaderMeResponse {
    fn from(reply: LeaderMeReply) -> Self {
        let mut resp = proto::LeaderMeResponse::default();
        match reply {
            LeaderMeReply::Ok => resp.set_reply(proto::LeaderMeReply::Ok),
            LeaderMeReply::FollowMe { leader, term } => {
                resp.set_reply(proto::LeaderMeReply::FollowMe);
                resp.leader = Some(leader.into());
                resp.term = term;
            }
            LeaderMeReply::VoteMe { term } => {
                resp.set_reply(proto::LeaderMeReply::VoteMe);
                resp.term = term;
            }
            LeaderMeReply::LeaderNode { leader, term } => {
                resp.set_reply(proto::LeaderMeReply::LeaderNode);
                resp.leader = Some(leader.into());
                resp.term = term;
            }
        }
        resp
    }
}

impl From<proto::LeaderMeResponse> for LeaderMeReply {
    // A leader-carrying reply without a leader degrades to `Ok`.
    fn from(resp: proto::LeaderMeResponse) -> Self {
        let term = resp.term;
        match (resp.reply(), resp.leader) {
            (proto::LeaderMeReply::FollowMe, Some(leader)) => LeaderMeReply::FollowMe {
                leader: leader.into(),
                term,
            },
            (proto::LeaderMeReply::LeaderNode, Some(leader)) => LeaderMeReply::LeaderNode {
                leader: leader.into(),
                term,
            },
            (proto::LeaderMeReply::VoteMe, _) => LeaderMeReply::VoteMe { term },
            _ => LeaderMeReply::Ok,
        }
    }
}
