use std::collections::HashMap;

use super::state::Node;

// Transport-agnostic payloads of the coordination RPCs.

#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub term: i32,
    pub leader_id: String,
    pub version: i32,
    pub config: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatReply {
    pub success: bool,
    pub term: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoteRequest {
    pub term: i32,
    pub candidate_id: String,
    pub candidate_url: String,
    pub last_leader_id: String,
    pub last_term: i32,
    pub last_version: i32,
    pub timestamp: i64,
    pub candidate: Option<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteReply {
    pub granted: bool,
    pub term: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowMeReply {
    Ok,
    Term(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaderMeReply {
    Ok,
    FollowMe { leader: Node, term: i32 },
    VoteMe { term: i32 },
    LeaderNode { leader: Node, term: i32 },
}

pub type Membership = HashMap<String, Node>;
