use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Consecutive failed heartbeats after which a peer is reported dead.
pub const DEAD_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

impl NodeRole {
    pub fn tag(&self) -> &'static str {
        match self {
            NodeRole::Follower => "Follower",
            NodeRole::Candidate => "Candidate",
            NodeRole::Leader => "Leader",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub addr: String,
    pub rpc_port: String,
    pub http_port: String,
    pub status: NodeRole,
}

impl Node {
    pub fn new(id: &str, addr: &str, rpc_port: &str, http_port: &str) -> Self {
        Self {
            id: id.to_string(),
            addr: addr.to_string(),
            rpc_port: rpc_port.to_string(),
            http_port: http_port.to_string(),
            status: NodeRole::Follower,
        }
    }

    pub fn rpc_endpoint(&self) -> String {
        format!("{}:{}", self.addr, self.rpc_port)
    }

    pub fn http_endpoint(&self) -> String {
        format!("http://{}:{}", self.addr, self.http_port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHealth {
    pub consecutive_failures: u32,
}

impl PeerHealth {
    pub fn is_dead(&self) -> bool {
        self.consecutive_failures >= DEAD_AFTER_FAILURES
    }
}

/// Known membership. Entries are only ever added; there is no eviction.
#[derive(Debug, Clone)]
pub struct ClusterView {
    self_id: String,
    nodes: HashMap<String, Node>,
    health: HashMap<String, PeerHealth>,
}

impl ClusterView {
    pub fn new(local: Node) -> Self {
        let self_id = local.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(self_id.clone(), local);
        Self {
            self_id,
            nodes,
            health: HashMap::new(),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn local(&self) -> &Node {
        // The self entry is inserted at construction and never removed.
        &self.nodes[&self.self_id]
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &HashMap<String, Node> {
        &self.nodes
    }

    pub fn peers(&self) -> Vec<Node> {
        let mut peers: Vec<Node> = self
            .nodes
            .values()
            .filter(|n| n.id != self.self_id)
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Adds the node if its id is unknown. Returns true when the view grew.
    pub fn learn(&mut self, node: &Node) -> bool {
        if node.id.is_empty() || self.nodes.contains_key(&node.id) {
            return false;
        }
        self.nodes.insert(node.id.clone(), node.clone());
        true
    }

    /// Merge a remote view by id: unknown ids are added, known remote ids get
    /// their status refreshed. The self entry is never overwritten.
    pub fn merge(&mut self, remote: &HashMap<String, Node>) -> bool {
        let mut grew = false;
        for node in remote.values() {
            if node.id == self.self_id {
                continue;
            }
            match self.nodes.get_mut(&node.id) {
                Some(existing) => existing.status = node.status,
                None => grew |= self.learn(node),
            }
        }
        grew
    }

    pub fn set_status(&mut self, id: &str, status: NodeRole) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = status;
        }
    }

    /// Mark `leader_id` as leader and every other remote node as follower.
    pub fn mark_leader(&mut self, leader_id: &str) {
        let self_id = self.self_id.clone();
        for node in self.nodes.values_mut() {
            if node.id == self_id {
                continue;
            }
            node.status = if node.id == leader_id {
                NodeRole::Leader
            } else {
                NodeRole::Follower
            };
        }
    }

    pub fn record_reachable(&mut self, id: &str) {
        self.health.insert(id.to_string(), PeerHealth::default());
    }

    /// Returns true when this failure made the peer cross into "dead".
    pub fn record_unreachable(&mut self, id: &str) -> bool {
        let entry = self.health.entry(id.to_string()).or_default();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.consecutive_failures == DEAD_AFTER_FAILURES
    }

    pub fn health(&self, id: &str) -> PeerHealth {
        self.health.get(id).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotedFor {
    pub id: String,
    pub term: i32,
    pub timestamp: i64,
}

impl VotedFor {
    pub fn clear(&mut self) {
        self.id.clear();
        self.term = 0;
        self.timestamp = 0;
    }
}

/// Recorded version while following a leader whose snapshot has not arrived.
pub const UNSYNCED_VERSION: i32 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    pub current_term: i32,
    pub leader_id: String,
    pub version: i32,
    pub voted_for: VotedFor,
}

impl PersistentState {
    pub fn adopt_term(&mut self, term: i32) -> bool {
        if term > self.current_term {
            self.current_term = term;
            true
        } else {
            false
        }
    }

    /// Follow a leader learned outside a heartbeat. A new `(term, leader)`
    /// pair leaves the version unsynced so the next heartbeat installs the
    /// leader's snapshot.
    pub fn follow_leader(&mut self, leader_id: &str, term: i32) {
        if term < self.current_term {
            return;
        }
        if self.current_term != term || self.leader_id != leader_id {
            self.version = UNSYNCED_VERSION;
        }
        self.adopt_term(term);
        self.leader_id = leader_id.to_string();
    }

    pub fn matches_heartbeat(&self, term: i32, leader_id: &str, version: i32) -> bool {
        self.current_term == term && self.leader_id == leader_id && self.version == version
    }
}

pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
