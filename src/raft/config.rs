use std::time::Duration;

use rand::Rng;

use super::state::Node;

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub local: Node,
    pub peers: Vec<Node>,
    pub standalone: bool,
    pub election_timeout: u64,  // in milliseconds
    pub election_jitter: u64,   // in milliseconds, added on top of the timeout
    pub watchdog_interval: u64, // in milliseconds
    pub rpc_timeout: u64,       // in milliseconds
    pub candidate_retry: u64,   // in milliseconds, single retry in route_write
}

impl RaftConfig {
    pub fn new(local: Node) -> Self {
        Self {
            local,
            peers: Vec::new(),
            standalone: false,
            election_timeout: 3000,
            election_jitter: 0,
            watchdog_interval: 300,
            rpc_timeout: 1000,
            candidate_retry: 300,
        }
    }

    /// A node that never joins a cluster and always acts as leader.
    pub fn standalone(local: Node) -> Self {
        Self {
            standalone: true,
            ..Self::new(local)
        }
    }

    pub fn add_peer(&mut self, peer: Node) {
        if peer.id != self.local.id && !self.peers.iter().any(|p| p.id == peer.id) {
            self.peers.push(peer);
        }
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis((self.election_timeout / 10).max(1))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval.max(1))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout)
    }

    pub fn candidate_retry(&self) -> Duration {
        Duration::from_millis(self.candidate_retry)
    }

    /// Election deadline drawn in `[timeout, timeout + jitter)`.
    pub fn randomized_election_timeout(&self) -> Duration {
        let extra = if self.election_jitter == 0 {
            0
        } else {
            rand::rng().random_range(0..self.election_jitter)
        };
        Duration::from_millis(self.election_timeout + extra)
    }
}
