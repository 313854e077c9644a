// Coordination core: elections, heartbeats, config replication, write routing
pub mod raft;

// Wire layer: gRPC between nodes, HTTP toward clients
pub mod network;
pub mod config;

// Public exports
pub use config::{ConfigError, GatewayConfig, Settings};
pub use raft::{ClusterNode, ConfigSnapshot, Node, NodeRole, RaftConfig, RaftError};
