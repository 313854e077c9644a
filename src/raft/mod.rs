mod config;
mod election;
mod error;
mod heartbeat;
pub mod local;
mod membership;
mod message;
mod node;
mod pool;
mod proxy;
mod role;
mod snapshot;
mod state;
mod transport;
mod watchdog;

pub use self::config::RaftConfig;
pub use self::election::{should_grant, ElectionRound, RoundOutcome};
pub use self::error::RaftError;
pub use self::message::{
    FollowMeReply, Heartbeat, HeartbeatReply, LeaderMeReply, Membership, VoteReply, VoteRequest,
};
pub use self::node::{ClusterNode, MemberReport, NodeStatusReport};
pub use self::pool::{FanoutPool, FanoutPools};
pub use self::snapshot::ConfigSnapshot;
pub use self::state::{
    now_nanos, ClusterView, Node, NodeRole, PeerHealth, PersistentState, VotedFor,
    DEAD_AFTER_FAILURES, UNSYNCED_VERSION,
};
pub use self::transport::PeerTransport;
