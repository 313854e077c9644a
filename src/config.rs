use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use thiserror::Error;

use crate::raft::{ConfigSnapshot, Node, RaftConfig, RaftError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Malformed cluster entry '{0}', expected id=addr:httpPort:rpcPort")]
    MalformedCluster(String),

    #[error("Cluster mode needs a node id (GATEWAY_BROKER_ID, or HOSTNAME in k8s mode)")]
    MissingSelfId,

    #[error("Invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to load seed config: {0}")]
    Seed(#[from] RaftError),
}

/// Bootstrap settings, read from the environment or the `serve` flags.
#[derive(Args, Debug, Clone, Default)]
pub struct Settings {
    /// Id of this gateway instance
    #[arg(long, env = "GATEWAY_BROKER_ID")]
    pub broker_id: Option<String>,

    /// Take the node id from HOSTNAME (pod name)
    #[arg(long, env = "GATEWAY_K8S_MODE", default_value_t = false)]
    pub k8s_mode: bool,

    /// Address peers use to reach this node
    #[arg(long, env = "GATEWAY_SELF_ADDR")]
    pub self_addr: Option<String>,

    /// Static membership: id=addr:httpPort:rpcPort,...
    #[arg(long, env = "GATEWAY_CLUSTER")]
    pub cluster: Option<String>,

    /// Interface the listeners bind to
    #[arg(long, env = "GATEWAY_BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    #[arg(long, env = "GATEWAY_HTTP_PORT", default_value = "8080")]
    pub http_port: String,

    #[arg(long, env = "GATEWAY_RPC_PORT", default_value = "9090")]
    pub rpc_port: String,

    #[arg(long, env = "GATEWAY_ELECTION_TIMEOUT_MS", default_value_t = 3000)]
    pub election_timeout_ms: u64,

    /// Upper bound of the random extra added to each election deadline
    #[arg(long, env = "GATEWAY_ELECTION_JITTER_MS", default_value_t = 1500)]
    pub election_jitter_ms: u64,

    #[arg(long, env = "GATEWAY_WATCHDOG_INTERVAL_MS", default_value_t = 300)]
    pub watchdog_interval_ms: u64,

    #[arg(long, env = "GATEWAY_RPC_TIMEOUT_MS", default_value_t = 1000)]
    pub rpc_timeout_ms: u64,

    /// Deadline for writes re-issued to the leader
    #[arg(long, env = "GATEWAY_FORWARD_TIMEOUT_MS", default_value_t = 10_000)]
    pub forward_timeout_ms: u64,

    /// JSON file holding the initial config snapshot
    #[arg(long, env = "GATEWAY_SEED_CONFIG")]
    pub seed_config: Option<PathBuf>,
}

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub raft: RaftConfig,
    pub http_listen: SocketAddr,
    pub rpc_listen: SocketAddr,
    pub forward_timeout: Duration,
    pub seed_config: Option<PathBuf>,
}

impl GatewayConfig {
    /// Resolve settings. `hostname` is only consulted in k8s mode.
    pub fn resolve(settings: &Settings, hostname: Option<String>) -> Result<Self, ConfigError> {
        let configured_id = if settings.k8s_mode {
            hostname.filter(|h| !h.is_empty())
        } else {
            settings.broker_id.clone().filter(|id| !id.is_empty())
        };

        let members = match settings.cluster.as_deref().map(str::trim) {
            Some(descriptor) if !descriptor.is_empty() => Some(parse_cluster(descriptor)?),
            _ => None,
        };

        let mut raft = match members {
            None => {
                let id = configured_id.unwrap_or_else(|| "gateway".to_string());
                RaftConfig::standalone(local_node(settings, &id, None))
            }
            Some(members) => {
                let id = configured_id.ok_or(ConfigError::MissingSelfId)?;
                let listed = members.iter().find(|m| m.id == id);
                let mut raft = RaftConfig::new(local_node(settings, &id, listed));
                for member in members {
                    raft.add_peer(member);
                }
                raft
            }
        };
        raft.election_timeout = settings.election_timeout_ms;
        raft.election_jitter = settings.election_jitter_ms;
        raft.watchdog_interval = settings.watchdog_interval_ms;
        raft.rpc_timeout = settings.rpc_timeout_ms;

        let http_listen = listen_addr(&settings.bind_addr, &raft.local.http_port)?;
        let rpc_listen = listen_addr(&settings.bind_addr, &raft.local.rpc_port)?;

        Ok(Self {
            raft,
            http_listen,
            rpc_listen,
            forward_timeout: Duration::from_millis(settings.forward_timeout_ms),
            seed_config: settings.seed_config.clone(),
        })
    }

    /// The configured seed snapshot, or an empty one.
    pub fn load_seed(&self) -> Result<ConfigSnapshot, ConfigError> {
        match &self.seed_config {
            Some(path) => Ok(ConfigSnapshot::load(path)?),
            None => Ok(ConfigSnapshot::default()),
        }
    }
}

/// Self entry: the cluster tuple wins for ports, an explicit self address
/// wins for the address.
fn local_node(settings: &Settings, id: &str, listed: Option<&Node>) -> Node {
    let (addr, http_port, rpc_port) = match listed {
        Some(node) => (node.addr.clone(), node.http_port.clone(), node.rpc_port.clone()),
        None => (
            "127.0.0.1".to_string(),
            settings.http_port.clone(),
            settings.rpc_port.clone(),
        ),
    };
    let addr = settings.self_addr.clone().unwrap_or(addr);
    Node::new(id, &addr, &rpc_port, &http_port)
}

fn listen_addr(host: &str, port: &str) -> Result<SocketAddr, ConfigError> {
    let raw = format!("{host}:{port}");
    raw.parse().map_err(|_| ConfigError::InvalidAddress(raw))
}

/// Parse `id=addr:httpPort:rpcPort` tuples separated by commas.
pub fn parse_cluster(descriptor: &str) -> Result<Vec<Node>, ConfigError> {
    let mut nodes = Vec::new();
    for entry in descriptor.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let malformed = || ConfigError::MalformedCluster(entry.to_string());
        let (id, endpoint) = entry.split_once('=').ok_or_else(malformed)?;
        let parts: Vec<&str> = endpoint.split(':').collect();
        let [addr, http_port, rpc_port] = parts.as_slice() else {
            return Err(malformed());
        };
        let valid_port = |p: &str| p.parse::<u16>().is_ok();
        if id.is_empty() || addr.is_empty() || !valid_port(*http_port) || !valid_port(*rpc_port) {
            return Err(malformed());
        }
        nodes.push(Node::new(id.trim(), addr, rpc_port, http_port));
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn settings() -> Settings {
        Settings {
            bind_addr: "0.0.0.0".into(),
            http_port: "8080".into(),
            rpc_port: "9090".into(),
            election_timeout_ms: 3000,
            election_jitter_ms: 1500,
            watchdog_interval_ms: 300,
            rpc_timeout_ms: 1000,
            forward_timeout_ms: 10_000,
            ..Settings::default()
        }
    }

    #[test]
    fn no_cluster_means_standalone() {
        let cfg = GatewayConfig::resolve(&settings(), None).expect("resolve");
        assert!(cfg.raft.standalone);
        assert!(cfg.raft.peers.is_empty());
        assert_eq!(cfg.raft.local.id, "gateway");
        assert_eq!(cfg.http_listen.port(), 8080);
        assert_eq!(cfg.rpc_listen.port(), 9090);
    }

    #[test]
    fn cluster_descriptor_builds_self_and_peers() {
        let mut s = settings();
        s.broker_id = Some("b".into());
        s.cluster = Some("a=10.0.0.1:8080:9090, b=10.0.0.2:8081:9091,c=10.0.0.3:8082:9092".into());

        let cfg = GatewayConfig::resolve(&s, None).expect("resolve");
        assert!(!cfg.raft.standalone);
        assert_eq!(cfg.raft.local.addr, "10.0.0.2");
        assert_eq!(cfg.raft.local.http_port, "8081");
        assert_eq!(cfg.raft.local.rpc_port, "9091");
        let peers: Vec<&str> = cfg.raft.peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(peers, vec!["a", "c"]);
        assert_eq!(cfg.rpc_listen.port(), 9091);
        assert_eq!(cfg.raft.election_jitter, 1500);
    }

    #[test]
    fn k8s_mode_takes_id_from_hostname() {
        let mut s = settings();
        s.k8s_mode = true;
        s.broker_id = Some("ignored".into());
        s.cluster = Some("gw-0=gw-0.gw:8080:9090,gw-1=gw-1.gw:8080:9090".into());

        let cfg = GatewayConfig::resolve(&s, Some("gw-1".into())).expect("resolve");
        assert_eq!(cfg.raft.local.id, "gw-1");
        assert_eq!(cfg.raft.local.addr, "gw-1.gw");
        assert_eq!(cfg.raft.peers.len(), 1);
    }

    #[test]
    fn cluster_without_self_id_is_fatal() {
        let mut s = settings();
        s.cluster = Some("a=10.0.0.1:8080:9090".into());
        assert!(matches!(
            GatewayConfig::resolve(&s, None),
            Err(ConfigError::MissingSelfId)
        ));
    }

    #[test]
    fn malformed_entries_are_rejected() {
        for bad in ["a=10.0.0.1:8080", "a10.0.0.1:8080:9090", "=h:1:2", "a=h:http:9090"] {
            assert!(
                matches!(parse_cluster(bad), Err(ConfigError::MalformedCluster(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn self_missing_from_descriptor_uses_own_ports() {
        let mut s = settings();
        s.broker_id = Some("z".into());
        s.self_addr = Some("10.0.0.26".into());
        s.cluster = Some("a=10.0.0.1:8080:9090".into());

        let cfg = GatewayConfig::resolve(&s, None).expect("resolve");
        assert_eq!(cfg.raft.local.addr, "10.0.0.26");
        assert_eq!(cfg.raft.local.rpc_port, "9090");
        assert_eq!(cfg.raft.peers.len(), 1);
    }

    #[test]
    fn seed_snapshot_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{"entries":{{"org/org1":{{"mspid":"Org1MSP"}}}}}}"#).expect("write");

        let mut s = settings();
        s.seed_config = Some(file.path().to_path_buf());
        let cfg = GatewayConfig::resolve(&s, None).expect("resolve");
        let seed = cfg.load_seed().expect("seed");
        assert!(seed.get("org/org1").is_some());
    }
}
