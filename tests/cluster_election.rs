use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fabgate::raft::local::LocalNetwork;
use fabgate::{ClusterNode, Node, NodeRole, RaftConfig, RaftError};
use serde_json::json;
use tokio::time::sleep;

struct TestCluster {
    network: LocalNetwork,
    nodes: Vec<ClusterNode>,
}

fn member(id: &str) -> Node {
    Node::new(id, "127.0.0.1", "9090", "8080")
}

fn quick_config(id: &str, peers: &[&str]) -> RaftConfig {
    let mut cfg = RaftConfig::new(member(id));
    for peer in peers {
        cfg.add_peer(member(peer));
    }
    cfg.election_timeout = 150;
    cfg.election_jitter = 150;
    cfg.watchdog_interval = 10;
    cfg.rpc_timeout = 50;
    cfg.candidate_retry = 50;
    cfg
}

impl TestCluster {
    async fn start(ids: &[&str]) -> Self {
        let network = LocalNetwork::new();
        let mut nodes = Vec::new();
        for id in ids {
            let node = ClusterNode::new(
                quick_config(id, ids),
                Arc::new(network.transport_for(id)),
            );
            network.register(node.clone());
            nodes.push(node);
        }
        for node in &nodes {
            node.start().await;
        }
        Self { network, nodes }
    }

    fn get(&self, id: &str) -> &ClusterNode {
        self.nodes
            .iter()
            .find(|n| n.id() == id)
            .unwrap_or_else(|| panic!("no node {id}"))
    }

    /// Wait until exactly one of `among` leads and the others follow it.
    async fn settled_leader(&self, among: &[&str], within: Duration) -> ClusterNode {
        let deadline = Instant::now() + within;
        loop {
            let mut leaders = Vec::new();
            let mut followers_agree = true;
            for id in among {
                let node = self.get(id);
                let status = node.status().await;
                match status.role {
                    NodeRole::Leader => leaders.push(node.clone()),
                    NodeRole::Follower => {}
                    NodeRole::Candidate => followers_agree = false,
                }
            }
            if leaders.len() == 1 && followers_agree {
                let leader = leaders.remove(0);
                let term = leader.persistent_state().await.current_term;
                let mut agreed = true;
                for id in among.iter().filter(|id| **id != leader.id()) {
                    let st = self.get(id).persistent_state().await;
                    agreed &= st.leader_id == leader.id() && st.current_term == term;
                }
                if agreed {
                    return leader;
                }
            }
            assert!(Instant::now() < deadline, "cluster did not settle on a leader");
            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}

async fn eventually<F, Fut>(within: Duration, what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + within;
    while !check().await {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_elect_exactly_one_leader_per_term() {
    let _ = env_logger::builder().is_test(true).try_init();
    let cluster = TestCluster::start(&["a", "b", "c"]).await;
    cluster
        .settled_leader(&["a", "b", "c"], Duration::from_secs(5))
        .await;

    // Sample for a while: no term may ever show two leaders.
    let mut leaders_by_term: HashMap<i32, HashSet<String>> = HashMap::new();
    let until = Instant::now() + Duration::from_millis(500);
    while Instant::now() < until {
        for node in &cluster.nodes {
            let status = node.status().await;
            if status.role == NodeRole::Leader {
                leaders_by_term
                    .entry(status.term)
                    .or_default()
                    .insert(status.id);
            }
        }
        sleep(Duration::from_millis(5)).await;
    }
    for (term, leaders) in &leaders_by_term {
        assert_eq!(leaders.len(), 1, "term {term} had leaders {leaders:?}");
    }
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leader_write_replicates_to_followers() {
    let cluster = TestCluster::start(&["a", "b", "c"]).await;
    let leader = cluster
        .settled_leader(&["a", "b", "c"], Duration::from_secs(5))
        .await;

    let writer = leader.clone();
    leader
        .route_write(
            || async move {
                writer
                    .update_config(|snap| snap.put("channel/mychannel", json!({"orgs": ["org1"]})))
                    .await;
                Ok(())
            },
            |_| async { Err(RaftError::NotLeader) },
        )
        .await
        .expect("leader write");
    assert_eq!(leader.persistent_state().await.version, 1);

    for node in &cluster.nodes {
        eventually(Duration::from_secs(2), "replication", || async move {
            node.persistent_state().await.version == 1
                && node.snapshot().await.get("channel/mychannel").is_some()
        })
        .await;
    }
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn follower_write_is_applied_once_by_the_leader() {
    let cluster = TestCluster::start(&["a", "b", "c"]).await;
    let leader = cluster
        .settled_leader(&["a", "b", "c"], Duration::from_secs(5))
        .await;
    let follower = cluster
        .nodes
        .iter()
        .find(|n| n.id() != leader.id())
        .cloned()
        .expect("a follower");

    let ran_on_follower = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&ran_on_follower);
    let routed_to = follower
        .route_write(
            || async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(String::new())
            },
            |target| {
                // Stand-in for the HTTP hop: run the write on the leader.
                let remote = cluster.get(&target.id).clone();
                async move {
                    let writer = remote.clone();
                    remote
                        .route_write(
                            || async move {
                                writer
                                    .update_config(|snap| snap.put("org/org2", json!(true)))
                                    .await;
                                Ok(writer.id().to_string())
                            },
                            |_| async { Err(RaftError::NotLeader) },
                        )
                        .await
                }
            },
        )
        .await
        .expect("forwarded write");

    assert_eq!(routed_to, leader.id());
    assert!(!ran_on_follower.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(leader.persistent_state().await.version, 1);
    let follower = &follower;
    eventually(Duration::from_secs(2), "write to reach the follower", || async move {
        follower.persistent_state().await.version == 1
            && follower.snapshot().await.get("org/org2").is_some()
    })
    .await;
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn isolated_leader_is_replaced_and_steps_down_after_healing() {
    let cluster = TestCluster::start(&["a", "b", "c"]).await;
    let old = cluster
        .settled_leader(&["a", "b", "c"], Duration::from_secs(5))
        .await;
    let old_term = old.persistent_state().await.current_term;
    let rest: Vec<&str> = ["a", "b", "c"]
        .into_iter()
        .filter(|id| *id != old.id())
        .collect();

    cluster.network.isolate(old.id());
    let new = cluster.settled_leader(&rest, Duration::from_secs(5)).await;
    assert_ne!(new.id(), old.id());
    assert!(new.persistent_state().await.current_term > old_term);

    // Cut off from everyone, the old leader keeps its role but sees peers die.
    let isolated = &old;
    eventually(Duration::from_secs(2), "peers reported dead", || async move {
        isolated.members().await.iter().filter(|m| m.dead).count() == 2
    })
    .await;

    cluster.network.heal(old.id());
    let settled = cluster
        .settled_leader(&["a", "b", "c"], Duration::from_secs(5))
        .await;
    assert!(settled.persistent_state().await.current_term > old_term);
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_joiner_is_discovered_through_the_leader() {
    let cluster = TestCluster::start(&["a", "b", "c"]).await;
    let leader = cluster
        .settled_leader(&["a", "b", "c"], Duration::from_secs(5))
        .await;

    // "d" only knows the leader; the others learn about it via SyncNode.
    let joiner = ClusterNode::new(
        quick_config("d", &[leader.id()]),
        Arc::new(cluster.network.transport_for("d")),
    );
    cluster.network.register(joiner.clone());
    joiner.start().await;

    for node in cluster.nodes.iter().chain(std::iter::once(&joiner)) {
        eventually(Duration::from_secs(3), "membership to converge", || async move {
            node.status().await.cluster_size == 4
        })
        .await;
    }
    let (joined, leader_id) = (&joiner, leader.id());
    eventually(Duration::from_secs(2), "joiner to follow the leader", || async move {
        joined.persistent_state().await.leader_id == leader_id
            && joined.current_role().await == NodeRole::Follower
    })
    .await;

    joiner.shutdown().await;
    cluster.shutdown().await;
}
