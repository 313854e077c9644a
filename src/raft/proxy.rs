use std::future::Future;

// Use external log crate
use ::log::{debug, info, warn};

use super::node::ClusterNode;
use super::state::{Node, NodeRole};
use super::RaftError;
use crate::network::metrics;

impl ClusterNode {
    /// Route a mutating operation to the single writer.
    ///
    /// A leader (or a standalone node) runs `local` and bumps the config
    /// version when it succeeds, or reports [`RaftError::NotLeader`] if it lost
    /// the role meanwhile. A follower hands the believed leader to
    /// `forward`. A candidate waits once for the election to settle and
    /// gives up with [`RaftError::LeaderUnknown`] if it has not.
    pub async fn route_write<T, L, LF, F, FF>(&self, local: L, forward: F) -> Result<T, RaftError>
    where
        L: FnOnce() -> LF,
        LF: Future<Output = Result<T, RaftError>>,
        F: FnOnce(Node) -> FF,
        FF: Future<Output = Result<T, RaftError>>,
    {
        let standalone = self.shared.config.standalone;
        let (mut role, mut generation) = self.role_and_generation().await;

        if role == NodeRole::Candidate && !standalone {
            debug!(
                "Node {} is electing, holding write for {:?}",
                self.shared.id,
                self.shared.config.candidate_retry()
            );
            tokio::time::sleep(self.shared.config.candidate_retry()).await;
            (role, generation) = self.role_and_generation().await;
            if role == NodeRole::Candidate {
                return Err(RaftError::LeaderUnknown);
            }
        }

        if standalone || role == NodeRole::Leader {
            let result = local().await?;
            let version = {
                let mut state = self.shared.state.lock().await;
                // The write only counts if leadership held throughout.
                if !standalone && state.generation != generation {
                    warn!(
                        "Node {} lost leadership during a write, version left at {}",
                        self.shared.id, state.persistent.version
                    );
                    return Err(RaftError::NotLeader);
                }
                state.persistent.version += 1;
                state.persistent.version
            };
            metrics::record_local_write();
            info!(
                "Node {} applied write, config version now {version}",
                self.shared.id
            );
            return Ok(result);
        }

        let leader = self.leader_node().await.ok_or(RaftError::LeaderUnknown)?;
        debug!(
            "Node {} forwarding write to leader {}",
            self.shared.id, leader.id
        );
        metrics::record_forwarded_write();
        forward(leader).await
    }

    async fn role_and_generation(&self) -> (NodeRole, u64) {
        let state = self.shared.state.lock().await;
        (state.role, state.generation)
    }
}
