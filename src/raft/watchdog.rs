use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
// Use external log crate
use ::log::info;

use super::node::ClusterNode;
use super::state::NodeRole;

impl ClusterNode {
    pub(crate) async fn run_watchdog(self, generation: u64, mut stop: oneshot::Receiver<()>) {
        let mut ticker = interval(self.shared.config.watchdog_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    if self.heartbeat_expired().await {
                        info!(
                            "Node {} saw no heartbeat within the election timeout, starting election",
                            self.shared.id
                        );
                        self.request_role(NodeRole::Candidate, generation);
                        break;
                    }
                }
            }
        }
    }

    pub(crate) async fn heartbeat_expired(&self) -> bool {
        let state = self.shared.state.lock().await;
        state.role == NodeRole::Follower && state.last_heartbeat.elapsed() > state.election_deadline
    }
}
