//! Cluster liveness pruning worker.
//!
//! Background task that probes every non-local cluster node referenced by a
//! backend and removes nodes that stop answering, so relay never keeps
//! targeting a peer that is permanently gone. A pruned peer that comes back
//! re-adds itself when its own backend registration merges on startup.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Liveness pruning worker
pub struct LivenessWorker {
    engine: Arc<Engine>,
    /// Probe interval (default 60 seconds)
    check_interval: Duration,
}

impl LivenessWorker {
    pub fn new(engine: Arc<Engine>, check_interval: Duration) -> Self {
        Self {
            engine,
            check_interval,
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) {
        let worker = self.clone();
        tokio::spawn(async move {
            info!(
                interval_secs = worker.check_interval.as_secs(),
                "Started cluster liveness worker"
            );

            let mut ticker = tokio::time::interval(worker.check_interval);
            loop {
                ticker.tick().await;
                worker.probe_round().await;
            }
        });
    }

    /// Probe every remote cluster node once and prune the dead ones.
    async fn probe_round(&self) {
        for backend in self.engine.registry().all() {
            for node in &backend.cluster_nodes {
                if node == self.engine.node_id() {
                    continue;
                }
                if self.engine.peer_link.probe(node).await {
                    debug!(node = %node, "Cluster node alive");
                } else if self.engine.registry().prune_node(&backend.id, node) {
                    warn!(
                        node = %node,
                        register_host = %backend.register_host,
                        "Pruned dead cluster node from backend"
                    );
                }
            }
        }
    }
}
