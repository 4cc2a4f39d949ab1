//! Collaborator interfaces.
//!
//! The engine talks to three external subsystems through small trait seams:
//! the node lifecycle of the host's pub/sub service, the remote protocol
//! publish operation, and the cluster peer link. Production deployments
//! wire real transports; the null implementations keep a single-node
//! gateway fully functional.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::models::SummaryField;
use crate::worker::RelayEnvelope;

/// Collaborator failure. Opaque to the engine beyond the message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct PortError(pub String);

/// Node affiliation levels the engine assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affiliation {
    /// May publish into the node but not reconfigure it.
    Publisher,
    /// Full control of the node.
    Owner,
}

/// Lifecycle of externally-addressable protocol nodes.
#[async_trait]
pub trait NodeAdmin: Send + Sync {
    /// Create a node and return its index. Registration commits only after
    /// this succeeds.
    async fn create_node(
        &self,
        owner_domain: &str,
        pubsub_host: &str,
        node: &str,
        owner: &str,
    ) -> Result<u64, PortError>;

    async fn set_affiliation(
        &self,
        node_index: u64,
        owner: &str,
        affiliation: Affiliation,
    ) -> Result<(), PortError>;

    async fn delete_node(&self, pubsub_host: &str, node: &str) -> Result<(), PortError>;
}

/// Publishes a rendered field list to a remote peer's node.
#[async_trait]
pub trait RemotePublisher: Send + Sync {
    async fn publish(
        &self,
        peer: &str,
        node: &str,
        fields: &[SummaryField],
    ) -> Result<(), PortError>;
}

/// Fire-and-forget link to cluster peers.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Cast a relay envelope to a peer node. No acknowledgment, no retry; a
    /// lost cast is a lost push hint.
    async fn cast(&self, node: &str, envelope: RelayEnvelope);

    /// Best-effort liveness probe used by the pruning worker.
    async fn probe(&self, node: &str) -> bool;
}

/// Node admin for deployments without a pub/sub subsystem: allocates
/// indices locally and accepts every operation.
#[derive(Debug, Default)]
pub struct NullNodeAdmin {
    next_index: AtomicU64,
}

#[async_trait]
impl NodeAdmin for NullNodeAdmin {
    async fn create_node(
        &self,
        _owner_domain: &str,
        pubsub_host: &str,
        node: &str,
        _owner: &str,
    ) -> Result<u64, PortError> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        debug!(pubsub_host = %pubsub_host, node = %node, "Created local node");
        Ok(index)
    }

    async fn set_affiliation(
        &self,
        _node_index: u64,
        _owner: &str,
        _affiliation: Affiliation,
    ) -> Result<(), PortError> {
        Ok(())
    }

    async fn delete_node(&self, pubsub_host: &str, node: &str) -> Result<(), PortError> {
        debug!(pubsub_host = %pubsub_host, node = %node, "Deleted local node");
        Ok(())
    }
}

/// Publisher that drops everything with a log line. Remote subscriptions
/// need a real transport wired by the embedder.
#[derive(Debug, Default)]
pub struct NullPublisher;

#[async_trait]
impl RemotePublisher for NullPublisher {
    async fn publish(
        &self,
        peer: &str,
        node: &str,
        fields: &[SummaryField],
    ) -> Result<(), PortError> {
        debug!(peer = %peer, node = %node, fields = fields.len(), "No remote transport; publish dropped");
        Ok(())
    }
}

/// Peer link for single-node deployments: relays are dropped, probes report
/// alive so the pruning worker stays inert.
#[derive(Debug, Default)]
pub struct NullPeerLink;

#[async_trait]
impl PeerLink for NullPeerLink {
    async fn cast(&self, node: &str, _envelope: RelayEnvelope) {
        debug!(node = %node, "No cluster transport; relay dropped");
    }

    async fn probe(&self, _node: &str) -> bool {
        true
    }
}
