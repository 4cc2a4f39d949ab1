//! Backend registry.
//!
//! One entry per configured push backend, keyed by an identity hash over
//! the backend's identifying tuple. Adding a backend that already exists
//! merges its cluster-node set instead of duplicating the entry; backends
//! are never deleted, only their node sets shrink through liveness pruning.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use ring::digest::{digest, SHA256};
use tracing::{error, info};

use crate::config::{BackendDescriptor, ProviderCredentials};
use crate::models::{Backend, BackendId, ProviderType};
use crate::worker::{DispatchTask, WorkerPool};

#[derive(Clone)]
pub struct BackendRegistry {
    backends: Arc<DashMap<BackendId, Backend>>,
    workers: Arc<WorkerPool>,
}

impl BackendRegistry {
    pub fn new(workers: Arc<WorkerPool>) -> Self {
        Self {
            backends: Arc::new(DashMap::new()),
            workers,
        }
    }

    /// Identity hash over the identifying tuple.
    pub fn backend_id(
        register_host: &str,
        pubsub_host: &str,
        provider: ProviderType,
        app_name: &str,
    ) -> BackendId {
        let material = format!("{register_host}\n{pubsub_host}\n{provider}\n{app_name}");
        hex::encode(digest(&SHA256, material.as_bytes()).as_ref())
    }

    /// Insert a backend, or merge its cluster-node set into an existing
    /// entry with the same identity. Ensures a delivery worker exists for
    /// the backend's credential set either way.
    pub fn add_or_merge(
        &self,
        register_host: &str,
        pubsub_host: &str,
        provider: ProviderType,
        app_name: &str,
        cluster_nodes: BTreeSet<String>,
        credentials: &ProviderCredentials,
    ) -> Backend {
        let id = Self::backend_id(register_host, pubsub_host, provider, app_name);
        let worker_addr = self.workers.ensure_worker(provider, credentials);

        let mut entry = self.backends.entry(id.clone()).or_insert_with(|| Backend {
            id: id.clone(),
            register_host: register_host.to_lowercase(),
            pubsub_host: pubsub_host.to_lowercase(),
            provider,
            app_name: app_name.to_string(),
            cluster_nodes: BTreeSet::new(),
            worker_addr,
        });
        entry.value_mut().cluster_nodes.extend(cluster_nodes);
        entry.value().clone()
    }

    /// Populate from configuration. Unknown provider types are logged and
    /// skipped; the process keeps running with the backends that parsed.
    pub fn populate(&self, node_id: &str, descriptors: &[BackendDescriptor]) {
        for descriptor in descriptors {
            let Some(provider) = ProviderType::parse(&descriptor.provider) else {
                error!(
                    provider = %descriptor.provider,
                    register_host = %descriptor.register_host,
                    "Unknown provider type; skipping backend"
                );
                continue;
            };

            let mut nodes = BTreeSet::new();
            nodes.insert(node_id.to_string());

            let backend = self.add_or_merge(
                &descriptor.register_host,
                &descriptor.pubsub_host,
                provider,
                &descriptor.app_name,
                nodes,
                &descriptor.credentials(),
            );
            info!(
                register_host = %backend.register_host,
                provider = %backend.provider,
                app = %backend.app_name,
                worker = %backend.worker_addr,
                "Registered push backend"
            );
        }
    }

    pub fn resolve(&self, register_host: &str, provider: ProviderType) -> Option<Backend> {
        let host = register_host.to_lowercase();
        self.backends
            .iter()
            .find(|b| b.register_host == host && b.provider == provider)
            .map(|b| b.value().clone())
    }

    pub fn resolve_id(&self, id: &str) -> Option<Backend> {
        self.backends.get(id).map(|b| b.value().clone())
    }

    pub fn list_by_register_host(&self, register_host: &str) -> Vec<Backend> {
        let host = register_host.to_lowercase();
        self.backends
            .iter()
            .filter(|b| b.register_host == host)
            .map(|b| b.value().clone())
            .collect()
    }

    /// Whether a host is one of our backends' pubsub hosts. Determines the
    /// local/remote tag of new subscriptions.
    pub fn is_local_pubsub_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.backends.iter().any(|b| b.pubsub_host == host)
    }

    pub fn all(&self) -> Vec<Backend> {
        self.backends.iter().map(|b| b.value().clone()).collect()
    }

    /// Remove a cluster node from a backend's node set. Used by liveness
    /// pruning when a peer stops answering probes.
    pub fn prune_node(&self, backend_id: &str, node: &str) -> bool {
        match self.backends.get_mut(backend_id) {
            Some(mut backend) => backend.cluster_nodes.remove(node),
            None => false,
        }
    }

    /// Cast a dispatch to a backend's delivery worker mailbox.
    pub fn cast(&self, worker_addr: &str, task: DispatchTask) -> bool {
        self.workers.cast(worker_addr, task)
    }
}
