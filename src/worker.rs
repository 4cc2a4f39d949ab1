//! Delivery worker pool.
//!
//! One long-lived worker task per (provider type, credential set); backends
//! sharing a credential set share a worker so the gateway keeps a single
//! connection per provider account. Workers receive dispatches over an
//! unbounded mailbox; the cast never blocks and never awaits a reply.

use std::sync::Arc;

use dashmap::DashMap;
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::apns;
use crate::config::ProviderCredentials;
use crate::models::{ProviderType, SummaryField};

/// One dispatch handed to a delivery worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTask {
    /// Rendered summary fields (may be empty for a bare wake-up push).
    pub fields: Vec<SummaryField>,

    /// Provider device token.
    pub token: String,

    /// Application identifier (APNs topic).
    pub app_id: String,

    /// Deliver as a silent background push.
    pub silent: bool,

    /// Registration owner, quoted back on invalid-token feedback.
    pub owner: String,

    /// Registration version stamp, quoted back on invalid-token feedback.
    pub timestamp: i64,
}

/// Dispatch envelope relayed to a cluster peer that hosts the live worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub backend_id: String,
    pub task: DispatchTask,
}

/// Out-of-band worker feedback: the provider rejected the token, so the
/// matching registration version should be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFeedback {
    pub owner: String,
    pub timestamp: i64,
}

/// Pool of provider delivery workers, keyed by logical worker address.
pub struct WorkerPool {
    /// Worker mailboxes by worker address.
    mailboxes: DashMap<String, mpsc::UnboundedSender<DispatchTask>>,

    /// Credential fingerprint -> worker address, for dedup.
    by_credentials: DashMap<String, String>,

    /// Feedback channel shared by all workers.
    feedback: mpsc::UnboundedSender<TokenFeedback>,
}

impl WorkerPool {
    pub fn new(feedback: mpsc::UnboundedSender<TokenFeedback>) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: DashMap::new(),
            by_credentials: DashMap::new(),
            feedback,
        })
    }

    /// Ensure a worker exists for (provider, credentials) and return its
    /// address. Repeated calls with equal credentials reuse the worker.
    pub fn ensure_worker(
        &self,
        provider: ProviderType,
        credentials: &ProviderCredentials,
    ) -> String {
        let fingerprint = credential_fingerprint(provider, credentials);

        if let Some(existing) = self.by_credentials.get(&fingerprint) {
            return existing.clone();
        }

        let worker_addr = format!("{provider}/{fingerprint}");
        let (tx, rx) = mpsc::unbounded_channel();

        let creds = credentials.clone();
        let feedback = self.feedback.clone();
        let addr = worker_addr.clone();
        tokio::spawn(async move {
            match provider {
                ProviderType::Apns => apns::run_worker(&addr, creds, rx, feedback).await,
                other => run_stub_worker(&addr, other, rx).await,
            }
        });

        self.mailboxes.insert(worker_addr.clone(), tx);
        self.by_credentials.insert(fingerprint, worker_addr.clone());

        debug!(worker = %worker_addr, "Scheduled delivery worker");
        worker_addr
    }

    /// Cast a dispatch to a worker's mailbox. Fire-and-forget; a missing or
    /// stopped worker loses the dispatch.
    pub fn cast(&self, worker_addr: &str, task: DispatchTask) -> bool {
        match self.mailboxes.get(worker_addr) {
            Some(tx) => {
                if tx.send(task).is_err() {
                    warn!(worker = %worker_addr, "Worker mailbox closed; dispatch lost");
                    false
                } else {
                    true
                }
            }
            None => {
                warn!(worker = %worker_addr, "No such worker; dispatch lost");
                false
            }
        }
    }
}

/// Worker loop for reserved provider types: accepts dispatches and drops
/// them with a log line.
async fn run_stub_worker(
    worker_addr: &str,
    provider: ProviderType,
    mut rx: mpsc::UnboundedReceiver<DispatchTask>,
) {
    debug!(worker = %worker_addr, provider = %provider, "Started stub delivery worker");
    while let Some(task) = rx.recv().await {
        debug!(
            worker = %worker_addr,
            provider = %provider,
            fields = task.fields.len(),
            "Provider not implemented; dropping dispatch"
        );
    }
}

/// Short stable fingerprint of a credential set.
fn credential_fingerprint(provider: ProviderType, credentials: &ProviderCredentials) -> String {
    let material = format!(
        "{}\n{}\n{}\n{}\n{}",
        provider,
        credentials.team_id.as_deref().unwrap_or(""),
        credentials.key_id.as_deref().unwrap_or(""),
        credentials.key_path.as_deref().unwrap_or(""),
        credentials.sandbox,
    );
    let hash = digest(&SHA256, material.as_bytes());
    hex::encode(&hash.as_ref()[..8])
}
