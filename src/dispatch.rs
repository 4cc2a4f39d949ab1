//! Dispatch routing.
//!
//! Once an event is absorbed into a user's summary, every qualifying
//! subscription gets one dispatch: a cast to the local delivery worker, a
//! single-hop relay to a cluster peer hosting the worker, or a publish to
//! the subscriber's remote push service. Dispatch is a best-effort hint;
//! failures are logged and swallowed, never propagated.

use futures::future::join_all;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{PushError, Result};
use crate::forms::DataForm;
use crate::models::{
    bare_address, NotifyConfig, PayloadSummary, Registration, Stanza, SubscriptionKind,
    SummaryField,
};
use crate::payload::{absorb, decode_summary, render, SummaryDecode};
use crate::worker::{DispatchTask, RelayEnvelope};

impl Engine {
    /// Entry point for a store-or-notify event. Absorbs the event into the
    /// owner's pending summary and dispatches to every subscription; both
    /// happen under the owner's map entry, so concurrent events for the
    /// same owner serialize. Returns whether the summary changed.
    pub async fn handle_offline_event(
        &self,
        owner: &str,
        sender: &str,
        stanza: &Stanza,
    ) -> Result<bool> {
        let bare = bare_address(owner);

        let snapshot = self.store.with_user_mut(&bare, |user| {
            if absorb(&mut user.summary, sender, stanza) {
                Some((user.subscriptions.clone(), user.config, user.summary.clone()))
            } else {
                None
            }
        });

        let Some(Some((subscriptions, config, summary))) = snapshot else {
            // Unknown user or an event kind the aggregator ignores.
            return Ok(false);
        };

        self.store.note_event_absorbed().await;

        let mut remote_publishes = Vec::new();
        for subscription in &subscriptions {
            match &subscription.kind {
                SubscriptionKind::Local { .. } => {
                    let Some(registration) =
                        self.store.find_registration_by_node(&bare, &subscription.node)
                    else {
                        debug!(node = %subscription.node, "No registration for subscription; skipping");
                        continue;
                    };
                    let fields = render(&summary, config);
                    self.dispatch_local(fields, &registration, true).await;
                }
                SubscriptionKind::Remote { peer, .. } => {
                    // The remote service applies the user's policy itself;
                    // forward with full fidelity.
                    let fields = render(&summary, NotifyConfig::all_enabled());
                    remote_publishes.push(self.dispatch_remote(
                        peer.clone(),
                        subscription.node.clone(),
                        fields,
                    ));
                }
            }
        }
        join_all(remote_publishes).await;

        Ok(true)
    }

    /// The host delivered the queued stanzas to the owner directly; the
    /// pending summary is obsolete.
    pub async fn handle_flush(&self, owner: &str) -> Result<()> {
        let bare = bare_address(owner);
        self.store.with_user_mut(&bare, |user| {
            user.summary = PayloadSummary::default();
        });
        Ok(())
    }

    /// Entry point for a remote peer publishing back into a local node.
    /// Every registration bound to the node (normally exactly one) gets a
    /// local dispatch with relaying suppressed: an echo that relayed
    /// outward again could loop between peers.
    pub async fn incoming_notification(&self, node: &str, submitted: &[DataForm]) -> Result<()> {
        let registrations = self.store.registrations_for_node(node);
        if registrations.is_empty() {
            return Err(PushError::ItemNotFound);
        }

        self.store.note_remote_notification().await;

        for registration in &registrations {
            match decode_summary(submitted) {
                SummaryDecode::Absent => {
                    // Bare wake-up: no structured fields to forward.
                    self.dispatch_local(Vec::new(), registration, false).await;
                }
                SummaryDecode::Summary(summary) => {
                    let fields = render(&summary, NotifyConfig::all_enabled());
                    self.dispatch_local(fields, registration, false).await;
                }
                SummaryDecode::Malformed => {
                    warn!(node = %node, "Malformed summary form; skipping dispatch");
                }
            }
        }

        Ok(())
    }

    /// Hand a rendered payload to the backend's delivery worker, either on
    /// this node or via a single-hop relay to a cluster peer. No retry, no
    /// fallback chaining: a lost cast is a lost hint.
    pub(crate) async fn dispatch_local(
        &self,
        fields: Vec<SummaryField>,
        registration: &Registration,
        allow_relay: bool,
    ) {
        let Some(backend) = self.registry.resolve_id(&registration.backend_id) else {
            warn!("Backend gone; dropping dispatch");
            return;
        };

        let task = DispatchTask {
            fields,
            token: registration.token.clone(),
            app_id: registration.app_id.clone(),
            silent: registration.silent,
            owner: registration.owner.clone(),
            timestamp: registration.timestamp,
        };

        if backend.cluster_nodes.contains(&self.node_id) {
            if self.registry.cast(&backend.worker_addr, task) {
                self.store.note_dispatch().await;
            }
            return;
        }

        if !allow_relay {
            debug!("No local worker and relaying suppressed; dropping dispatch");
            return;
        }

        let Some(peer) = pick_node(&backend.cluster_nodes) else {
            warn!("Backend has no live cluster nodes; dropping dispatch");
            return;
        };

        debug!(peer = %peer, "Relaying dispatch to cluster peer");
        self.peer_link
            .cast(
                &peer,
                RelayEnvelope {
                    backend_id: backend.id.clone(),
                    task,
                },
            )
            .await;
        self.store.note_relay().await;
    }

    /// Entry point for a relay envelope received from a cluster peer.
    /// Delivered to the local worker only; a relayed relay would hop
    /// forever between nodes that both lack the worker.
    pub async fn handle_relay(&self, envelope: RelayEnvelope) {
        let Some(backend) = self.registry.resolve_id(&envelope.backend_id) else {
            warn!("Relay for unknown backend; dropping");
            return;
        };
        if self.registry.cast(&backend.worker_addr, envelope.task) {
            self.store.note_dispatch().await;
        }
    }

    async fn dispatch_remote(&self, peer: String, node: String, fields: Vec<SummaryField>) {
        if let Err(e) = self.publisher.publish(&peer, &node, &fields).await {
            debug!(peer = %peer, error = %e, "Remote publish failed; hint lost");
        } else {
            self.store.note_dispatch().await;
        }
    }
}

/// Uniform random pick from the cluster-node set.
fn pick_node(nodes: &std::collections::BTreeSet<String>) -> Option<String> {
    if nodes.is_empty() {
        return None;
    }
    let rng = SystemRandom::new();
    let mut buf = [0u8; 8];
    let index = if rng.fill(&mut buf).is_ok() {
        (u64::from_be_bytes(buf) as usize) % nodes.len()
    } else {
        0
    };
    nodes.iter().nth(index).cloned()
}
