//! Engine aggregate.
//!
//! Bundles the store, the backend registry and the collaborator ports into
//! the object the entry points hang off. The operation implementations
//! live in `registration.rs`, `subscription.rs` and `dispatch.rs`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::NotifyConfig;
use crate::ports::{NodeAdmin, PeerLink, RemotePublisher};
use crate::registry::BackendRegistry;
use crate::store::Store;
use crate::worker::TokenFeedback;

pub struct Engine {
    pub(crate) store: Store,
    pub(crate) registry: BackendRegistry,
    pub(crate) node_admin: Arc<dyn NodeAdmin>,
    pub(crate) publisher: Arc<dyn RemotePublisher>,
    pub(crate) peer_link: Arc<dyn PeerLink>,
    pub(crate) defaults: NotifyConfig,
    pub(crate) node_id: String,
}

impl Engine {
    pub fn new(
        store: Store,
        registry: BackendRegistry,
        node_admin: Arc<dyn NodeAdmin>,
        publisher: Arc<dyn RemotePublisher>,
        peer_link: Arc<dyn PeerLink>,
        defaults: NotifyConfig,
        node_id: String,
    ) -> Self {
        Self {
            store,
            registry,
            node_admin,
            publisher,
            peer_link,
            defaults,
            node_id,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Start consuming delivery-worker token feedback. Each feedback entry
    /// names a registration version the provider declared dead; removal
    /// goes through the normal unregister path.
    pub fn start_feedback_task(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<TokenFeedback>) {
        let engine = self.clone();
        tokio::spawn(async move {
            info!("Started token feedback task");
            while let Some(feedback) = rx.recv().await {
                if let Err(e) = engine
                    .delete_registration_by_version(&feedback.owner, feedback.timestamp)
                    .await
                {
                    warn!(error = %e, "Failed to remove registration from token feedback");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::testutil::{engine, REGISTER_HOST};
    use crate::models::ProviderType;
    use crate::worker::TokenFeedback;

    #[tokio::test]
    async fn token_feedback_removes_the_matching_registration() {
        let engine = engine();
        engine
            .register(
                "alice@example.com/phone1",
                REGISTER_HOST,
                ProviderType::Ubuntu,
                "token-1",
                Some("phone1"),
                "Phone",
                "com.example.chat",
                false,
            )
            .await
            .unwrap();
        let registration = engine
            .store()
            .find_registration("alice@example.com", "phone1")
            .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        engine.start_feedback_task(rx);
        tx.send(TokenFeedback {
            owner: registration.owner.clone(),
            timestamp: registration.timestamp,
        })
        .unwrap();

        // The feedback task runs concurrently; give it a moment.
        for _ in 0..50 {
            if engine
                .store()
                .find_registration("alice@example.com", "phone1")
                .is_none()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(engine
            .store()
            .find_registration("alice@example.com", "phone1")
            .is_none());
    }
}
