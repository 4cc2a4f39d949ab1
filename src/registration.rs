//! Device registration lifecycle.
//!
//! Registration binds one device to one backend and allocates the
//! externally-addressable node remote peers publish into. The whole
//! operation is a single transaction under the owner's lock: the record
//! commits only after the node exists, and concurrent registrations for the
//! same owner serialize.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{PushError, Result};
use crate::models::{
    address_domain, address_resource, bare_address, ProviderType, Registration,
};
use crate::ports::Affiliation;

/// What a successful registration returns to the device.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub pubsub_host: String,
    pub node: String,
    pub secret: String,
}

impl Engine {
    /// Register a device, or refresh an existing registration in place.
    /// Re-registration preserves the node identifier and secret so a device
    /// rotating its provider token keeps its delivery channel.
    #[allow(clippy::too_many_arguments)]
    pub async fn register(
        &self,
        owner: &str,
        register_host: &str,
        provider: ProviderType,
        token: &str,
        device_id: Option<&str>,
        device_name: &str,
        app_id: &str,
        silent: bool,
    ) -> Result<RegisterOutcome> {
        let backend = self
            .registry
            .resolve(register_host, provider)
            .ok_or(PushError::NoBackend)?;

        let bare = bare_address(owner);
        let device_id = resolve_device_id(owner, device_id)?;

        let lock = self.store.owner_lock(&bare);
        let _guard = lock.lock().await;

        let timestamp = Utc::now().timestamp_millis();
        let existing = self.store.find_registration(&bare, &device_id);

        let (node, secret) = match &existing {
            Some(prev) => (prev.node.clone(), prev.secret.clone()),
            None => {
                let node = Uuid::new_v4().simple().to_string();
                let secret = generate_secret();

                // Nothing commits unless the external node exists with
                // publish-only permission for the owner.
                let index = self
                    .node_admin
                    .create_node(&address_domain(owner), &backend.pubsub_host, &node, &bare)
                    .await
                    .map_err(|e| PushError::Internal(e.to_string()))?;
                if let Err(e) = self
                    .node_admin
                    .set_affiliation(index, &bare, Affiliation::Publisher)
                    .await
                {
                    let _ = self.node_admin.delete_node(&backend.pubsub_host, &node).await;
                    return Err(PushError::Internal(e.to_string()));
                }

                (node, secret)
            }
        };

        self.store.put_registration(Registration {
            owner: bare.clone(),
            device_id: device_id.clone(),
            node: node.clone(),
            device_name: device_name.to_string(),
            token: token.to_string(),
            secret: secret.clone(),
            app_id: app_id.to_string(),
            backend_id: backend.id.clone(),
            silent,
            timestamp,
        });

        if existing.is_some() {
            debug!(device = %device_id, "Refreshed registration");
        } else {
            self.store.note_registration().await;
            info!(register_host = %backend.register_host, "Registered device");
        }

        Ok(RegisterOutcome {
            pubsub_host: backend.pubsub_host,
            node,
            secret,
        })
    }

    /// Unregister one device (empty `node_ids`) or every registration whose
    /// node is listed. Returns the removed node identifiers for the listed
    /// form, nothing for the single-device form.
    pub async fn unregister(
        &self,
        owner: &str,
        device_id: Option<&str>,
        node_ids: &[String],
    ) -> Result<Option<Vec<String>>> {
        let bare = bare_address(owner);
        let lock = self.store.owner_lock(&bare);
        let _guard = lock.lock().await;

        if node_ids.is_empty() {
            let device_id = resolve_device_id(owner, device_id)?;
            let registration = self
                .store
                .find_registration(&bare, &device_id)
                .ok_or(PushError::ItemNotFound)?;

            self.teardown_node(&registration).await;
            self.store.remove_registration(&bare, &device_id);
            self.store.note_unregistration(1).await;

            info!("Unregistered device");
            return Ok(None);
        }

        let removed = self.store.remove_registrations_by_nodes(&bare, node_ids);
        if removed.is_empty() {
            return Err(PushError::ItemNotFound);
        }

        for registration in &removed {
            self.teardown_node(registration).await;
        }
        self.store.note_unregistration(removed.len() as u64).await;

        let nodes = removed.into_iter().map(|r| r.node).collect();
        info!("Unregistered devices by node list");
        Ok(Some(nodes))
    }

    /// Compensating removal keyed by an exact registration version. A
    /// mismatching timestamp means the registration was re-issued since the
    /// failure signal and the signal is stale; nothing happens.
    pub async fn delete_registration_by_version(&self, owner: &str, timestamp: i64) -> Result<()> {
        let bare = bare_address(owner);
        let matched = self
            .store
            .registrations_for_owner(&bare)
            .into_iter()
            .find(|r| r.timestamp == timestamp);

        let Some(registration) = matched else {
            debug!("No registration matches version; ignoring stale signal");
            return Ok(());
        };

        match self
            .unregister(&bare, Some(&registration.device_id), &[])
            .await
        {
            Ok(_) => Ok(()),
            // Raced with an explicit unregister; the end state is the same.
            Err(PushError::ItemNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Best-effort external node teardown. A vanished backend only skips
    /// the external step; the local record is removed regardless.
    async fn teardown_node(&self, registration: &Registration) {
        match self.registry.resolve_id(&registration.backend_id) {
            Some(backend) => {
                if let Err(e) = self
                    .node_admin
                    .delete_node(&backend.pubsub_host, &registration.node)
                    .await
                {
                    warn!(error = %e, "Failed to delete node; continuing");
                }
            }
            None => {
                warn!("Backend gone; skipping external node teardown");
            }
        }
    }
}

fn resolve_device_id(owner: &str, device_id: Option<&str>) -> Result<String> {
    if let Some(id) = device_id {
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    address_resource(owner)
        .map(str::to_string)
        .ok_or(PushError::NotAcceptable("device id or resource required"))
}

fn generate_secret() -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 24];
    if rng.fill(&mut bytes).is_err() {
        return Uuid::new_v4().simple().to_string();
    }
    URL_SAFE_NO_PAD.encode(bytes)
}
