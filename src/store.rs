//! In-memory push state store.
//!
//! Registrations and per-user push state are keyed by owner; every mutation
//! for one owner goes through that owner's map entry, so concurrent
//! operations against the same owner serialize and readers never observe a
//! half-applied update. Multi-step transactions that must span an external
//! call (node allocation during registration) additionally hold the owner's
//! async lock so nothing commits before the external step succeeds.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};

use crate::models::{BareAddress, NotifyConfig, PayloadSummary, PushUser, Registration};

/// Thread-safe store for registrations and per-user push state.
#[derive(Clone, Default)]
pub struct Store {
    /// Push state per owner.
    users: Arc<DashMap<BareAddress, PushUser>>,

    /// Device registrations per owner.
    registrations: Arc<DashMap<BareAddress, Vec<Registration>>>,

    /// Per-owner transaction locks for operations spanning external calls.
    owner_locks: Arc<DashMap<BareAddress, Arc<Mutex<()>>>>,

    /// Aggregate metrics (no PII, no per-user data).
    metrics: Arc<RwLock<StoreMetrics>>,
}

/// Aggregate metrics (no PII).
#[derive(Debug, Default, Clone)]
pub struct StoreMetrics {
    pub total_registrations: u64,
    pub total_unregistrations: u64,
    pub total_events_absorbed: u64,
    pub total_dispatches: u64,
    pub total_relays: u64,
    pub total_remote_notifications: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction lock for one owner. Held across registration transactions
    /// whose commit depends on an external call.
    pub fn owner_lock(&self, owner: &str) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // === Registrations ===

    pub fn find_registration(&self, owner: &str, device_id: &str) -> Option<Registration> {
        self.registrations
            .get(owner)
            .and_then(|entry| entry.iter().find(|r| r.device_id == device_id).cloned())
    }

    pub fn find_registration_by_node(&self, owner: &str, node: &str) -> Option<Registration> {
        self.registrations
            .get(owner)
            .and_then(|entry| entry.iter().find(|r| r.node == node).cloned())
    }

    /// All registrations bound to a node, across owners. Normally at most
    /// one; the scan tolerates more.
    pub fn registrations_for_node(&self, node: &str) -> Vec<Registration> {
        self.registrations
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| r.node == node)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn registrations_for_owner(&self, owner: &str) -> Vec<Registration> {
        self.registrations
            .get(owner)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Insert or replace the registration for (owner, device).
    pub fn put_registration(&self, registration: Registration) {
        let mut entry = self
            .registrations
            .entry(registration.owner.clone())
            .or_default();
        let regs = entry.value_mut();
        regs.retain(|r| r.device_id != registration.device_id);
        regs.push(registration);
    }

    /// Remove the registration for (owner, device), returning it.
    pub fn remove_registration(&self, owner: &str, device_id: &str) -> Option<Registration> {
        let mut entry = self.registrations.get_mut(owner)?;
        let regs = entry.value_mut();
        let index = regs.iter().position(|r| r.device_id == device_id)?;
        let removed = regs.remove(index);
        drop(entry);
        self.registrations.remove_if(owner, |_, v| v.is_empty());
        Some(removed)
    }

    /// Remove every registration for `owner` whose node is in `nodes`,
    /// atomically, returning the removed records.
    pub fn remove_registrations_by_nodes(
        &self,
        owner: &str,
        nodes: &[String],
    ) -> Vec<Registration> {
        let Some(mut entry) = self.registrations.get_mut(owner) else {
            return Vec::new();
        };
        let regs = entry.value_mut();
        let mut removed = Vec::new();
        regs.retain(|r| {
            if nodes.contains(&r.node) {
                removed.push(r.clone());
                false
            } else {
                true
            }
        });
        drop(entry);
        self.registrations.remove_if(owner, |_, v| v.is_empty());
        removed
    }

    // === Push users ===

    pub fn get_user(&self, owner: &str) -> Option<PushUser> {
        self.users.get(owner).map(|entry| entry.value().clone())
    }

    /// Run a closure against the owner's push state, if it exists. The map
    /// entry stays locked for the duration, so the read-modify-write is
    /// atomic with respect to concurrent events for the same owner.
    pub fn with_user_mut<T>(&self, owner: &str, f: impl FnOnce(&mut PushUser) -> T) -> Option<T> {
        self.users.get_mut(owner).map(|mut entry| f(entry.value_mut()))
    }

    /// Run a closure against the owner's push state, creating it first if
    /// needed. The closure receives whether the record was just created.
    pub fn with_user_upsert<T>(
        &self,
        owner: &str,
        default_config: NotifyConfig,
        f: impl FnOnce(&mut PushUser, bool) -> T,
    ) -> T {
        let mut created = false;
        let mut entry = self.users.entry(owner.to_string()).or_insert_with(|| {
            created = true;
            PushUser {
                subscriptions: Vec::new(),
                config: default_config,
                summary: PayloadSummary::default(),
            }
        });
        f(entry.value_mut(), created)
    }

    // === Metrics ===

    pub async fn note_registration(&self) {
        self.metrics.write().await.total_registrations += 1;
    }

    pub async fn note_unregistration(&self, count: u64) {
        self.metrics.write().await.total_unregistrations += count;
    }

    pub async fn note_event_absorbed(&self) {
        self.metrics.write().await.total_events_absorbed += 1;
    }

    pub async fn note_dispatch(&self) {
        self.metrics.write().await.total_dispatches += 1;
    }

    pub async fn note_relay(&self) {
        self.metrics.write().await.total_relays += 1;
    }

    pub async fn note_remote_notification(&self) {
        self.metrics.write().await.total_remote_notifications += 1;
    }

    pub async fn metrics(&self) -> StoreMetrics {
        self.metrics.read().await.clone()
    }
}
