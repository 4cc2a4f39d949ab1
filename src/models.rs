//! Data models for the push gateway.
//!
//! Domain records are deliberately small: the gateway never sees message
//! plaintext beyond the summary fields a user opted into, and device tokens
//! are treated as opaque strings.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::forms::DataForm;

/// Bare user address (`user@domain`, lowercased). Opaque to the gateway.
pub type BareAddress = String;

/// Backend identity: hex-encoded SHA-256 over the identifying tuple.
pub type BackendId = String;

/// Saturating cap for summary counters. Incrementing past the cap wraps the
/// counter to 1, never to 0.
pub const COUNTER_CAP: u32 = u32::MAX;

// ============================================================================
// Addresses
// ============================================================================

/// Strip the resource part and lowercase: `Alice@Example.COM/phone` ->
/// `alice@example.com`.
pub fn bare_address(address: &str) -> String {
    let bare = address.split('/').next().unwrap_or(address);
    bare.to_lowercase()
}

/// Resource part of a full address, if any.
pub fn address_resource(address: &str) -> Option<&str> {
    let (_, resource) = address.split_once('/')?;
    if resource.is_empty() {
        None
    } else {
        Some(resource)
    }
}

/// Domain part of an address (everything after `@`, or the whole bare
/// address when there is no local part).
pub fn address_domain(address: &str) -> String {
    let bare = bare_address(address);
    match bare.rsplit_once('@') {
        Some((_, domain)) => domain.to_string(),
        None => bare,
    }
}

// ============================================================================
// Providers and backends
// ============================================================================

/// Supported push provider types. Only APNs has a full delivery worker;
/// the remaining types are reserved and their workers drop dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Apns,
    Fcm,
    Mozilla,
    Ubuntu,
    Wns,
}

impl ProviderType {
    /// Parse a configuration string. Returns `None` for unknown types so the
    /// registry can reject them with a log line instead of a panic.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "apns" => Some(Self::Apns),
            "fcm" => Some(Self::Fcm),
            "mozilla" => Some(Self::Mozilla),
            "ubuntu" => Some(Self::Ubuntu),
            "wns" => Some(Self::Wns),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apns => "apns",
            Self::Fcm => "fcm",
            Self::Mozilla => "mozilla",
            Self::Ubuntu => "ubuntu",
            Self::Wns => "wns",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured integration with one push provider for one application.
#[derive(Debug, Clone)]
pub struct Backend {
    /// Identity hash over (register host, pubsub host, provider, app name).
    pub id: BackendId,

    /// Host clients register devices against.
    pub register_host: String,

    /// Host that owns the protocol nodes for this backend.
    pub pubsub_host: String,

    /// Provider integration type.
    pub provider: ProviderType,

    /// Application name this backend serves.
    pub app_name: String,

    /// Cluster nodes currently hosting a live worker for this backend.
    pub cluster_nodes: BTreeSet<String>,

    /// Logical worker name used for dispatch.
    pub worker_addr: String,
}

// ============================================================================
// Registrations
// ============================================================================

/// A single device's binding to a backend.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Owning user (bare address).
    pub owner: BareAddress,

    /// Device identifier (unique per owner).
    pub device_id: String,

    /// Protocol node identifier addressing this registration's channel.
    pub node: String,

    /// Human-readable device name.
    pub device_name: String,

    /// Provider device token (opaque).
    pub token: String,

    /// Shared secret presented by remote peers publishing into this node.
    pub secret: String,

    /// Application identifier supplied by the device.
    pub app_id: String,

    /// Owning backend identity.
    pub backend_id: BackendId,

    /// Deliver as silent (background) push.
    pub silent: bool,

    /// Version stamp (UTC epoch milliseconds). Doubles as the
    /// optimistic-concurrency token for delete-by-version.
    pub timestamp: i64,
}

// ============================================================================
// Subscriptions and users
// ============================================================================

/// Where a subscription's notifications are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// The push service shares this gateway's domain; dispatch goes to a
    /// local delivery worker.
    Local { pubsub_host: String },

    /// The subscriber registered with an external push service; dispatch is
    /// published to the remote peer's node.
    Remote {
        /// Lowercased full peer address.
        peer: String,
        /// Shared secret supplied at enable time, if any.
        secret: Option<String>,
    },
}

/// A user's opt-in for push on one resource and protocol node.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub resource: String,
    pub node: String,
    pub kind: SubscriptionKind,
}

/// Which summary fields are included in rendered payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyConfig {
    pub include_senders: bool,
    pub include_message_count: bool,
    pub include_subscription_count: bool,
    pub include_message_bodies: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            include_senders: false,
            include_message_count: true,
            include_subscription_count: true,
            include_message_bodies: false,
        }
    }
}

impl NotifyConfig {
    /// Full-fidelity configuration, used when forwarding a summary that was
    /// itself received from a remote peer.
    pub fn all_enabled() -> Self {
        Self {
            include_senders: true,
            include_message_count: true,
            include_subscription_count: true,
            include_message_bodies: true,
        }
    }
}

/// Partial configuration change requested through an enable form. Absent
/// fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub include_senders: Option<bool>,
    pub include_message_count: Option<bool>,
    pub include_subscription_count: Option<bool>,
    pub include_message_bodies: Option<bool>,
}

/// Per-user push state: active subscriptions, content configuration and the
/// pending, not-yet-delivered summary.
#[derive(Debug, Clone)]
pub struct PushUser {
    pub subscriptions: Vec<Subscription>,
    pub config: NotifyConfig,
    pub summary: PayloadSummary,
}

// ============================================================================
// Payload summaries
// ============================================================================

/// Aggregated pending-event state for a user. Merged in place, reset when
/// queued stanzas are flushed to the owner directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSummary {
    pub message_count: u32,
    pub last_message_sender: Option<String>,
    pub last_message_body: Option<String>,
    pub pending_subscription_count: u32,
    pub last_subscription_sender: Option<String>,
}

impl PayloadSummary {
    pub fn is_empty(&self) -> bool {
        self.message_count == 0 && self.pending_subscription_count == 0
    }
}

/// One rendered key-value field of a payload summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryField {
    pub key: String,
    pub value: String,
}

impl SummaryField {
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Inbound events
// ============================================================================

/// A store-or-notify event forwarded by the host server. Only the parts the
/// aggregator cares about are modelled; everything else in the original
/// stanza stays with the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Stanza {
    /// A chat message. Counts even without a body.
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },

    /// A presence update. Only `type = "subscribe"` is aggregated.
    Presence {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        presence_type: Option<String>,
    },

    /// Anything else. Ignored by the aggregator.
    #[serde(other)]
    Other,
}

// === API Request/Response Models ===

/// Register device request
#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    /// Full owner address; the resource doubles as the default device id.
    pub owner: String,
    pub register_host: String,
    #[serde(rename = "type")]
    pub provider: String,
    pub token: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_name: String,
    pub app_id: String,
    #[serde(default)]
    pub silent: bool,
}

/// Register device response
#[derive(Debug, Serialize)]
pub struct RegisterDeviceResponse {
    pub pubsub_host: String,
    pub node: String,
    pub secret: String,
}

/// Unregister request
#[derive(Debug, Deserialize)]
pub struct UnregisterRequest {
    pub owner: String,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Node identifiers to remove. Empty means "the resolved device only".
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Unregister response
#[derive(Debug, Serialize)]
pub struct UnregisterResponse {
    pub success: bool,
    /// Node identifiers actually removed (absent for the single-device form).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<String>>,
}

/// Enable subscription request
#[derive(Debug, Deserialize)]
pub struct EnableRequest {
    /// Full owner address (resource required).
    pub owner: String,
    /// Push service address notifications are published to.
    pub service: String,
    #[serde(default)]
    pub node: Option<String>,
    /// Publish-options / configuration forms, in submission order.
    #[serde(default)]
    pub forms: Vec<DataForm>,
}

/// Enable subscription response
#[derive(Debug, Serialize)]
pub struct EnableResponse {
    pub success: bool,
    /// Options the server adjusted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted: Option<DataForm>,
}

/// Disable subscription request
#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub owner: String,
    pub service: String,
    #[serde(default)]
    pub node: Option<String>,
}

/// Disable subscription response
#[derive(Debug, Serialize)]
pub struct DisableResponse {
    pub success: bool,
}

/// Store-or-notify event submission
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    /// Event owner (bare address).
    pub owner: String,
    /// Originating sender address.
    pub sender: String,
    pub stanza: Stanza,
}

/// Event submission response
#[derive(Debug, Serialize)]
pub struct EventResponse {
    /// Whether the event changed the pending summary and was dispatched.
    pub absorbed: bool,
}

/// Flush notification (owner received queued stanzas directly)
#[derive(Debug, Deserialize)]
pub struct FlushRequest {
    pub owner: String,
}

/// Flush response
#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub success: bool,
}

/// Remote notification published back into a local node
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub forms: Vec<DataForm>,
}

/// Remote notification response
#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub success: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_strips_resource_and_lowercases() {
        assert_eq!(bare_address("Alice@Example.COM/Phone"), "alice@example.com");
        assert_eq!(bare_address("alice@example.com"), "alice@example.com");
        assert_eq!(bare_address("push.example.com"), "push.example.com");
    }

    #[test]
    fn address_resource_handles_missing_and_empty() {
        assert_eq!(address_resource("alice@example.com/phone"), Some("phone"));
        assert_eq!(address_resource("alice@example.com"), None);
        assert_eq!(address_resource("alice@example.com/"), None);
    }

    #[test]
    fn address_domain_works_with_and_without_localpart() {
        assert_eq!(address_domain("alice@example.com/phone"), "example.com");
        assert_eq!(address_domain("push.example.com"), "push.example.com");
    }

    #[test]
    fn provider_type_parses_known_and_rejects_unknown() {
        assert_eq!(ProviderType::parse("apns"), Some(ProviderType::Apns));
        assert_eq!(ProviderType::parse("ubuntu"), Some(ProviderType::Ubuntu));
        assert_eq!(ProviderType::parse("pigeon"), None);
    }

    #[test]
    fn stanza_deserializes_unknown_kinds_as_other() {
        let stanza: Stanza = serde_json::from_str(r#"{"kind":"iq"}"#).unwrap();
        assert!(matches!(stanza, Stanza::Other));

        let stanza: Stanza =
            serde_json::from_str(r#"{"kind":"message","body":"hi"}"#).unwrap();
        assert!(matches!(stanza, Stanza::Message { body: Some(b) } if b == "hi"));
    }
}
