//! Configuration for the push gateway.
//!
//! All configuration is loaded from environment variables once at startup.
//! Backend descriptors arrive as a JSON array in `BACKENDS`; they are not
//! re-validated at runtime. No secrets are logged.

use std::time::Duration;

use serde::Deserialize;
use tracing::error;

use crate::models::NotifyConfig;

/// Provider credential set. Worker scheduling deduplicates on equality of
/// these fields, so backends sharing an account share one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    /// Provider team / account identifier.
    pub team_id: Option<String>,

    /// Signing key identifier.
    pub key_id: Option<String>,

    /// Path to the provider signing key (.p8 file for APNs).
    pub key_path: Option<String>,

    /// Use the provider's sandbox environment.
    pub sandbox: bool,
}

impl ProviderCredentials {
    /// Whether enough material is present to start a real provider client.
    pub fn configured(&self) -> bool {
        self.team_id.is_some() && self.key_id.is_some() && self.key_path.is_some()
    }
}

/// One configured push backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendDescriptor {
    /// Host clients register devices against.
    pub register_host: String,

    /// Host owning the protocol nodes for this backend.
    pub pubsub_host: String,

    /// Provider type string; unknown values are rejected at startup.
    #[serde(rename = "type")]
    pub provider: String,

    /// Application name this backend serves.
    pub app_name: String,

    #[serde(default)]
    pub team_id: Option<String>,

    #[serde(default)]
    pub key_id: Option<String>,

    #[serde(default)]
    pub key_path: Option<String>,

    /// Default to sandbox for safety.
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
}

fn default_sandbox() -> bool {
    true
}

impl BackendDescriptor {
    pub fn credentials(&self) -> ProviderCredentials {
        ProviderCredentials {
            team_id: self.team_id.clone(),
            key_id: self.key_id.clone(),
            key_path: self.key_path.clone(),
            sandbox: self.sandbox,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Server port
    pub port: u16,

    /// This gateway's cluster node identifier.
    pub node_id: String,

    /// Default content-inclusion toggles applied on a user's first enable.
    pub defaults: NotifyConfig,

    /// Configured push backends.
    pub backends: Vec<BackendDescriptor>,

    /// Cluster liveness probe interval.
    pub liveness_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),

            node_id: std::env::var("NODE_ID").unwrap_or_else(|_| "local".to_string()),

            defaults: NotifyConfig {
                include_senders: env_flag("INCLUDE_SENDERS", false),
                include_message_count: env_flag("INCLUDE_MESSAGE_COUNT", true),
                include_subscription_count: env_flag("INCLUDE_SUBSCRIPTION_COUNT", true),
                include_message_bodies: env_flag("INCLUDE_MESSAGE_BODIES", false),
            },

            backends: parse_backends(std::env::var("BACKENDS").ok().as_deref()),

            liveness_interval: Duration::from_secs(
                std::env::var("LIVENESS_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn parse_backends(raw: Option<&str>) -> Vec<BackendDescriptor> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(backends) => backends,
        Err(e) => {
            error!(error = %e, "Failed to parse BACKENDS; starting with none");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backends_reads_descriptor_list() {
        let raw = r#"[{
            "register_host": "push.example.com",
            "pubsub_host": "push.example.com",
            "type": "apns",
            "app_name": "chat",
            "team_id": "TEAM",
            "key_id": "KEY",
            "key_path": "/etc/apns.p8"
        }]"#;

        let backends = parse_backends(Some(raw));
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].register_host, "push.example.com");
        assert!(backends[0].sandbox);
        assert!(backends[0].credentials().configured());
    }

    #[test]
    fn parse_backends_tolerates_garbage() {
        assert!(parse_backends(Some("not json")).is_empty());
        assert!(parse_backends(None).is_empty());
    }
}
