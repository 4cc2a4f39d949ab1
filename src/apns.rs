//! Apple Push Notification Service (APNS) delivery worker.
//!
//! The one fully implemented provider integration. Silent registrations get
//! background (content-available) pushes; everything else gets an alert
//! push carrying the rendered summary as custom data. Delivery is
//! best-effort; the only failure that feeds back into the engine is a
//! token the provider declares dead.

use std::fs::File;
use std::io::Read;

use a2::{
    Client, ClientConfig, DefaultNotificationBuilder, Endpoint, NotificationBuilder,
    NotificationOptions, Priority, PushType,
};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::ProviderCredentials;
use crate::forms::{KEY_LAST_MESSAGE_BODY, KEY_MESSAGE_COUNT, KEY_PENDING_SUBSCRIPTION_COUNT};
use crate::worker::{DispatchTask, TokenFeedback};

/// APNS client wrapper. A worker without a client accepts and drops
/// dispatches, so a misconfigured backend degrades instead of failing.
struct ApnsWorker {
    client: Option<Client>,
}

impl ApnsWorker {
    fn new(credentials: &ProviderCredentials) -> Self {
        if !credentials.configured() {
            warn!("APNS credentials incomplete - deliveries will be dropped");
            return Self { client: None };
        }

        // configured() checked all three fields above.
        let (Some(team_id), Some(key_id), Some(key_path)) = (
            credentials.team_id.as_ref(),
            credentials.key_id.as_ref(),
            credentials.key_path.as_ref(),
        ) else {
            return Self { client: None };
        };

        let mut key_file = match File::open(key_path) {
            Ok(f) => f,
            Err(e) => {
                error!(path = %key_path, error = %e, "Failed to open APNS key file");
                return Self { client: None };
            }
        };

        let mut key_pem = Vec::new();
        if let Err(e) = key_file.read_to_end(&mut key_pem) {
            error!(error = %e, "Failed to read APNS key file");
            return Self { client: None };
        }

        let endpoint = if credentials.sandbox {
            Endpoint::Sandbox
        } else {
            Endpoint::Production
        };

        let client_config = ClientConfig::new(endpoint);

        let client = match Client::token(&mut &key_pem[..], key_id, team_id, client_config) {
            Ok(c) => Some(c),
            Err(e) => {
                error!(error = %e, "Failed to create APNS client");
                None
            }
        };

        if client.is_some() {
            debug!(sandbox = credentials.sandbox, "APNS client initialized");
        }

        Self { client }
    }

    /// Deliver one dispatch (best-effort). Returns feedback when the
    /// provider reports the token dead.
    async fn deliver(&self, task: &DispatchTask) -> Option<TokenFeedback> {
        let client = match &self.client {
            Some(c) => c,
            None => {
                debug!("APNS client unavailable; dropping dispatch");
                return None;
            }
        };

        let options = NotificationOptions {
            apns_priority: Some(if task.silent {
                Priority::Normal
            } else {
                Priority::High
            }),
            apns_topic: Some(&task.app_id),
            apns_push_type: Some(if task.silent {
                PushType::Background
            } else {
                PushType::Alert
            }),
            ..Default::default()
        };

        let alert = alert_line(task);
        let mut payload = if task.silent {
            DefaultNotificationBuilder::new()
                .set_content_available()
                .build(&task.token, options)
        } else {
            DefaultNotificationBuilder::new()
                .set_body(&alert)
                .build(&task.token, options)
        };

        if !task.fields.is_empty() {
            let mut summary = serde_json::Map::new();
            for field in &task.fields {
                summary.insert(
                    field.key.clone(),
                    serde_json::Value::String(field.value.clone()),
                );
            }
            if let Err(e) = payload.add_custom_data("summary", &summary) {
                debug!(error = %e, "Failed to attach summary to payload");
            }
        }

        match client.send(payload).await {
            Ok(response) => {
                debug!(status = ?response.code, "Sent push");
                None
            }
            Err(a2::Error::ResponseError(response)) => match response.error {
                Some(body) => match body.reason {
                    a2::ErrorReason::BadDeviceToken | a2::ErrorReason::Unregistered => {
                        warn!("Provider rejected device token; requesting registration removal");
                        Some(TokenFeedback {
                            owner: task.owner.clone(),
                            timestamp: task.timestamp,
                        })
                    }
                    reason => {
                        debug!(reason = ?reason, "Push rejected");
                        None
                    }
                },
                None => {
                    debug!(status = response.code, "Push rejected");
                    None
                }
            },
            Err(e) => {
                // Log error but don't fail - best effort delivery
                debug!(error = %e, "Failed to send push notification");
                None
            }
        }
    }
}

/// Compact alert text derived from the rendered fields.
fn alert_line(task: &DispatchTask) -> String {
    let field = |key: &str| {
        task.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.clone())
    };

    if let Some(body) = field(KEY_LAST_MESSAGE_BODY) {
        return body;
    }
    if let Some(count) = field(KEY_MESSAGE_COUNT) {
        return format!("{count} new message(s)");
    }
    if let Some(count) = field(KEY_PENDING_SUBSCRIPTION_COUNT) {
        return format!("{count} pending subscription request(s)");
    }
    "New activity".to_string()
}

/// Worker loop: drain the mailbox, deliver each dispatch, forward token
/// feedback.
pub async fn run_worker(
    worker_addr: &str,
    credentials: ProviderCredentials,
    mut rx: mpsc::UnboundedReceiver<DispatchTask>,
    feedback: mpsc::UnboundedSender<TokenFeedback>,
) {
    let worker = ApnsWorker::new(&credentials);
    debug!(worker = %worker_addr, "Started APNS delivery worker");

    while let Some(task) = rx.recv().await {
        if let Some(fb) = worker.deliver(&task).await {
            let _ = feedback.send(fb);
        }
    }
}
