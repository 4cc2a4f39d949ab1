//! Integration tests for the pushcast gateway API.
//!
//! Drives the full HTTP API: device registration, subscription management,
//! event ingestion and the authenticated remote-echo endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use pushcast::build_router;
use pushcast::config::BackendDescriptor;
use pushcast::engine::Engine;
use pushcast::handlers::AppState;
use pushcast::models::{NotifyConfig, SummaryField};
use pushcast::ports::{NullNodeAdmin, NullPeerLink, PortError, RemotePublisher};
use pushcast::registry::BackendRegistry;
use pushcast::store::Store;
use pushcast::worker::WorkerPool;

const NODE_ID: &str = "node-a";
const REGISTER_HOST: &str = "push.example.com";

/// Remote publisher capturing every publish for assertions.
#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, String, Vec<SummaryField>)>>,
}

#[async_trait]
impl RemotePublisher for RecordingPublisher {
    async fn publish(
        &self,
        peer: &str,
        node: &str,
        fields: &[SummaryField],
    ) -> Result<(), PortError> {
        self.published
            .lock()
            .await
            .push((peer.to_string(), node.to_string(), fields.to_vec()));
        Ok(())
    }
}

fn build_engine(publisher: Arc<dyn RemotePublisher>) -> Arc<Engine> {
    let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
    let registry = BackendRegistry::new(WorkerPool::new(feedback_tx));

    let descriptors: Vec<BackendDescriptor> = serde_json::from_str(&format!(
        r#"[{{"register_host": "{REGISTER_HOST}", "pubsub_host": "{REGISTER_HOST}",
             "type": "ubuntu", "app_name": "chat"}}]"#
    ))
    .unwrap();
    registry.populate(NODE_ID, &descriptors);

    Arc::new(Engine::new(
        Store::new(),
        registry,
        Arc::new(NullNodeAdmin::default()),
        publisher,
        Arc::new(NullPeerLink),
        NotifyConfig::default(),
        NODE_ID.to_string(),
    ))
}

/// Build test server with the application router
fn build_test_server(publisher: Arc<dyn RemotePublisher>) -> (TestServer, Arc<Engine>) {
    let engine = build_engine(publisher);
    let app = build_router(AppState::new(engine.clone()));
    (TestServer::new(app).unwrap(), engine)
}

fn server() -> TestServer {
    build_test_server(Arc::new(RecordingPublisher::default())).0
}

/// Create authorization header value
fn auth_header(secret: &str) -> String {
    format!("Bearer {}", secret)
}

/// Register alice's phone and return (node, secret).
async fn register_phone(server: &TestServer) -> (String, String) {
    let response = server
        .post("/v1/registrations")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "register_host": REGISTER_HOST,
            "type": "ubuntu",
            "token": "device-token-1",
            "device_id": "phone1",
            "device_name": "Phone",
            "app_id": "com.example.chat"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    (
        body["node"].as_str().unwrap().to_string(),
        body["secret"].as_str().unwrap().to_string(),
    )
}

// =============================================================================
// Health Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

// =============================================================================
// Registration Tests
// =============================================================================

#[tokio::test]
async fn test_register_returns_node_and_secret() {
    let server = server();

    let response = server
        .post("/v1/registrations")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "register_host": REGISTER_HOST,
            "type": "ubuntu",
            "token": "device-token-1",
            "device_id": "phone1",
            "device_name": "Phone",
            "app_id": "com.example.chat"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["pubsub_host"], REGISTER_HOST);
    assert!(!body["node"].as_str().unwrap().is_empty());
    assert!(!body["secret"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_reregister_preserves_node_and_secret() {
    let server = server();
    let (node, secret) = register_phone(&server).await;

    let response = server
        .post("/v1/registrations")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "register_host": REGISTER_HOST,
            "type": "ubuntu",
            "token": "device-token-2",
            "device_id": "phone1",
            "device_name": "Phone",
            "app_id": "com.example.chat"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["node"], node.as_str());
    assert_eq!(body["secret"], secret.as_str());
}

#[tokio::test]
async fn test_register_unknown_provider_type() {
    let server = server();

    let response = server
        .post("/v1/registrations")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "register_host": REGISTER_HOST,
            "type": "pigeon",
            "token": "device-token-1",
            "app_id": "com.example.chat"
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_register_without_backend() {
    let server = server();

    let response = server
        .post("/v1/registrations")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "register_host": "other.example.com",
            "type": "ubuntu",
            "token": "device-token-1",
            "app_id": "com.example.chat"
        }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "NO_BACKEND");
}

#[tokio::test]
async fn test_unregister_single_device_then_miss() {
    let server = server();
    register_phone(&server).await;

    let response = server
        .post("/v1/registrations/remove")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "device_id": "phone1"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert!(body.get("removed").is_none() || body["removed"].is_null());

    // Already gone.
    let response = server
        .post("/v1/registrations/remove")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "device_id": "phone1"
        }))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "ITEM_NOT_FOUND");
}

#[tokio::test]
async fn test_unregister_by_node_list() {
    let server = server();
    let (node, _) = register_phone(&server).await;

    let response = server
        .post("/v1/registrations/remove")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "nodes": [node, "missing-node"]
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["removed"], json!([node]));
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[tokio::test]
async fn test_enable_and_disable_flow() {
    let server = server();
    let (node, _) = register_phone(&server).await;

    let response = server
        .post("/v1/subscriptions/enable")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "service": REGISTER_HOST,
            "node": node
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert!(body.get("adjusted").is_none() || body["adjusted"].is_null());

    let response = server
        .post("/v1/subscriptions/disable")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "service": REGISTER_HOST
        }))
        .await;

    response.assert_status_ok();

    // Nothing left to disable.
    let response = server
        .post("/v1/subscriptions/disable")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "service": REGISTER_HOST
        }))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enable_without_node_is_not_acceptable() {
    let server = server();

    let response = server
        .post("/v1/subscriptions/enable")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "service": REGISTER_HOST
        }))
        .await;

    response.assert_status(StatusCode::NOT_ACCEPTABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "NOT_ACCEPTABLE");
}

#[tokio::test]
async fn test_enable_reports_adjusted_options() {
    let server = server();
    let (node, _) = register_phone(&server).await;

    // Default include-senders is false; asking for true under the
    // disable-only privilege must come back adjusted.
    let response = server
        .post("/v1/subscriptions/enable")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "service": REGISTER_HOST,
            "node": node,
            "forms": [{
                "type": "push-config",
                "fields": {"include-senders": ["true"]}
            }]
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(
        body["adjusted"]["fields"]["include-senders"],
        json!(["false"])
    );
}

#[tokio::test]
async fn test_enable_with_malformed_config_form() {
    let server = server();
    let (node, _) = register_phone(&server).await;

    let response = server
        .post("/v1/subscriptions/enable")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "service": REGISTER_HOST,
            "node": node,
            "forms": [{
                "type": "push-config",
                "fields": {"include-senders": ["maybe"]}
            }]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
}

// =============================================================================
// Event Flow Tests
// =============================================================================

#[tokio::test]
async fn test_event_flows_to_remote_subscription() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (server, _engine) = build_test_server(publisher.clone());

    let response = server
        .post("/v1/subscriptions/enable")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "service": "push.elsewhere.net",
            "node": "remote-node",
            "forms": [{
                "type": "publish-options",
                "fields": {"secret": ["s3cr3t"]}
            }]
        }))
        .await;
    response.assert_status_ok();

    let response = server
        .post("/v1/events")
        .json(&json!({
            "owner": "alice@example.com",
            "sender": "bob@example.com",
            "stanza": {"kind": "message", "body": "hi"}
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["absorbed"], true);

    let published = publisher.published.lock().await;
    assert_eq!(published.len(), 1);
    let (peer, node, fields) = &published[0];
    assert_eq!(peer, "push.elsewhere.net");
    assert_eq!(node, "remote-node");

    // Remote forwarding is full fidelity regardless of the user's config.
    let field = |key: &str| {
        fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.clone())
    };
    assert_eq!(field("message-count").as_deref(), Some("1"));
    assert_eq!(field("last-message-sender").as_deref(), Some("bob@example.com"));
    assert_eq!(field("last-message-body").as_deref(), Some("hi"));
}

#[tokio::test]
async fn test_event_for_unknown_user_is_not_absorbed() {
    let server = server();

    let response = server
        .post("/v1/events")
        .json(&json!({
            "owner": "nobody@example.com",
            "sender": "bob@example.com",
            "stanza": {"kind": "message", "body": "hi"}
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["absorbed"], false);
}

#[tokio::test]
async fn test_flush_resets_summary() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (server, engine) = build_test_server(publisher.clone());

    server
        .post("/v1/subscriptions/enable")
        .json(&json!({
            "owner": "alice@example.com/phone1",
            "service": "push.elsewhere.net",
            "node": "remote-node"
        }))
        .await
        .assert_status_ok();

    server
        .post("/v1/events")
        .json(&json!({
            "owner": "alice@example.com",
            "sender": "bob@example.com",
            "stanza": {"kind": "message", "body": "hi"}
        }))
        .await
        .assert_status_ok();

    server
        .post("/v1/events/flush")
        .json(&json!({"owner": "alice@example.com"}))
        .await
        .assert_status_ok();

    let user = engine.store().get_user("alice@example.com").unwrap();
    assert!(user.summary.is_empty());
}

// =============================================================================
// Remote Echo Tests
// =============================================================================

#[tokio::test]
async fn test_node_notify_requires_valid_secret() {
    let server = server();
    let (node, secret) = register_phone(&server).await;

    // Missing header.
    let response = server
        .post(&format!("/v1/nodes/{node}/notify"))
        .json(&json!({"forms": []}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], "MISSING_AUTH");

    // Wrong secret.
    let response = server
        .post(&format!("/v1/nodes/{node}/notify"))
        .add_header(header::AUTHORIZATION, auth_header("wrong-secret"))
        .json(&json!({"forms": []}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], "UNAUTHORIZED");

    // Correct secret, empty payload: accepted as a bare wake-up.
    let response = server
        .post(&format!("/v1/nodes/{node}/notify"))
        .add_header(header::AUTHORIZATION, auth_header(&secret))
        .json(&json!({"forms": []}))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_node_notify_with_summary_form() {
    let server = server();
    let (node, secret) = register_phone(&server).await;

    let response = server
        .post(&format!("/v1/nodes/{node}/notify"))
        .add_header(header::AUTHORIZATION, auth_header(&secret))
        .json(&json!({
            "forms": [{
                "type": "push-summary",
                "fields": {
                    "message-count": ["2"],
                    "last-message-sender": ["bob@example.com"]
                }
            }]
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_node_notify_unknown_node() {
    let server = server();

    let response = server
        .post("/v1/nodes/no-such-node/notify")
        .add_header(header::AUTHORIZATION, auth_header("whatever"))
        .json(&json!({"forms": []}))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "ITEM_NOT_FOUND");
}
