//! Pushcast - Push Dispatch Gateway
//!
//! A gateway that lets a messaging server wake offline clients through
//! third-party push services:
//! - Tracks per-device registrations and per-user subscriptions
//! - Aggregates queued events into compact summaries
//! - Dispatches to provider workers, cluster peers or remote push services
//!
//! # Operational Properties
//!
//! - State is in-memory; every mutation is atomic per owner
//! - Delivery is best-effort with no retries at this layer
//! - No tokens or secrets are ever logged

use std::sync::Arc;

use axum::Router;
use tokio::sync::mpsc;
use tracing::info;

use pushcast::engine::Engine;
use pushcast::handlers::AppState;
use pushcast::liveness::LivenessWorker;
use pushcast::ports::{NullNodeAdmin, NullPeerLink, NullPublisher};
use pushcast::registry::BackendRegistry;
use pushcast::store::Store;
use pushcast::worker::WorkerPool;
use pushcast::{build_router, Config};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Initialize structured logging
    init_tracing();

    // Load and validate configuration
    let config = Config::from_env();
    log_startup_info(&config);

    // Initialize core components
    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
    let workers = WorkerPool::new(feedback_tx);
    let registry = BackendRegistry::new(workers);
    registry.populate(&config.node_id, &config.backends);

    let engine = Arc::new(Engine::new(
        Store::new(),
        registry,
        Arc::new(NullNodeAdmin::default()),
        Arc::new(NullPublisher),
        Arc::new(NullPeerLink),
        config.defaults,
        config.node_id.clone(),
    ));
    engine.start_feedback_task(feedback_rx);

    // Start background workers
    let liveness = Arc::new(LivenessWorker::new(engine.clone(), config.liveness_interval));
    liveness.start();

    // Build and serve the application
    let state = AppState::new(engine);
    let app = build_router(state);
    serve(app, &config).await;
}

/// Initialize tracing with environment-based log levels.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pushcast=debug,tower_http=info")),
        )
        .init();
}

/// Log startup configuration (no secrets).
fn log_startup_info(config: &Config) {
    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        node_id = %config.node_id,
        backends = config.backends.len(),
        liveness_interval_secs = config.liveness_interval.as_secs(),
        "Starting pushcast gateway"
    );
}

/// Bind to address and serve the application.
async fn serve(app: Router, config: &Config) {
    let bind_addr = format!("{}:{}", config.bind_addr, config.port);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %bind_addr, "Server listening");

    axum::serve(listener, app).await.expect("Server error");
}
