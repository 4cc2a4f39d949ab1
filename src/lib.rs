//! # Pushcast
//!
//! Push dispatch gateway for messaging servers.
//!
//! When a message or presence event is queued for an offline user, the host
//! server hands it to this gateway. The gateway merges it into the user's
//! pending summary and routes the summary to wherever the user's devices
//! can be woken: a local provider delivery worker, a cluster peer hosting
//! that worker, or a remote push service the user subscribed through.
//!
//! ## Design Principles
//!
//! - **Minimal content**: only the summary fields a user opted into leave
//!   the gateway; device tokens are opaque
//! - **Best-effort delivery**: a push is a hint, not a message; lost
//!   dispatches are logged and swallowed
//! - **Per-owner atomicity**: every operation against one user's state is a
//!   single transaction; concurrent operations serialize
//! - **Single-hop relay**: cluster forwarding happens at most once, with no
//!   acknowledgment and no retry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   events    ┌─────────────┐   casts   ┌─────────────┐
//! │ Host server │────────────▶│   Gateway   │──────────▶│   Workers   │
//! └─────────────┘             └─────────────┘           │ (APNS, ...) │
//!                                   │    │              └─────────────┘
//!                              relay│    │publish
//!                                   ▼    ▼
//!                            cluster peers / remote push services
//! ```
//!
//! ## API Overview
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Health check |
//! | `/v1/registrations` | POST | Register device for push |
//! | `/v1/registrations/remove` | POST | Unregister device(s) |
//! | `/v1/subscriptions/enable` | POST | Enable push for a resource |
//! | `/v1/subscriptions/disable` | POST | Disable matching subscriptions |
//! | `/v1/events` | POST | Absorb a queued event and dispatch |
//! | `/v1/events/flush` | POST | Reset a user's pending summary |
//! | `/v1/nodes/{node}/notify` | POST | Remote peer echo (Bearer secret) |

pub mod apns;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod forms;
pub mod handlers;
pub mod liveness;
pub mod models;
pub mod payload;
pub mod ports;
pub mod registration;
pub mod registry;
pub mod store;
pub mod subscription;
pub mod worker;

pub use config::Config;
pub use engine::Engine;
pub use error::{PushError, Result};
pub use handlers::AppState;
pub use registry::BackendRegistry;
pub use store::Store;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// Maximum request body size (16 KiB).
pub const MAX_BODY_SIZE: usize = 16 * 1024;

/// Build the Axum router with all endpoints and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check (unauthenticated)
        .route("/health", get(handlers::health))
        // API v1 endpoints
        .route("/v1/registrations", post(handlers::register_device))
        .route("/v1/registrations/remove", post(handlers::unregister_device))
        .route("/v1/subscriptions/enable", post(handlers::enable_subscription))
        .route("/v1/subscriptions/disable", post(handlers::disable_subscription))
        .route("/v1/events", post(handlers::submit_event))
        .route("/v1/events/flush", post(handlers::flush_events))
        .route("/v1/nodes/:node/notify", post(handlers::node_notify))
        // Middleware stack (order matters: first added = outermost)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
