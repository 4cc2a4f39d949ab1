//! HTTP request handlers for the push gateway API.
//!
//! Handlers are thin: they translate requests into engine entry points and
//! engine errors into stable error codes. No tokens or secrets are logged.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ring::constant_time::verify_slices_are_equal;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::PushError;
use crate::models::*;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

// === Health Check ===

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// === Device Registration ===

/// POST /v1/registrations - Register a device for push delivery
pub async fn register_device(
    State(state): State<AppState>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Result<Json<RegisterDeviceResponse>, ApiError> {
    let provider = ProviderType::parse(&req.provider)
        .ok_or(ApiError::InvalidInput("unknown provider type"))?;

    if req.token.is_empty() || req.token.len() > 512 {
        return Err(ApiError::InvalidInput("invalid device token"));
    }

    let outcome = state
        .engine
        .register(
            &req.owner,
            &req.register_host,
            provider,
            &req.token,
            req.device_id.as_deref(),
            &req.device_name,
            &req.app_id,
            req.silent,
        )
        .await?;

    debug!(register_host = %req.register_host, "Device registered");

    Ok(Json(RegisterDeviceResponse {
        pubsub_host: outcome.pubsub_host,
        node: outcome.node,
        secret: outcome.secret,
    }))
}

/// POST /v1/registrations/remove - Unregister one device or a node list
pub async fn unregister_device(
    State(state): State<AppState>,
    Json(req): Json<UnregisterRequest>,
) -> Result<Json<UnregisterResponse>, ApiError> {
    let removed = state
        .engine
        .unregister(&req.owner, req.device_id.as_deref(), &req.nodes)
        .await?;

    Ok(Json(UnregisterResponse {
        success: true,
        removed,
    }))
}

// === Subscriptions ===

/// POST /v1/subscriptions/enable - Enable push for the requesting resource
pub async fn enable_subscription(
    State(state): State<AppState>,
    Json(req): Json<EnableRequest>,
) -> Result<Json<EnableResponse>, ApiError> {
    let adjusted = state
        .engine
        .enable(&req.owner, &req.service, req.node.as_deref(), &req.forms)
        .await?;

    Ok(Json(EnableResponse {
        success: true,
        adjusted,
    }))
}

/// POST /v1/subscriptions/disable - Disable matching push subscriptions
pub async fn disable_subscription(
    State(state): State<AppState>,
    Json(req): Json<DisableRequest>,
) -> Result<Json<DisableResponse>, ApiError> {
    state
        .engine
        .disable(&req.owner, &req.service, req.node.as_deref())
        .await?;

    Ok(Json(DisableResponse { success: true }))
}

// === Events ===

/// POST /v1/events - Absorb a store-or-notify event and dispatch
pub async fn submit_event(
    State(state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> Result<Json<EventResponse>, ApiError> {
    let absorbed = state
        .engine
        .handle_offline_event(&req.owner, &req.sender, &req.stanza)
        .await?;

    Ok(Json(EventResponse { absorbed }))
}

/// POST /v1/events/flush - Queued stanzas were delivered directly
pub async fn flush_events(
    State(state): State<AppState>,
    Json(req): Json<FlushRequest>,
) -> Result<Json<FlushResponse>, ApiError> {
    state.engine.handle_flush(&req.owner).await?;
    Ok(Json(FlushResponse { success: true }))
}

// === Remote Echo ===

/// POST /v1/nodes/{node}/notify - Remote peer publishing back into a node
///
/// Authenticated with the registration's shared secret as a Bearer token.
pub async fn node_notify(
    State(state): State<AppState>,
    Path(node): Path<String>,
    headers: HeaderMap,
    Json(req): Json<NotifyRequest>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let secret = extract_auth_token(&headers)?;

    let registrations = state.engine.store().registrations_for_node(&node);
    if registrations.is_empty() {
        return Err(PushError::ItemNotFound.into());
    }

    let authorized = registrations.iter().any(|r| {
        verify_slices_are_equal(r.secret.as_bytes(), secret.as_bytes()).is_ok()
    });
    if !authorized {
        warn!("Secret verification failed for incoming notification");
        return Err(AuthError::Unauthorized.into());
    }

    state.engine.incoming_notification(&node, &req.forms).await?;

    info!("Accepted remote notification");
    Ok(Json(NotifyResponse { success: true }))
}

// === Authorization ===

/// Extract Bearer token from the Authorization header
fn extract_auth_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let header_value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader)?;

    extract_bearer_token(header_value)
        .map(|s| s.to_string())
        .ok_or(AuthError::InvalidHeader)
}

/// Extract Bearer token from an Authorization header value
pub fn extract_bearer_token(authorization: &str) -> Option<&str> {
    authorization
        .strip_prefix("Bearer ")
        .or_else(|| authorization.strip_prefix("bearer "))
}

/// Authorization error
#[derive(Debug)]
pub enum AuthError {
    /// Missing Authorization header
    MissingHeader,
    /// Invalid Authorization header format
    InvalidHeader,
    /// Secret verification failed
    Unauthorized,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::MissingHeader => (
                StatusCode::UNAUTHORIZED,
                "MISSING_AUTH",
                "Authorization header required",
            ),
            AuthError::InvalidHeader => (
                StatusCode::BAD_REQUEST,
                "INVALID_AUTH",
                "Invalid Authorization header format",
            ),
            AuthError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Invalid secret",
            ),
        };

        let body = Json(ErrorResponse {
            error: message.to_string(),
            code,
        });

        (status, body).into_response()
    }
}

// === Error Handling ===

/// API error types
#[derive(Debug)]
pub enum ApiError {
    InvalidInput(&'static str),
    /// Engine error (wraps PushError)
    Push(PushError),
    /// Authorization error (wraps AuthError)
    Auth(AuthError),
}

impl From<PushError> for ApiError {
    fn from(err: PushError) -> Self {
        ApiError::Push(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(auth_err) => auth_err.into_response(),
            ApiError::InvalidInput(msg) => {
                let body = Json(ErrorResponse {
                    error: msg.to_string(),
                    code: "INVALID_INPUT",
                });
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            ApiError::Push(err) => {
                let (status, code, message) = match &err {
                    PushError::NotAcceptable(msg) => {
                        (StatusCode::NOT_ACCEPTABLE, "NOT_ACCEPTABLE", *msg)
                    }
                    PushError::ItemNotFound => (
                        StatusCode::NOT_FOUND,
                        "ITEM_NOT_FOUND",
                        "no matching subscription or registration",
                    ),
                    PushError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", *msg),
                    PushError::NoBackend => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "NO_BACKEND",
                        "no backend configured for target",
                    ),
                    PushError::Internal(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "internal server error",
                    ),
                };

                let body = Json(ErrorResponse {
                    error: message.to_string(),
                    code,
                });

                (status, body).into_response()
            }
        }
    }
}
