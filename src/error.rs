//! Error types for the push engine.
//!
//! Every engine entry point returns `Result<T>` with one of the variants
//! below. The HTTP layer maps them onto status codes and stable error codes
//! in `handlers.rs`; embedders linking the library directly match on the
//! variants themselves.

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, PushError>;

/// Errors surfaced by the push engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// A required identifier is missing or malformed in the request.
    #[error("not acceptable: {0}")]
    NotAcceptable(&'static str),

    /// The operation targets a subscription or registration that does not exist.
    #[error("item not found")]
    ItemNotFound,

    /// A submitted form failed to parse.
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// No backend is configured for the request's register host and provider type.
    #[error("no backend configured for target")]
    NoBackend,

    /// A store transaction or external collaborator failed mid-operation.
    #[error("internal error: {0}")]
    Internal(String),
}
