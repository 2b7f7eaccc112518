//! Error taxonomy shared by the server, the pipeline, and the agent.
//!
//! Uses a single enum so the HTTP layer can map every failure to a status
//! code in one place. Subsystems construct the variant that matches how the
//! caller should react: `InvalidRequest` is never retried, `TransientBackend`
//! is retried by whoever holds the deadline, `PermanentBackend` takes the
//! affected project out of service until repaired.

use thiserror::Error;

/// Top-level error type for all Hermes operations.
#[derive(Debug, Error)]
pub enum HermesError {
    /// Malformed envelope, failing schema validation or hash verification.
    /// Surfaced as 400; never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or unverifiable bearer token. Surfaced as 401.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The presented API token was revoked by an operator. Surfaced as 410;
    /// the agent must re-register.
    #[error("token revoked")]
    TokenRevoked,

    /// Uniqueness or precondition violation that is informative to the
    /// caller (e.g. a summary attached against a stale hash). Surfaced as
    /// 409 with the detail message.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Requested entity does not exist. Surfaced as 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request body exceeded the admission size cap. Surfaced as 413.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Backend failure that is expected to clear on retry: store deadlock,
    /// AI provider timeout, index 5xx. Surfaced as 503 for outer retry.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// Backend failure that will not clear without operator action, such as
    /// a schema version below the server's minimum or a misconfigured
    /// provider. Surfaced as 500.
    #[error("permanent backend error: {0}")]
    PermanentBackend(String),

    /// Catalog store error.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl HermesError {
    /// Machine-readable error code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            HermesError::InvalidRequest(_) => "invalid_request",
            HermesError::Unauthorized(_) => "unauthorized",
            HermesError::TokenRevoked => "token_revoked",
            HermesError::Conflict(_) => "conflict",
            HermesError::NotFound(_) => "not_found",
            HermesError::PayloadTooLarge(_) => "payload_too_large",
            HermesError::TransientBackend(_) => "transient_backend",
            HermesError::PermanentBackend(_) => "permanent_backend",
            HermesError::Store(_) => "store_error",
        }
    }

    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            HermesError::InvalidRequest(_) => 400,
            HermesError::Unauthorized(_) => 401,
            HermesError::TokenRevoked => 410,
            HermesError::Conflict(_) => 409,
            HermesError::NotFound(_) => 404,
            HermesError::PayloadTooLarge(_) => 413,
            HermesError::TransientBackend(_) => 503,
            HermesError::PermanentBackend(_) => 500,
            HermesError::Store(_) => 503,
        }
    }

    /// Whether the caller should retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HermesError::TransientBackend(_) | HermesError::Store(_)
        )
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, HermesError>;
