use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Error types for the call engine
///
/// Covers persistence, provider integrations, webhook verification and input
/// validation. Inside a webhook that must return a call-control document these
/// errors are logged and replaced with the voicemail document instead of being
/// surfaced to the telephony provider.
///
/// # Examples
///
/// ```
/// use careline_call_engine::{CallEngineError, Result};
///
/// fn start_call(to: &str) -> Result<()> {
///     if to.is_empty() {
///         return Err(CallEngineError::invalid_input("destination is required"));
///     }
///     Ok(())
/// }
///
/// assert!(matches!(start_call(""), Err(CallEngineError::InvalidInput(_))));
/// ```
#[derive(Error, Debug)]
pub enum CallEngineError {
    /// Database operation errors (connection, SQL, migrations)
    #[error("Database error: {0}")]
    Database(String),

    /// Call routing errors
    #[error("Routing error: {0}")]
    Routing(String),

    /// Problems talking to the telephony provider, the AI voice-agent
    /// platform or the summarizer endpoint
    #[error("Integration error: {0}")]
    Integration(String),

    /// Configuration validation and parsing errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A feature was used whose credentials are not configured
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Bearer token missing or not accepted
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A webhook signature or audio token did not verify
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// User-provided input failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Business-rule validation failures (hunt group invariants and the like)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallEngineError {
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    pub fn routing<S: Into<String>>(msg: S) -> Self {
        Self::Routing(msg.into())
    }

    pub fn integration<S: Into<String>>(msg: S) -> Self {
        Self::Integration(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_configured<S: Into<String>>(msg: S) -> Self {
        Self::NotConfigured(msg.into())
    }

    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn signature_mismatch<S: Into<String>>(msg: S) -> Self {
        Self::SignatureMismatch(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status used when this error escapes an API handler
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) | Self::SignatureMismatch(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Integration(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_)
            | Self::Routing(_)
            | Self::Configuration(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for CallEngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CallEngineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(format!("migration failed: {}", err))
    }
}

impl From<reqwest::Error> for CallEngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Integration(err.to_string())
    }
}

impl From<config::ConfigError> for CallEngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for CallEngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for CallEngineError {
    fn from(err: anyhow::Error) -> Self {
        // anyhow errors come from lower-level setup code and are unexpected here
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for CallEngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;
