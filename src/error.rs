//! Error types and HTTP response conversion
//!
//! Mirrors the taxonomy of §7: configuration errors fail early and name the
//! offending plugin/key, timeouts carry the operation that timed out, worker
//! errors distinguish the absorbing "critical" state from a one-off request
//! error, and HRANA errors are always returned as typed pipeline results,
//! never thrown out of the server.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The operation a timeout was attached to (§5 "Cancellation & timeouts").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// 30s wait for the worker's `READY` message.
    WorkerReady,
    /// `config.timeout` wait for a worker request/response round trip.
    WorkerRequest,
    /// 30s wait for a plugin's `onInit` hook.
    PluginInit,
    /// 30s HRANA session inactivity window.
    HranaSession,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerReady => write!(f, "worker ready"),
            Self::WorkerRequest => write!(f, "worker request"),
            Self::PluginInit => write!(f, "plugin onInit"),
            Self::HranaSession => write!(f, "HRANA session"),
        }
    }
}

/// Worker-instance level errors (§3 WorkerInstance, §4.2).
#[derive(Debug, Error, Clone)]
pub enum WorkerError {
    /// A critical error was reported by (or about) the worker process.
    /// Once raised, the instance is unhealthy forever (§8 invariant 2).
    #[error("Worker initialization failed: {0}")]
    Critical(String),
    /// A single request failed; the instance remains healthy.
    #[error("worker request error: {0}")]
    Request(String),
    /// The request exceeded `config.timeout`.
    #[error("worker request timeout")]
    Timeout,
    /// The caller's resolved key already points at a different directory.
    #[error("worker collision: key '{key}' already maps to '{existing_dir}', got '{requested_dir}'")]
    Collision {
        key: String,
        existing_dir: String,
        requested_dir: String,
    },
}

/// Plugin loader / registry errors (§4.3, §7 Configuration row).
#[derive(Debug, Error, Clone)]
pub enum PluginError {
    #[error("plugin configuration error in '{plugin}': {message}")]
    Configuration { plugin: String, message: String },
    #[error("required dependency '{dependency}' for plugin '{plugin}' is {reason}")]
    MissingDependency {
        plugin: String,
        dependency: String,
        reason: &'static str,
    },
    #[error("dependency cycle detected among plugins: {0:?}")]
    Cycle(Vec<String>),
    #[error("duplicate plugin name '{0}'")]
    DuplicateName(String),
    #[error("plugin '{0}' onInit exceeded the 30s timeout")]
    InitTimeout(String),
    #[error("hook error in plugin '{plugin}': {message}")]
    Hook { plugin: String, message: String },
}

/// HRANA request-level error, normalized to the wire `{code, message}` pair
/// described in §4.4 "Error mapping". Never escapes the server as a Rust
/// error — it is always folded into a pipeline result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HranaError {
    pub code: String,
    pub message: String,
}

impl HranaError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_baton() -> Self {
        Self::new("INVALID_BATON", "baton does not reference a live session")
    }

    pub fn no_session() -> Self {
        Self::new(
            "NO_SESSION",
            "store_sql requires an active session (baton)",
        )
    }

    pub fn unknown_sql_id(id: i32) -> Self {
        Self::new("NO_SUCH_STMT", format!("unknown sql_id {id}"))
    }
}

impl fmt::Display for HranaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for HranaError {}

/// Main crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error — fails early, names the offending key.
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// A named operation exceeded its deadline.
    #[error("{kind} timed out after {elapsed_ms}ms")]
    Timeout { kind: TimeoutKind, elapsed_ms: u64 },

    /// Worker pool / worker instance error.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Plugin loader / registry error.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// HRANA protocol error that escaped the pipeline boundary (should not
    /// normally happen — the server folds these into typed results).
    #[error(transparent)]
    Hrana(#[from] HranaError),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(Box<axum::http::Error>),

    /// I/O error (child process spawn, plugin directory scan, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error (catch-all for invariant violations).
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error, e.g. from `anyhow` context at process boundaries.
    #[error("{0}")]
    Other(String),
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(Box::new(e))
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

/// Error response body returned from HTTP handlers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    pub fn with_code(status: StatusCode, code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Error::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", e.to_string()),
            ),
            Error::Timeout { kind, elapsed_ms } => {
                tracing::warn!(%kind, elapsed_ms, "operation timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ErrorResponse::with_code(
                        StatusCode::GATEWAY_TIMEOUT,
                        "TIMEOUT",
                        format!("{kind} timed out"),
                    ),
                )
            }
            Error::Worker(ref e) => {
                tracing::error!(error = %e, "worker error");
                let status = match e {
                    WorkerError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    WorkerError::Collision { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, ErrorResponse::with_code(status, "WORKER_ERROR", e.to_string()))
            }
            Error::Plugin(ref e) => {
                tracing::error!(error = %e, "plugin error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "PLUGIN_ERROR", e.to_string()),
                )
            }
            Error::Hrana(ref e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, e.code.clone(), e.message.clone()),
            ),
            Error::Http(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "HTTP_ERROR", e.to_string()),
            ),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            ),
            Error::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::with_code(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ),
            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ),
            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ),
            Error::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
                )
            }
            Error::Other(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "ERROR", msg),
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_kind_displays_lowercase_phrase() {
        assert_eq!(TimeoutKind::WorkerReady.to_string(), "worker ready");
    }

    #[test]
    fn hrana_error_helpers_set_expected_codes() {
        assert_eq!(HranaError::invalid_baton().code, "INVALID_BATON");
        assert_eq!(HranaError::no_session().code, "NO_SESSION");
        assert_eq!(HranaError::unknown_sql_id(7).code, "NO_SUCH_STMT");
    }
}
