//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **RelayError**: failures inside a voice session. The kind decides whether the
//!   session survives it (see `is_recoverable`).
//! - **AppError**: failures of plain HTTP handlers, converted into JSON responses.
//!
//! ## Session error policy:
//! | kind      | cause                                         | session     |
//! |-----------|-----------------------------------------------|-------------|
//! | Transport | backend or client socket failure              | torn down   |
//! | Setup     | backend rejects or never acknowledges setup   | torn down   |
//! | Protocol  | malformed client JSON or unknown `type`       | stays alive |
//! | Codec     | malformed audio payload (odd byte length ...) | stays alive |
//!
//! Nothing is retried automatically. A client that loses its session reconnects
//! and gets a fresh session with a fresh backend link.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors raised while relaying one voice session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Backend or client socket failure. Terminal for the session.
    Transport(String),

    /// Malformed inbound JSON or an unrecognized message `type`.
    Protocol(String),

    /// The backend rejected the setup frame or never acknowledged it.
    Setup(String),

    /// Audio payload that cannot be PCM16 (odd length, bad base64, out-of-range bytes).
    Codec(String),
}

impl RelayError {
    /// Whether the session may keep running after reporting this error.
    ///
    /// Only Protocol and Codec errors are recoverable locally; the offending
    /// input is discarded and the session carries on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RelayError::Protocol(_) | RelayError::Codec(_))
    }

    /// Short machine-readable name, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Transport(_) => "transport",
            RelayError::Protocol(_) => "protocol",
            RelayError::Setup(_) => "setup",
            RelayError::Codec(_) => "codec",
        }
    }

    /// The human-readable message, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            RelayError::Transport(msg)
            | RelayError::Protocol(msg)
            | RelayError::Setup(msg)
            | RelayError::Codec(msg) => msg,
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RelayError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RelayError::Setup(msg) => write!(f, "Setup error: {}", msg),
            RelayError::Codec(msg) => write!(f, "Codec error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl From<base64::DecodeError> for RelayError {
    fn from(err: base64::DecodeError) -> Self {
        RelayError::Codec(format!("invalid base64 audio: {}", err))
    }
}

/// Errors returned by HTTP handlers.
///
/// ## HTTP Status Code Mapping:
/// - ServiceUnavailable → 503 (session capacity reached)
/// - Internal → 500
#[derive(Debug)]
pub enum AppError {
    /// Server-side problems
    Internal(String),

    /// The relay cannot take another session right now
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses:
///
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Session limit of 10 reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AppError::ServiceUnavailable(_) => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<actix_web::Error> for AppError {
    fn from(err: actix_web::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
