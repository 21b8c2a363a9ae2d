//! Daemon error kinds and their HTTP mapping.

use {
    axum::{Json, http::StatusCode, response::IntoResponse},
    intercom_protocol::{ErrorBody, error_codes},
    thiserror::Error,
};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("bad envelope: {0}")]
    BadEnvelope(String),

    #[error("stale signature")]
    AuthStale,

    #[error("bad signature")]
    AuthBadSignature,

    #[error("unknown machine: {0}")]
    AuthUnknownMachine(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("no active session for {0}")]
    NoActiveSession(String),

    #[error("working directory not allowed: {0}")]
    PathNotAllowed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadEnvelope(_) | Self::PathNotAllowed(_) => StatusCode::BAD_REQUEST,
            Self::AuthStale | Self::AuthBadSignature => StatusCode::UNAUTHORIZED,
            Self::AuthUnknownMachine(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } | Self::NoActiveSession(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadEnvelope(_) => error_codes::BAD_ENVELOPE,
            Self::AuthStale => error_codes::AUTH_STALE,
            Self::AuthBadSignature => error_codes::AUTH_BAD_SIGNATURE,
            Self::AuthUnknownMachine(_) => error_codes::AUTH_UNKNOWN_MACHINE,
            Self::NotFound { .. } => error_codes::NOT_FOUND,
            Self::NoActiveSession(_) => error_codes::NO_ACTIVE_SESSION,
            Self::PathNotAllowed(_) => error_codes::PATH_NOT_ALLOWED,
            Self::Internal(_) => error_codes::INTERNAL,
        }
    }
}

impl From<anyhow::Error> for DaemonError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody::new(self.code(), self.to_string());
        (self.status(), Json(body)).into_response()
    }
}
