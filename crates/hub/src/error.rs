//! Hub error kinds and their HTTP mapping.

use {
    axum::{Json, http::StatusCode, response::IntoResponse},
    intercom_protocol::{ErrorBody, error_codes},
    thiserror::Error,
};

#[derive(Error, Debug)]
pub enum HubError {
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

    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    #[error("denied by policy")]
    DeniedByPolicy,

    #[error("denied by operator")]
    DeniedByOperator,

    #[error("approval timed out")]
    ApprovalTimeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadEnvelope(_) => StatusCode::BAD_REQUEST,
            Self::AuthStale | Self::AuthBadSignature => StatusCode::UNAUTHORIZED,
            Self::AuthUnknownMachine(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } | Self::NoActiveSession(_) => StatusCode::NOT_FOUND,
            Self::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeniedByPolicy | Self::DeniedByOperator | Self::ApprovalTimeout => {
                StatusCode::CONFLICT
            },
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
            Self::Unreachable(_) => error_codes::UNREACHABLE,
            Self::DeniedByPolicy => error_codes::DENIED_BY_POLICY,
            Self::DeniedByOperator => error_codes::DENIED_BY_OPERATOR,
            Self::ApprovalTimeout => error_codes::APPROVAL_TIMEOUT,
            Self::Internal(_) => error_codes::INTERNAL,
        }
    }

    /// Short operator-facing label attached to error bodies.
    pub fn label(&self) -> String {
        match self {
            Self::BadEnvelope(_) => "malformed message".into(),
            Self::AuthStale => "signature expired".into(),
            Self::AuthBadSignature => "signature mismatch".into(),
            Self::AuthUnknownMachine(id) => format!("machine {id} not approved"),
            Self::NotFound { kind, name } => format!("{kind} {name} not found"),
            Self::NoActiveSession(agent) => format!("{agent} has no active session"),
            Self::Unreachable(target) => format!("{target} unreachable"),
            Self::DeniedByPolicy => "blocked by policy".into(),
            Self::DeniedByOperator => "denied by operator".into(),
            Self::ApprovalTimeout => "approval timed out".into(),
            Self::Internal(_) => "internal error".into(),
        }
    }
}

impl From<anyhow::Error> for HubError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody::new(self.code(), self.to_string()).with_label(self.label());
        (self.status(), Json(body)).into_response()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(HubError::BadEnvelope("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(HubError::AuthStale.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            HubError::AuthUnknownMachine("m".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            HubError::not_found("mission", "m-1").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(HubError::DeniedByOperator.status(), StatusCode::CONFLICT);
        assert_eq!(HubError::Unreachable("d".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
