use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::{session_store::SessionError, state::StateError};
use crate::{db::DbError, observability::metrics};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Credentials were provided but are invalid (generic, never says which part was wrong)
    #[error("Invalid authentication credentials")]
    InvalidCredentials,

    /// IdP-side operation on a token that is unknown, expired or already used
    #[error("Unknown authentication token")]
    UnknownToken,

    /// SP-side resolution of a token that is unknown, consumed or not yet authenticated
    #[error("Pending authentication state not found")]
    StateNotFound,

    /// The emulated SP has no authenticated login for this browser
    #[error("No federated session established")]
    SessionNotEstablished,

    /// The federated callback carried no usable email attribute
    #[error("Required identity attributes missing")]
    MissingAttributes,

    #[error("Repository error: {0}")]
    Repository(#[from] DbError),

    /// Group lookup failed. Callers degrade to "undefined" rather than surface this.
    #[error("Group resolution failed: {0}")]
    GroupResolution(String),

    #[error("Session store error: {0}")]
    Session(#[from] SessionError),

    #[error("Pending state store error: {0}")]
    StateStore(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StateError> for AuthError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound => AuthError::StateNotFound,
            StateError::UnknownToken => AuthError::UnknownToken,
            StateError::Cache(e) => AuthError::StateStore(e.to_string()),
        }
    }
}

impl AuthError {
    /// Infrastructure failures, as opposed to authentication decisions.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            AuthError::Repository(_)
                | AuthError::GroupResolution(_)
                | AuthError::Session(_)
                | AuthError::StateStore(_)
                | AuthError::Internal(_)
        )
    }
}

/// Error body: `{"error": {"type": ..., "code": ..., "message": ...}}`.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    #[serde(rename = "type")]
    error_type: &'static str,
    code: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_credentials",
            ),
            AuthError::UnknownToken => (
                StatusCode::BAD_REQUEST,
                "authentication_error",
                "unknown_token",
            ),
            AuthError::StateNotFound => (
                StatusCode::BAD_REQUEST,
                "authentication_error",
                "state_not_found",
            ),
            AuthError::SessionNotEstablished => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "session_not_established",
            ),
            AuthError::MissingAttributes => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "missing_attributes",
            ),
            AuthError::Repository(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "repository_failure",
            ),
            AuthError::GroupResolution(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "group_resolution_failure",
            ),
            AuthError::Session(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "session_store_failure",
            ),
            AuthError::StateStore(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "state_store_failure",
            ),
            AuthError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
            ),
        };

        metrics::record_auth_error(error_type, code);

        // Faults are logged in full but reported generically
        let message = if self.is_fault() {
            tracing::error!(error = %self, code, "Authentication request failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorInfo {
                error_type,
                code,
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
