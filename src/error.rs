//! Error taxonomy for the authorization server.
//!
//! Protocol errors surface to callers as RFC 6749 §5.2 / OIDC Core error
//! codes. Manager, store and configuration failures stay internal and are
//! rendered as `server_error` on the wire with details only in the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Standard protocol error codes (RFC 6749 §4.1.2.1, §5.2 and OIDC Core §3.1.2.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    ServerError,
    TemporarilyUnavailable,
    InvalidToken,
    InteractionRequired,
    LoginRequired,
    ConsentRequired,
    RequestNotSupported,
    RequestUriNotSupported,
    RegistrationNotSupported,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidClient => "invalid_client",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::UnsupportedResponseType => "unsupported_response_type",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::ServerError => "server_error",
            ErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::InteractionRequired => "interaction_required",
            ErrorCode::LoginRequired => "login_required",
            ErrorCode::ConsentRequired => "consent_required",
            ErrorCode::RequestNotSupported => "request_not_supported",
            ErrorCode::RequestUriNotSupported => "request_uri_not_supported",
            ErrorCode::RegistrationNotSupported => "registration_not_supported",
        }
    }

    /// HTTP status used when the error is returned directly (not via redirect).
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidClient | ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol-level rejection, rendered on the wire per RFC 6749 §5.2.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{code}: {}", description.as_deref().unwrap_or("(no description)"))]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub description: Option<String>,
    pub uri: Option<String>,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
            uri: None,
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidClient, description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidGrant, description)
    }

    pub fn server_error() -> Self {
        Self::new(ErrorCode::ServerError, "An internal error occurred.")
    }
}

/// Store-layer failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed; the entity changed under us.
    #[error("The entity was modified concurrently")]
    Concurrency,

    #[error("Entity not found")]
    NotFound,

    #[error("Persisted payload could not be decoded: {0}")]
    Corrupted(String),

    #[error("Database error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Manager-layer failure.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Aggregate of one-line validation messages for the rejected entity.
    #[error("Entity validation failed: {}", messages.join("; "))]
    Validation { messages: Vec<String> },

    /// Optimistic concurrency conflict; the caller must reload and retry.
    #[error("Concurrency conflict")]
    Concurrency,

    #[error("Entity not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ManagerError {
    pub fn validation(messages: Vec<String>) -> Self {
        ManagerError::Validation { messages }
    }
}

impl From<sqlx::Error> for ManagerError {
    fn from(error: sqlx::Error) -> Self {
        ManagerError::Store(StoreError::Backend(error))
    }
}

/// Pipeline-level failure: anything that is not a protocol rejection.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Missing required handlers, missing services, inconsistent options.
    /// Fails fast at dispatch rather than producing a half-built response.
    #[error("Server misconfiguration: {0}")]
    Configuration(String),

    #[error("The transaction was cancelled")]
    Cancelled,

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("Token serialization failed: {0}")]
    TokenSerialization(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ServerError {
    fn from(error: StoreError) -> Self {
        ServerError::Manager(ManagerError::Store(error))
    }
}

#[derive(Serialize)]
struct WireError<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_uri: Option<&'a str>,
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let body = Json(WireError {
            error: self.code.as_str(),
            error_description: self.description.as_deref(),
            error_uri: self.uri.as_deref(),
        });
        (self.code.status(), body).into_response()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::Cancelled => {
                // Client went away; the status is mostly cosmetic.
                StatusCode::BAD_REQUEST.into_response()
            }
            error => {
                tracing::error!(%error, "request failed with an internal error");
                ProtocolError::server_error().into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_rfc_6749() {
        assert_eq!(ErrorCode::InvalidRequest.as_str(), "invalid_request");
        assert_eq!(
            ErrorCode::UnsupportedResponseType.as_str(),
            "unsupported_response_type"
        );
        assert_eq!(
            ErrorCode::RequestUriNotSupported.as_str(),
            "request_uri_not_supported"
        );
    }

    #[test]
    fn test_invalid_client_maps_to_401() {
        assert_eq!(ErrorCode::InvalidClient.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::InvalidGrant.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::ServerError.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_error_aggregates_messages() {
        let error = ManagerError::validation(vec![
            "The type is required".to_string(),
            "The subject is required".to_string(),
        ]);
        let rendered = error.to_string();
        assert!(rendered.contains("The type is required"));
        assert!(rendered.contains("The subject is required"));
    }
}
