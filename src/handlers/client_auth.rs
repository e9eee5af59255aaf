//! Client authentication for the client-facing endpoints (RFC 6749 §2.3).
//!
//! HTTP Basic credentials are decoded by the host into the `client_id` /
//! `client_secret` parameters before the pipeline runs, so this module only
//! sees the parameter form.

use crate::config::AppState;
use crate::error::{ErrorCode, ProtocolError, ServerError};
use crate::models::Application;
use crate::protocol::Request;

/// Resolves and authenticates the calling client.
///
/// Confidential clients must present their secret; public clients must not
/// present one at all. Failures are deliberately uniform: the caller learns
/// only `invalid_client`, never which part was wrong.
pub async fn authenticate_client(
    state: &AppState,
    request: &Request,
) -> Result<Application, AuthenticationError> {
    let client_id = request
        .client_id()
        .ok_or_else(|| AuthenticationError::rejected("The client_id parameter is missing."))?;

    let application = state
        .applications()
        .map_err(AuthenticationError::Server)?
        .find_by_client_id(client_id)
        .await
        .map_err(|e| AuthenticationError::Server(e.into()))?
        .ok_or_else(|| {
            AuthenticationError::rejected("The client application cannot be found.")
        })?;

    match (application.is_confidential(), request.client_secret()) {
        (true, Some(secret)) => {
            let valid = state
                .applications()
                .map_err(AuthenticationError::Server)?
                .validate_client_secret(&application, secret);
            if !valid {
                tracing::warn!(client_id, "client secret verification failed");
                return Err(AuthenticationError::rejected(
                    "The client credentials are invalid.",
                ));
            }
        }
        (true, None) => {
            return Err(AuthenticationError::rejected(
                "Client authentication is required for this client.",
            ));
        }
        (false, Some(_)) => {
            // A secret from a public client is a configuration smell on the
            // caller's side and must not be silently accepted.
            return Err(AuthenticationError::rejected(
                "Public clients cannot send a client secret.",
            ));
        }
        (false, None) => {}
    }

    Ok(application)
}

/// Either a protocol rejection or an internal failure.
pub enum AuthenticationError {
    Rejected(ProtocolError),
    Server(ServerError),
}

impl AuthenticationError {
    fn rejected(description: &str) -> Self {
        AuthenticationError::Rejected(ProtocolError::new(ErrorCode::InvalidClient, description))
    }
}
