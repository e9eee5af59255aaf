//! Revocation endpoint state machine (RFC 7009).
//!
//! Revocation always succeeds from the caller's point of view: unknown and
//! foreign tokens are acknowledged without action so the endpoint cannot be
//! used as an oracle. Revoking a refresh token cascades to the tokens that
//! share its authorization.

use async_trait::async_trait;

use crate::config::AppState;
use crate::error::{ErrorCode, ServerError};
use crate::handlers::client_auth::{authenticate_client, AuthenticationError};
use crate::handlers::introspection::resolve_token;
use crate::models::TokenType;
use crate::pipeline::{EventHandler, HandleContext, ValidateContext};

pub struct ValidateTokenParameter;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateTokenParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        if context.transaction.request.token().map_or(true, str::is_empty) {
            context.reject(
                ErrorCode::InvalidRequest,
                "The mandatory token parameter is missing.",
            );
        }
        Ok(())
    }
}

pub struct ValidateClientAuthentication;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateClientAuthentication {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        match authenticate_client(state, &context.transaction.request).await {
            Ok(application) => {
                context.client_id = Some(application.client_id);
                Ok(())
            }
            Err(AuthenticationError::Rejected(error)) => {
                context.reject_with(error);
                Ok(())
            }
            Err(AuthenticationError::Server(error)) => Err(error),
        }
    }
}

pub struct HandleRevocation;

#[async_trait]
impl EventHandler<HandleContext> for HandleRevocation {
    async fn handle(
        &self,
        context: &mut HandleContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let presented = context
            .transaction
            .request
            .token()
            .map(str::to_owned)
            .unwrap_or_default();

        let caller = {
            let client_id = context.transaction.request.client_id().ok_or_else(|| {
                ServerError::Configuration("client_id lost after validation".to_string())
            })?;
            state
                .applications()?
                .find_by_client_id(client_id)
                .await?
                .ok_or_else(|| {
                    ServerError::Configuration("client application lost after validation".into())
                })?
        };

        let Some((mut token, _)) = resolve_token(state, &presented).await? else {
            // Unknown tokens are not an error (RFC 7009 §2.2).
            context.handle_request();
            return Ok(());
        };

        if token.application_id != caller.id {
            tracing::info!(
                caller = %caller.client_id,
                token = %token.id,
                "revocation of a foreign token ignored"
            );
            context.handle_request();
            return Ok(());
        }

        let was_refresh = token.kind == TokenType::Refresh;
        let authorization_id = token.authorization_id.clone();
        state.tokens()?.revoke(&mut token).await?;

        if was_refresh {
            if let Some(authorization_id) = authorization_id {
                state
                    .tokens()?
                    .revoke_by_authorization_id(&authorization_id)
                    .await?;
            }
        }

        context.handle_request();
        Ok(())
    }
}
