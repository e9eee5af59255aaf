//! Introspection endpoint state machine (RFC 7662).
//!
//! A caller may only learn about tokens it owns or tokens whose audience it
//! is part of; everything else — unknown, expired, revoked, foreign — is a
//! uniform `active: false`.

use async_trait::async_trait;

use crate::config::AppState;
use crate::error::{ErrorCode, ServerError};
use crate::handlers::client_auth::{authenticate_client, AuthenticationError};
use crate::models::{Token, TokenType};
use crate::pipeline::{EventHandler, HandleContext, ValidateContext};
use crate::protocol::constants::params;
use crate::protocol::Principal;
use crate::tokens::{deserialize_grant, DeserializeTokenEvent, GrantKind};
use crate::utils::secret::hash_handle;

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

pub struct HandleIntrospection;

#[async_trait]
impl EventHandler<HandleContext> for HandleIntrospection {
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

        let Some((token, principal)) = resolve_token(state, &presented).await? else {
            return inactive(context, "unknown token");
        };

        if !token.is_valid() {
            return inactive(context, "token not valid");
        }

        // Ownership or audience membership; nothing else may look inside.
        let is_owner = token.application_id == caller.id;
        let in_audience = principal
            .as_ref()
            .map(|p| p.audiences.iter().any(|a| *a == caller.client_id))
            .unwrap_or(false);
        if !is_owner && !in_audience {
            tracing::info!(
                caller = %caller.client_id,
                token = %token.id,
                "introspection denied for foreign token"
            );
            return inactive(context, "caller not authorized for token");
        }

        let response = &mut context.transaction.response;
        response.set_active(true);
        response.set(params::TOKEN_TYPE_HINT, token.kind.as_str());
        response.set("jti", token.id.clone());
        response.set("iat", token.creation_date.timestamp());
        if let Some(expiration) = token.expiration_date {
            response.set("exp", expiration.timestamp());
        }
        if let Some(subject) = &token.subject {
            response.set("sub", subject.clone());
        }
        if let Some(principal) = &principal {
            if !principal.scopes.is_empty() {
                response.set(params::SCOPE, principal.scopes.join(" "));
            }
            if !principal.audiences.is_empty() {
                response.set(params::AUDIENCE, principal.audiences.clone());
            }
        }
        if let Some(owner) = state.applications()?.find_by_id(&token.application_id).await? {
            response.set(params::CLIENT_ID, owner.client_id);
        }

        context.handle_request();
        Ok(())
    }
}

fn inactive(context: &mut HandleContext, reason: &str) -> Result<(), ServerError> {
    tracing::debug!(reason, "introspection result: inactive");
    context.transaction.response.set_active(false);
    context.handle_request();
    Ok(())
}

/// Resolves a presented token string to its entity: opaque handles through
/// the reference digest, self-contained tokens through their `jti`.
pub(crate) async fn resolve_token(
    state: &AppState,
    presented: &str,
) -> Result<Option<(Token, Option<Principal>)>, ServerError> {
    if let Some(token) = state
        .tokens()?
        .find_by_reference_id(&hash_handle(presented))
        .await?
    {
        let principal = match token.payload.as_deref() {
            Some(payload) => {
                let kind = match token.kind {
                    TokenType::AuthorizationCode => GrantKind::AuthorizationCode,
                    _ => GrantKind::RefreshToken,
                };
                deserialize_grant(
                    state.serializer.as_ref(),
                    DeserializeTokenEvent::from_payload(kind, payload),
                )
                .await?
                .principal
            }
            None => None,
        };
        return Ok(Some((token, principal)));
    }

    // Not a stored handle; try it as a signed access token.
    let event = deserialize_grant(
        state.serializer.as_ref(),
        DeserializeTokenEvent::from_wire(GrantKind::AccessToken, presented),
    )
    .await?;
    let (Some(principal), Some(token_id)) = (event.principal, event.token_id) else {
        return Ok(None);
    };
    // The signature alone is not enough: the entity carries revocation state.
    let Some(token) = state.tokens()?.find_by_id(&token_id).await? else {
        return Ok(None);
    };
    Ok(Some((token, Some(principal))))
}
