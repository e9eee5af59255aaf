//! Userinfo endpoint state machine (OIDC Core §5.3).
//!
//! The bearer access token is verified, its entity checked for revocation,
//! and the standard claims are emitted scope by scope: only what the grant
//! covers leaves the server.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AppState;
use crate::error::{ErrorCode, ServerError};
use crate::pipeline::{EventHandler, HandleContext, ValidateContext};
use crate::protocol::constants::{claims, scopes};
use crate::protocol::{Parameter, Principal};
use crate::tokens::{deserialize_grant, DeserializeTokenEvent, GrantKind};

/// Property keys local to the userinfo pipeline.
const USERINFO_PRINCIPAL: &str = "userinfo_principal";
const USERINFO_TOKEN_ID: &str = "userinfo_token_id";
/// Set when the owning client registered for signed userinfo responses.
const USERINFO_SIGN_FOR: &str = "userinfo_sign_for";

pub struct ValidateAccessToken;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateAccessToken {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(token) = context.transaction.request.access_token().map(str::to_owned) else {
            context.reject(
                ErrorCode::InvalidToken,
                "The mandatory access token is missing.",
            );
            return Ok(());
        };

        let event = deserialize_grant(
            state.serializer.as_ref(),
            DeserializeTokenEvent::from_wire(GrantKind::AccessToken, token),
        )
        .await?;

        let (Some(principal), token_id) = (event.principal, event.token_id) else {
            context.reject(
                ErrorCode::InvalidToken,
                "The specified access token is invalid or has expired.",
            );
            return Ok(());
        };

        context.transaction.set_property(
            USERINFO_PRINCIPAL,
            serde_json::to_value(&principal)
                .map_err(|e| ServerError::TokenSerialization(e.to_string()))?,
        );
        if let Some(token_id) = token_id {
            context.transaction.set_property(USERINFO_TOKEN_ID, token_id);
        }
        Ok(())
    }
}

/// A valid signature is not the whole story: the backing entity may have
/// been revoked since issuance.
pub struct ValidateTokenEntityStatus;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateTokenEntityStatus {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(token_id) = context.transaction.property_str(USERINFO_TOKEN_ID).map(str::to_owned)
        else {
            return Ok(());
        };

        if let Some(entity) = state.tokens()?.find_by_id(&token_id).await? {
            if !entity.is_valid() {
                context.reject(
                    ErrorCode::InvalidToken,
                    "The specified access token is no longer valid.",
                );
            }
        }
        Ok(())
    }
}

/// Hands the endpoint to the host application once the token has been
/// validated.
pub struct HandleUserinfoPassthrough;

#[async_trait]
impl EventHandler<HandleContext> for HandleUserinfoPassthrough {
    async fn handle(
        &self,
        context: &mut HandleContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        context.skip_request();
        Ok(())
    }
}

pub struct HandleUserinfo;

#[async_trait]
impl EventHandler<HandleContext> for HandleUserinfo {
    async fn handle(
        &self,
        context: &mut HandleContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let principal: Principal = context
            .transaction
            .property(USERINFO_PRINCIPAL)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| {
                ServerError::Configuration(
                    "userinfo handling reached without a validated principal".to_string(),
                )
            })?;

        let response = &mut context.transaction.response;
        // The subject claim is mandatory (OIDC Core §5.3.2).
        response.set(claims::SUBJECT, principal.subject.clone());

        if principal.has_scope(scopes::PROFILE) {
            copy_claims(
                response,
                &principal,
                &[
                    claims::NAME,
                    claims::FAMILY_NAME,
                    claims::GIVEN_NAME,
                    claims::PREFERRED_USERNAME,
                    claims::PROFILE,
                    claims::WEBSITE,
                    claims::BIRTHDATE,
                ],
            );
        }
        if principal.has_scope(scopes::EMAIL) {
            copy_claims(response, &principal, &[claims::EMAIL, claims::EMAIL_VERIFIED]);
        }
        if principal.has_scope(scopes::PHONE) {
            copy_claims(
                response,
                &principal,
                &[claims::PHONE_NUMBER, claims::PHONE_NUMBER_VERIFIED],
            );
        }
        if principal.has_scope(scopes::ADDRESS) {
            // address is a JSON object claim, not a flat string.
            if let Some(value) = principal.claim(claims::ADDRESS) {
                response.set(claims::ADDRESS, Parameter::from_json(value.clone()));
            }
        }

        // A client registered for signed userinfo gets a JWT instead of a
        // JSON body; the apply stage performs the signing.
        if !context.transaction.options().degraded_mode {
            if let Some(client_id) = principal.audiences.first().cloned() {
                if let Some(application) =
                    state.applications()?.find_by_client_id(&client_id).await?
                {
                    if application
                        .has_permission(crate::models::permissions::features::SIGNED_USERINFO)
                    {
                        context.transaction.set_property(USERINFO_SIGN_FOR, client_id);
                    }
                }
            }
        }

        context.handle_request();
        Ok(())
    }
}

/// Signs the claims set when the client asked for JWT userinfo responses.
pub struct ApplyUserinfoResponse;

#[async_trait]
impl EventHandler<crate::pipeline::ApplyContext> for ApplyUserinfoResponse {
    async fn handle(
        &self,
        context: &mut crate::pipeline::ApplyContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(client_id) = context
            .transaction
            .property_str(USERINFO_SIGN_FOR)
            .map(str::to_owned)
        else {
            return Ok(());
        };
        if context.transaction.response.error().is_some() {
            return Ok(());
        }

        let subject = context
            .transaction
            .response
            .get_str(claims::SUBJECT)
            .unwrap_or_default()
            .to_string();
        let mut principal = Principal::new(subject);
        for (name, parameter) in context.transaction.response.iter() {
            if name != claims::SUBJECT {
                principal.set_claim(name, parameter.to_json());
            }
        }

        let mut event = crate::tokens::SerializeTokenEvent::new(
            crate::tokens::GrantKind::IdentityToken,
            principal,
            client_id.as_str(),
        );
        event.issuer = context
            .transaction
            .issuer()
            .map(|u| u.as_str().trim_end_matches('/').to_string());
        event.token_id = uuid::Uuid::new_v4().to_string();
        event.lifetime_secs = context.transaction.options().identity_token_lifetime;

        let event = crate::tokens::serialize_grant(state.serializer.as_ref(), event).await?;
        context.disposition = crate::pipeline::Disposition::Jwt {
            token: event.token.expect("serializer contract"),
        };
        Ok(())
    }
}

fn copy_claims(response: &mut crate::protocol::Response, principal: &Principal, names: &[&str]) {
    for name in names {
        if let Some(value) = principal.claim(name) {
            match value {
                Value::Null => {}
                other => response.set(*name, Parameter::from_json(other.clone())),
            }
        }
    }
}
