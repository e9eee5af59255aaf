//! Token endpoint state machine (RFC 6749 §3.2).
//!
//! Validation authenticates the client and resolves the presented grant;
//! handling redeems it and mints the fresh token set. Authorization codes are
//! redeemed with a conditional status transition, so a concurrent replay
//! loses the race and is answered with `invalid_grant`.

use async_trait::async_trait;

use crate::config::AppState;
use crate::error::{ErrorCode, ServerError};
use crate::handlers::client_auth::{authenticate_client, AuthenticationError};
use crate::handlers::issuance::{
    mint_access_token, mint_identity_token, mint_refresh_token,
};
use crate::models::{Application, Token, TokenType};
use crate::pipeline::{ApplyContext, EventHandler, HandleContext, ValidateContext};
use crate::protocol::constants::{grant_types, scopes, token_types};
use crate::protocol::Principal;
use crate::tokens::{deserialize_grant, DeserializeTokenEvent, GrantKind};
use crate::utils::pkce::{is_valid_code_verifier, CodeChallengeMethod};
use crate::utils::secret::hash_handle;

/// Property key: entity id of the grant resolved during validation.
const RESOLVED_TOKEN_ID: &str = "resolved_token_id";

const SUPPORTED_GRANT_TYPES: &[&str] = &[
    grant_types::AUTHORIZATION_CODE,
    grant_types::REFRESH_TOKEN,
    grant_types::CLIENT_CREDENTIALS,
    grant_types::PASSWORD,
    grant_types::DEVICE_CODE,
];

pub struct ValidateGrantType;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateGrantType {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let options = context.transaction.options().clone();
        let request = &context.transaction.request;

        let Some(grant_type) = request.grant_type().filter(|g| !g.is_empty()) else {
            context.reject(
                ErrorCode::InvalidRequest,
                "The mandatory grant_type parameter is missing.",
            );
            return Ok(());
        };

        if !SUPPORTED_GRANT_TYPES.contains(&grant_type) {
            context.reject(
                ErrorCode::UnsupportedGrantType,
                "The specified grant_type parameter is not supported.",
            );
            return Ok(());
        }

        let enabled = match grant_type {
            grant_types::AUTHORIZATION_CODE => options.enable_authorization_code_flow,
            grant_types::REFRESH_TOKEN => options.enable_refresh_token_grant,
            grant_types::CLIENT_CREDENTIALS => options.enable_client_credentials_grant,
            grant_types::PASSWORD => options.enable_password_grant,
            grant_types::DEVICE_CODE => options.enable_device_code_grant,
            _ => false,
        };
        if !enabled {
            context.reject(
                ErrorCode::UnsupportedGrantType,
                "The specified grant_type is disabled on this server.",
            );
        }
        Ok(())
    }
}

/// Per-grant mandatory parameters.
pub struct ValidateGrantParameters;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateGrantParameters {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let request = &context.transaction.request;

        if request.is_authorization_code_grant_type() {
            if request.code().map_or(true, str::is_empty) {
                context.reject(
                    ErrorCode::InvalidRequest,
                    "The mandatory code parameter is missing.",
                );
                return Ok(());
            }
            if request.redirect_uri().map_or(true, str::is_empty) {
                context.reject(
                    ErrorCode::InvalidRequest,
                    "The mandatory redirect_uri parameter is missing.",
                );
                return Ok(());
            }
        }
        if request.is_refresh_token_grant_type()
            && request.refresh_token().map_or(true, str::is_empty)
        {
            context.reject(
                ErrorCode::InvalidRequest,
                "The mandatory refresh_token parameter is missing.",
            );
            return Ok(());
        }
        if request.is_password_grant_type()
            && (request.username().map_or(true, str::is_empty)
                || request.password().map_or(true, str::is_empty))
        {
            context.reject(
                ErrorCode::InvalidRequest,
                "The mandatory username and password parameters are missing.",
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

pub struct ValidateEndpointPermissions;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateEndpointPermissions {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(application) = resolve_client(state, context).await? else {
            return Ok(());
        };
        if !application.has_permission(crate::models::permissions::endpoints::TOKEN) {
            context.reject(
                ErrorCode::UnauthorizedClient,
                "This client application is not allowed to use the token endpoint.",
            );
        }
        Ok(())
    }
}

pub struct ValidateGrantTypePermissions;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateGrantTypePermissions {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(application) = resolve_client(state, context).await? else {
            return Ok(());
        };
        let Some(grant_type) = context.transaction.request.grant_type() else {
            return Ok(());
        };

        if !application.has_permission(&format!("gt:{grant_type}")) {
            context.reject(
                ErrorCode::UnauthorizedClient,
                "This client application is not allowed to use the specified grant_type.",
            );
        }
        Ok(())
    }
}

pub struct ValidateScopesRegistered;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateScopesRegistered {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let requested: Vec<String> = context
            .transaction
            .request
            .scopes()
            .into_iter()
            .filter(|s| *s != scopes::OPENID && *s != scopes::OFFLINE_ACCESS)
            .map(str::to_owned)
            .collect();

        if !state.scopes()?.all_registered(&requested).await? {
            context.reject(
                ErrorCode::InvalidScope,
                "The specified scope parameter contains unregistered scopes.",
            );
        }
        Ok(())
    }
}

/// Resolves and checks the presented authorization code: existence, type,
/// expiry, owning client, redirect URI binding and the PKCE verifier.
pub struct ValidateAuthorizationCodeGrant;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateAuthorizationCodeGrant {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        if !context.transaction.request.is_authorization_code_grant_type() {
            return Ok(());
        }
        let Some(code) = context.transaction.request.code() else {
            return Ok(());
        };

        let Some(token) = state
            .tokens()?
            .find_by_reference_id(&hash_handle(code))
            .await?
        else {
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified authorization code is invalid.",
            );
            return Ok(());
        };

        if token.kind != TokenType::AuthorizationCode {
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified authorization code is invalid.",
            );
            return Ok(());
        }
        if token.is_expired() || !matches!(token.status, crate::models::TokenStatus::Valid) {
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified authorization code is no longer valid.",
            );
            return Ok(());
        }

        let Some(application) = resolve_client(state, context).await? else {
            return Ok(());
        };
        if token.application_id != application.id {
            tracing::warn!(
                client_id = %application.client_id,
                "authorization code presented by a different client"
            );
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified authorization code was not issued to this client.",
            );
            return Ok(());
        }

        // The redirect_uri must replay the one bound at issuance.
        let bound_redirect = token
            .properties
            .as_ref()
            .and_then(|p| p.get("redirect_uri"))
            .and_then(|v| v.as_str());
        if bound_redirect != context.transaction.request.redirect_uri() {
            context.reject(
                ErrorCode::InvalidGrant,
                "The redirect_uri does not match the one used in the authorization request.",
            );
            return Ok(());
        }

        if let Some(challenge) = token
            .properties
            .as_ref()
            .and_then(|p| p.get("code_challenge"))
            .and_then(|v| v.as_str())
        {
            let method = token
                .properties
                .as_ref()
                .and_then(|p| p.get("code_challenge_method"))
                .and_then(|v| v.as_str())
                .and_then(CodeChallengeMethod::parse)
                .unwrap_or(CodeChallengeMethod::Plain);

            let Some(verifier) = context.transaction.request.code_verifier() else {
                context.reject(
                    ErrorCode::InvalidRequest,
                    "The mandatory code_verifier parameter is missing.",
                );
                return Ok(());
            };
            if !is_valid_code_verifier(verifier) {
                context.reject(
                    ErrorCode::InvalidGrant,
                    "The specified code_verifier is malformed.",
                );
                return Ok(());
            }
            if !method.verify(verifier, challenge) {
                tracing::warn!("PKCE verification failed");
                context.reject(
                    ErrorCode::InvalidGrant,
                    "The specified code_verifier does not match the code_challenge.",
                );
                return Ok(());
            }
        }

        let token_id = token.id.clone();
        context.transaction.set_property(RESOLVED_TOKEN_ID, token_id);
        Ok(())
    }
}

/// Resolves and checks the presented refresh token.
pub struct ValidateRefreshTokenGrant;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateRefreshTokenGrant {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        if !context.transaction.request.is_refresh_token_grant_type() {
            return Ok(());
        }
        let Some(handle) = context.transaction.request.refresh_token() else {
            return Ok(());
        };

        let Some(token) = state
            .tokens()?
            .find_by_reference_id(&hash_handle(handle))
            .await?
        else {
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified refresh token is invalid.",
            );
            return Ok(());
        };

        if token.kind != TokenType::Refresh || !token.is_valid() {
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified refresh token is no longer valid.",
            );
            return Ok(());
        }

        let Some(application) = resolve_client(state, context).await? else {
            return Ok(());
        };
        if token.application_id != application.id {
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified refresh token was not issued to this client.",
            );
            return Ok(());
        }

        let token_id = token.id.clone();
        context.transaction.set_property(RESOLVED_TOKEN_ID, token_id);
        Ok(())
    }
}

pub struct HandleAuthorizationCodeGrant;

#[async_trait]
impl EventHandler<HandleContext> for HandleAuthorizationCodeGrant {
    async fn handle(
        &self,
        context: &mut HandleContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        if !context.transaction.request.is_authorization_code_grant_type() {
            return Ok(());
        }

        let Some(mut token) = resolved_token(state, context).await? else {
            return Ok(());
        };

        // Single-use: exactly one concurrent redemption wins.
        if !state.tokens()?.try_redeem(&mut token).await? {
            tracing::warn!(token = %token.id, "authorization code replay detected");
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified authorization code has already been redeemed.",
            );
            return Ok(());
        }

        let Some(principal) = grant_principal(state, &token, GrantKind::AuthorizationCode).await?
        else {
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified authorization code is invalid.",
            );
            return Ok(());
        };

        let application = authenticated_client(state, context).await?;
        issue_token_set(state, context, &application, principal, token.authorization_id.as_deref())
            .await
    }
}

pub struct HandleRefreshTokenGrant;

#[async_trait]
impl EventHandler<HandleContext> for HandleRefreshTokenGrant {
    async fn handle(
        &self,
        context: &mut HandleContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        if !context.transaction.request.is_refresh_token_grant_type() {
            return Ok(());
        }

        let Some(mut token) = resolved_token(state, context).await? else {
            return Ok(());
        };

        let Some(principal) = grant_principal(state, &token, GrantKind::RefreshToken).await? else {
            context.reject(
                ErrorCode::InvalidGrant,
                "The specified refresh token is invalid.",
            );
            return Ok(());
        };

        // Rotation: the presented token dies with this exchange.
        state.tokens()?.revoke(&mut token).await?;

        let application = authenticated_client(state, context).await?;
        issue_token_set(state, context, &application, principal, token.authorization_id.as_deref())
            .await
    }
}

pub struct HandleClientCredentialsGrant;

#[async_trait]
impl EventHandler<HandleContext> for HandleClientCredentialsGrant {
    async fn handle(
        &self,
        context: &mut HandleContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        if !context.transaction.request.is_client_credentials_grant_type() {
            return Ok(());
        }

        let application = authenticated_client(state, context).await?;
        let granted: Vec<String> = context
            .transaction
            .request
            .scopes()
            .into_iter()
            .map(str::to_owned)
            .collect();

        // The client is its own subject; no user is involved.
        let mut principal = Principal::new(application.client_id.clone()).with_scopes(granted.clone());
        principal.audiences = state.scopes()?.resources_for(&granted).await?;

        let issuer = context.transaction.issuer().cloned();
        let (access_token, expires_in) =
            mint_access_token(state, issuer.as_ref(), &application, &principal, None).await?;

        let response = &mut context.transaction.response;
        response.set_access_token(&access_token);
        response.set_token_type(token_types::BEARER);
        response.set_expires_in(expires_in);
        if !granted.is_empty() {
            response.set_scope(&granted.join(" "));
        }

        tracing::info!(client_id = %application.client_id, "client credentials grant issued");
        context.handle_request();
        Ok(())
    }
}

/// The password grant needs a host-attached handler (running before this
/// one) to verify the resource-owner credentials and attach a principal.
pub struct HandlePasswordGrant;

#[async_trait]
impl EventHandler<HandleContext> for HandlePasswordGrant {
    async fn handle(
        &self,
        context: &mut HandleContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        if !context.transaction.request.is_password_grant_type() {
            return Ok(());
        }

        let Some(mut principal) = context.principal.clone() else {
            context.reject(
                ErrorCode::InvalidGrant,
                "The resource owner credentials are invalid.",
            );
            return Ok(());
        };

        if principal.scopes.is_empty() {
            principal.scopes = context
                .transaction
                .request
                .scopes()
                .into_iter()
                .map(str::to_owned)
                .collect();
        }
        principal.audiences = state.scopes()?.resources_for(&principal.scopes).await?;

        let application = authenticated_client(state, context).await?;
        issue_token_set(state, context, &application, principal, None).await
    }
}

/// Token responses are plain JSON bodies.
pub struct ApplyTokenResponse;

#[async_trait]
impl EventHandler<ApplyContext> for ApplyTokenResponse {
    async fn handle(
        &self,
        context: &mut ApplyContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        if context.transaction.response.access_token().is_some()
            && context.transaction.response.token_type().is_none()
        {
            context.transaction.response.set_token_type(token_types::BEARER);
        }
        Ok(())
    }
}

/// Mints the standard token-response set for a user principal: access token,
/// identity token when `openid` was granted, and a rotated refresh token
/// when the grant is enabled.
async fn issue_token_set(
    state: &AppState,
    context: &mut HandleContext,
    application: &Application,
    principal: Principal,
    authorization_id: Option<&str>,
) -> Result<(), ServerError> {
    let issuer = context.transaction.issuer().cloned();
    let nonce = context.transaction.request.nonce().map(str::to_owned);

    let (access_token, expires_in) = mint_access_token(
        state,
        issuer.as_ref(),
        application,
        &principal,
        authorization_id,
    )
    .await?;

    // Refresh tokens need the token store; degraded servers only hand out
    // self-contained tokens.
    let refresh_token = if context.transaction.options().enable_refresh_token_grant
        && !context.transaction.options().degraded_mode
    {
        Some(mint_refresh_token(state, application, &principal, authorization_id).await?)
    } else {
        None
    };

    let id_token = if principal.has_scope(scopes::OPENID) {
        Some(
            mint_identity_token(
                state,
                issuer.as_ref(),
                application,
                &principal,
                authorization_id,
                nonce.as_deref(),
            )
            .await?,
        )
    } else {
        None
    };

    let response = &mut context.transaction.response;
    response.set_access_token(&access_token);
    response.set_token_type(token_types::BEARER);
    response.set_expires_in(expires_in);
    if let Some(refresh_token) = refresh_token {
        response.set_refresh_token(&refresh_token);
    }
    if let Some(id_token) = id_token {
        response.set_id_token(&id_token);
    }
    if !principal.scopes.is_empty() {
        response.set_scope(&principal.scopes.join(" "));
    }

    tracing::info!(
        client_id = %application.client_id,
        subject = %principal.subject,
        grant_type = context.transaction.request.grant_type().unwrap_or_default(),
        "token set issued"
    );
    context.handle_request();
    Ok(())
}

/// Loads the grant entity resolved during validation.
async fn resolved_token(
    state: &AppState,
    context: &mut HandleContext,
) -> Result<Option<Token>, ServerError> {
    let Some(id) = context.transaction.property_str(RESOLVED_TOKEN_ID).map(str::to_owned) else {
        return Err(ServerError::Configuration(
            "grant handling reached without a resolved token".to_string(),
        ));
    };
    match state.tokens()?.find_by_id(&id).await? {
        Some(token) => Ok(Some(token)),
        None => {
            context.reject(ErrorCode::InvalidGrant, "The specified grant is invalid.");
            Ok(None)
        }
    }
}

/// Rebuilds the principal stored with an opaque grant.
async fn grant_principal(
    state: &AppState,
    token: &Token,
    kind: GrantKind,
) -> Result<Option<Principal>, ServerError> {
    let Some(payload) = token.payload.as_deref() else {
        return Ok(None);
    };
    let event = deserialize_grant(
        state.serializer.as_ref(),
        DeserializeTokenEvent::from_payload(kind, payload),
    )
    .await?;
    Ok(event.principal)
}

async fn authenticated_client(
    state: &AppState,
    context: &HandleContext,
) -> Result<Application, ServerError> {
    let client_id = context.transaction.request.client_id().ok_or_else(|| {
        ServerError::Configuration("client_id lost after validation".to_string())
    })?;
    state
        .applications()?
        .find_by_client_id(client_id)
        .await?
        .ok_or_else(|| ServerError::Configuration("client application lost after validation".into()))
}

async fn resolve_client(
    state: &AppState,
    context: &ValidateContext,
) -> Result<Option<Application>, ServerError> {
    match context.transaction.request.client_id() {
        Some(client_id) => Ok(state.applications()?.find_by_client_id(client_id).await?),
        None => Ok(None),
    }
}
