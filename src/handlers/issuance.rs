//! Grant minting shared by the authorization and token endpoints.
//!
//! Self-contained tokens (access, identity) are persisted first so their
//! entity id doubles as the JWT `jti`. Opaque grants (codes, refresh tokens)
//! are serialized first; the entity then stores the principal payload and the
//! SHA-256 digest of the wire handle as its reference id.

use chrono::{Duration, Utc};
use serde_json::json;

use crate::config::AppState;
use crate::error::ServerError;
use crate::models::{Application, TokenStatus, TokenType};
use crate::dto::descriptors::TokenDescriptor;
use crate::protocol::Principal;
use crate::tokens::{serialize_grant, GrantKind, SerializeTokenEvent};
use crate::utils::secret::hash_handle;

fn issuer_string(transaction_issuer: Option<&url::Url>) -> Option<String> {
    transaction_issuer.map(|u| u.as_str().trim_end_matches('/').to_string())
}

/// Mints a signed access token, persisting its entity unless the server runs
/// degraded. Returns the wire token and its lifetime in seconds.
pub async fn mint_access_token(
    state: &AppState,
    issuer: Option<&url::Url>,
    application: &Application,
    principal: &Principal,
    authorization_id: Option<&str>,
) -> Result<(String, i64), ServerError> {
    let lifetime = state.options.access_token_lifetime;

    let token_id = if state.options.degraded_mode {
        uuid::Uuid::new_v4().to_string()
    } else {
        let descriptor = TokenDescriptor {
            application_id: Some(application.id.clone()),
            authorization_id: authorization_id.map(str::to_owned),
            subject: Some(principal.subject.clone()),
            kind: Some(TokenType::Access),
            status: Some(TokenStatus::Valid),
            expiration_date: Some(Utc::now() + Duration::seconds(lifetime)),
            ..TokenDescriptor::default()
        };
        state.tokens()?.create(&descriptor).await?.id
    };

    let mut event =
        SerializeTokenEvent::new(GrantKind::AccessToken, principal.clone(), application.client_id.as_str());
    event.issuer = issuer_string(issuer);
    event.token_id = token_id;
    event.lifetime_secs = lifetime;

    let event = serialize_grant(state.serializer.as_ref(), event).await?;
    Ok((event.token.expect("serializer contract"), lifetime))
}

/// Mints a signed identity token for OIDC flows.
pub async fn mint_identity_token(
    state: &AppState,
    issuer: Option<&url::Url>,
    application: &Application,
    principal: &Principal,
    authorization_id: Option<&str>,
    nonce: Option<&str>,
) -> Result<String, ServerError> {
    let lifetime = state.options.identity_token_lifetime;

    let token_id = if state.options.degraded_mode {
        uuid::Uuid::new_v4().to_string()
    } else {
        let descriptor = TokenDescriptor {
            application_id: Some(application.id.clone()),
            authorization_id: authorization_id.map(str::to_owned),
            subject: Some(principal.subject.clone()),
            kind: Some(TokenType::IdToken),
            status: Some(TokenStatus::Valid),
            expiration_date: Some(Utc::now() + Duration::seconds(lifetime)),
            ..TokenDescriptor::default()
        };
        state.tokens()?.create(&descriptor).await?.id
    };

    let mut event = SerializeTokenEvent::new(
        GrantKind::IdentityToken,
        principal.clone(),
        application.client_id.as_str(),
    );
    event.issuer = issuer_string(issuer);
    event.token_id = token_id;
    event.lifetime_secs = lifetime;
    event.nonce = nonce.map(str::to_owned);

    let event = serialize_grant(state.serializer.as_ref(), event).await?;
    Ok(event.token.expect("serializer contract"))
}

/// Mints an opaque refresh token backed by a persisted entity.
pub async fn mint_refresh_token(
    state: &AppState,
    application: &Application,
    principal: &Principal,
    authorization_id: Option<&str>,
) -> Result<String, ServerError> {
    let event = SerializeTokenEvent::new(
        GrantKind::RefreshToken,
        principal.clone(),
        application.client_id.as_str(),
    );
    let event = serialize_grant(state.serializer.as_ref(), event).await?;
    let handle = event.token.expect("serializer contract");

    let descriptor = TokenDescriptor {
        reference_id: Some(hash_handle(&handle)),
        application_id: Some(application.id.clone()),
        authorization_id: authorization_id.map(str::to_owned),
        subject: Some(principal.subject.clone()),
        kind: Some(TokenType::Refresh),
        status: Some(TokenStatus::Valid),
        expiration_date: Some(
            Utc::now() + Duration::seconds(state.options.refresh_token_lifetime),
        ),
        payload: event.payload,
        ..TokenDescriptor::default()
    };
    state.tokens()?.create(&descriptor).await?;

    Ok(handle)
}

/// Mints a single-use authorization code bound to its redirect URI and PKCE
/// challenge.
pub async fn mint_authorization_code(
    state: &AppState,
    application: &Application,
    principal: &Principal,
    authorization_id: Option<&str>,
    redirect_uri: Option<&str>,
    code_challenge: Option<&str>,
    code_challenge_method: Option<&str>,
) -> Result<String, ServerError> {
    let event = SerializeTokenEvent::new(
        GrantKind::AuthorizationCode,
        principal.clone(),
        application.client_id.as_str(),
    );
    let event = serialize_grant(state.serializer.as_ref(), event).await?;
    let handle = event.token.expect("serializer contract");

    let descriptor = TokenDescriptor {
        reference_id: Some(hash_handle(&handle)),
        application_id: Some(application.id.clone()),
        authorization_id: authorization_id.map(str::to_owned),
        subject: Some(principal.subject.clone()),
        kind: Some(TokenType::AuthorizationCode),
        status: Some(TokenStatus::Valid),
        expiration_date: Some(
            Utc::now() + Duration::seconds(state.options.authorization_code_lifetime),
        ),
        payload: event.payload,
        properties: Some(json!({
            "redirect_uri": redirect_uri,
            "code_challenge": code_challenge,
            "code_challenge_method": code_challenge_method,
        })),
        ..TokenDescriptor::default()
    };
    state.tokens()?.create(&descriptor).await?;

    Ok(handle)
}
