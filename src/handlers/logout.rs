//! Logout (end-session) endpoint state machine (OIDC RP-Initiated Logout).

use async_trait::async_trait;

use crate::config::AppState;
use crate::error::{ErrorCode, ServerError};
use crate::models::Application;
use crate::pipeline::{ApplyContext, Disposition, EventHandler, HandleContext, ValidateContext};
use crate::protocol::constants::params;
use crate::protocol::transaction::properties;
use crate::tokens::{deserialize_grant, DeserializeTokenEvent, GrantKind};

/// Validates `post_logout_redirect_uri` against the registered set of the
/// client identified by `client_id` or the `id_token_hint` audience.
pub struct ValidatePostLogoutRedirectUri;

#[async_trait]
impl EventHandler<ValidateContext> for ValidatePostLogoutRedirectUri {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(uri) = context.transaction.request.post_logout_redirect_uri().map(str::to_owned)
        else {
            return Ok(());
        };

        let Some(application) = resolve_logout_client(state, context).await? else {
            context.reject(
                ErrorCode::InvalidRequest,
                "post_logout_redirect_uri cannot be validated without client identification.",
            );
            return Ok(());
        };

        if !application.has_post_logout_redirect_uri(&uri) {
            tracing::info!(
                client_id = %application.client_id,
                post_logout_redirect_uri = %uri,
                "post-logout redirect target not registered"
            );
            context.reject(
                ErrorCode::InvalidRequest,
                "The specified post_logout_redirect_uri is not valid for this client application.",
            );
            return Ok(());
        }

        context
            .transaction
            .set_property(properties::VALIDATED_POST_LOGOUT_REDIRECT_URI, uri);
        Ok(())
    }
}

/// The host's logout handler (running earlier) must have approved the
/// sign-out; nothing is redirected on refusal.
pub struct RequireLogoutAccepted;

#[async_trait]
impl EventHandler<HandleContext> for RequireLogoutAccepted {
    async fn handle(
        &self,
        context: &mut HandleContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        if !context.is_logout_allowed {
            context.reject(
                ErrorCode::AccessDenied,
                "The logout request was not approved.",
            );
        }
        Ok(())
    }
}

/// Redirects to the validated post-logout target, echoing `state`.
pub struct ApplyLogoutResponse;

#[async_trait]
impl EventHandler<ApplyContext> for ApplyLogoutResponse {
    async fn handle(
        &self,
        context: &mut ApplyContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(location) = context
            .transaction
            .property_str(properties::VALIDATED_POST_LOGOUT_REDIRECT_URI)
            .map(str::to_owned)
        else {
            context.disposition = Disposition::Json;
            return Ok(());
        };
        // Errors never travel to the post-logout target.
        if context.transaction.response.error().is_some() {
            context.disposition = Disposition::Json;
            return Ok(());
        }

        let mut target = url::Url::parse(&location).map_err(|e| {
            ServerError::Configuration(format!("validated post-logout URI unparsable: {e}"))
        })?;
        if let Some(value) = context.transaction.request.state() {
            target.query_pairs_mut().append_pair(params::STATE, value);
        }

        context.disposition = Disposition::Redirect {
            location: target.to_string(),
        };
        Ok(())
    }
}

/// Finds the application a logout request speaks for: explicit `client_id`
/// first, then the audience of a verifiable `id_token_hint`.
async fn resolve_logout_client(
    state: &AppState,
    context: &ValidateContext,
) -> Result<Option<Application>, ServerError> {
    if let Some(client_id) = context.transaction.request.client_id() {
        return Ok(state.applications()?.find_by_client_id(client_id).await?);
    }

    if let Some(hint) = context.transaction.request.id_token_hint() {
        let event = deserialize_grant(
            state.serializer.as_ref(),
            DeserializeTokenEvent::from_wire(GrantKind::IdentityToken, hint),
        )
        .await?;
        if let Some(principal) = event.principal {
            for audience in &principal.audiences {
                if let Some(application) =
                    state.applications()?.find_by_client_id(audience).await?
                {
                    return Ok(Some(application));
                }
            }
        }
    }

    Ok(None)
}
