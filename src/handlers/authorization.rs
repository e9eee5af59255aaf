//! Authorization endpoint state machine (RFC 6749 §4.1, OIDC Core §3).
//!
//! The validation chain fails fast in registration order. Checks that need
//! the client entity run after the structural gates and are skipped in
//! degraded mode; the redirect URI is only trusted for error redirection once
//! it has been matched against the client's registered set.

use async_trait::async_trait;

use crate::config::AppState;
use crate::dto::descriptors::AuthorizationDescriptor;
use crate::error::{ErrorCode, ServerError};
use crate::handlers::issuance::{
    mint_access_token, mint_authorization_code, mint_identity_token,
};
use crate::models::{permissions, Application, AuthorizationStatus, AuthorizationType, ConsentType};
use crate::pipeline::{ApplyContext, Disposition, EventHandler, HandleContext, ValidateContext};
use crate::protocol::constants::{
    params, prompts, response_modes, response_types, scopes, token_types,
};
use crate::protocol::transaction::properties;
use crate::utils::pkce::CodeChallengeMethod;

/// `request` objects (JAR) are not supported.
pub struct RejectRequestParameter;

#[async_trait]
impl EventHandler<ValidateContext> for RejectRequestParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        if context.transaction.request.has(params::REQUEST) {
            context.reject(
                ErrorCode::RequestNotSupported,
                "The request parameter is not supported.",
            );
        }
        Ok(())
    }
}

/// `request_uri` references (PAR/JAR) are not supported.
pub struct RejectRequestUriParameter;

#[async_trait]
impl EventHandler<ValidateContext> for RejectRequestUriParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        if context.transaction.request.has(params::REQUEST_URI) {
            context.reject(
                ErrorCode::RequestUriNotSupported,
                "The request_uri parameter is not supported.",
            );
        }
        Ok(())
    }
}

pub struct ValidateClientIdParameter;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateClientIdParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        match context.transaction.request.client_id() {
            Some(client_id) if !client_id.is_empty() => {
                context.client_id = Some(client_id.to_string());
            }
            _ => context.reject(
                ErrorCode::InvalidRequest,
                "The mandatory client_id parameter is missing.",
            ),
        }
        Ok(())
    }
}

/// Structural checks on redirect_uri: mandatory for OIDC requests, and when
/// present it must be an absolute URL without a fragment.
pub struct ValidateRedirectUriParameter;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateRedirectUriParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let request = &context.transaction.request;
        match request.redirect_uri() {
            None => {
                // Plain OAuth 2.0 tolerates a pre-registered redirect URI;
                // OpenID Connect does not.
                if request.has_scope(scopes::OPENID) {
                    context.reject(
                        ErrorCode::InvalidRequest,
                        "The mandatory redirect_uri parameter is missing.",
                    );
                }
            }
            Some(uri) => match url::Url::parse(uri) {
                Ok(parsed) if parsed.fragment().is_some() => {
                    context.reject(
                        ErrorCode::InvalidRequest,
                        "The redirect_uri parameter cannot contain a fragment.",
                    );
                }
                Ok(_) => {}
                Err(_) => {
                    context.reject(
                        ErrorCode::InvalidRequest,
                        "The redirect_uri parameter is not a valid absolute URL.",
                    );
                }
            },
        }
        Ok(())
    }
}

pub struct ValidateResponseTypeParameter;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateResponseTypeParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let options = context.transaction.options().clone();
        let request = &context.transaction.request;

        if request.response_type().map_or(true, str::is_empty) {
            context.reject(
                ErrorCode::InvalidRequest,
                "The mandatory response_type parameter is missing.",
            );
            return Ok(());
        }

        if request.has_response_type(response_types::ID_TOKEN)
            && !request.has_scope(scopes::OPENID)
        {
            context.reject(
                ErrorCode::InvalidRequest,
                "The openid scope is required when using response_type=id_token.",
            );
            return Ok(());
        }

        if request.has_response_type(response_types::CODE) && !options.enable_token_endpoint {
            context.reject(
                ErrorCode::UnsupportedResponseType,
                "response_type=code requires the token endpoint, which is disabled.",
            );
            return Ok(());
        }

        let enabled = if request.is_authorization_code_flow() {
            options.enable_authorization_code_flow
        } else if request.is_implicit_flow() {
            options.enable_implicit_flow
        } else if request.is_hybrid_flow() {
            options.enable_hybrid_flow
        } else {
            context.reject(
                ErrorCode::UnsupportedResponseType,
                "The specified response_type parameter is not supported.",
            );
            return Ok(());
        };
        if !enabled {
            context.reject(
                ErrorCode::UnsupportedResponseType,
                "The specified response_type is disabled on this server.",
            );
            return Ok(());
        }

        if request.has_scope(scopes::OFFLINE_ACCESS) && !options.enable_refresh_token_grant {
            context.reject(
                ErrorCode::InvalidRequest,
                "The offline_access scope requires the refresh_token grant, which is disabled.",
            );
        }
        Ok(())
    }
}

pub struct ValidateResponseModeParameter;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateResponseModeParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let request = &context.transaction.request;
        let Some(mode) = request.response_mode() else {
            return Ok(());
        };

        // Tokens in the query string can leak through logs and referrers
        // (OAuth 2.0 Multiple Response Type Encoding Practices §5).
        if mode == response_modes::QUERY
            && (request.has_response_type(response_types::TOKEN)
                || request.has_response_type(response_types::ID_TOKEN))
        {
            context.reject(
                ErrorCode::InvalidRequest,
                "response_mode=query cannot be used with a response_type containing tokens.",
            );
            return Ok(());
        }

        if !matches!(
            mode,
            response_modes::QUERY | response_modes::FRAGMENT | response_modes::FORM_POST
        ) {
            context.reject(
                ErrorCode::InvalidRequest,
                "The specified response_mode parameter is not supported.",
            );
        }
        Ok(())
    }
}

/// The nonce binds identity tokens to the user-agent session; implicit and
/// hybrid OIDC flows cannot run without it.
pub struct ValidateNonceParameter;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateNonceParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let request = &context.transaction.request;
        if (request.is_implicit_flow() || request.is_hybrid_flow())
            && request.has_scope(scopes::OPENID)
            && request.nonce().map_or(true, str::is_empty)
        {
            context.reject(
                ErrorCode::InvalidRequest,
                "The mandatory nonce parameter is missing.",
            );
        }
        Ok(())
    }
}

pub struct ValidatePromptParameter;

#[async_trait]
impl EventHandler<ValidateContext> for ValidatePromptParameter {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let request = &context.transaction.request;
        if request.has_prompt_value(prompts::NONE)
            && (request.has_prompt_value(prompts::LOGIN)
                || request.has_prompt_value(prompts::CONSENT)
                || request.has_prompt_value(prompts::SELECT_ACCOUNT))
        {
            context.reject(
                ErrorCode::InvalidRequest,
                "prompt=none cannot be combined with other prompt values.",
            );
        }
        Ok(())
    }
}

pub struct ValidatePkceParameters;

#[async_trait]
impl EventHandler<ValidateContext> for ValidatePkceParameters {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let options = context.transaction.options().clone();
        let request = &context.transaction.request;

        if request.code_challenge_method().is_some() && request.code_challenge().is_none() {
            context.reject(
                ErrorCode::InvalidRequest,
                "The code_challenge_method parameter cannot be used without code_challenge.",
            );
            return Ok(());
        }

        if let Some(_challenge) = request.code_challenge() {
            if !request.has_response_type(response_types::CODE) {
                context.reject(
                    ErrorCode::InvalidRequest,
                    "code_challenge can only be used with a response_type containing code.",
                );
                return Ok(());
            }
            // Mixing PKCE with tokens returned directly from the
            // authorization endpoint defeats the binding.
            if request.has_response_type(response_types::TOKEN) {
                context.reject(
                    ErrorCode::InvalidRequest,
                    "code_challenge cannot be used with a response_type containing token.",
                );
                return Ok(());
            }
            if let Some(method) = request.code_challenge_method() {
                if CodeChallengeMethod::parse(method).is_none() {
                    context.reject(
                        ErrorCode::InvalidRequest,
                        "The specified code_challenge_method is not supported.",
                    );
                    return Ok(());
                }
            }
        } else if options.require_pkce && request.has_response_type(response_types::CODE) {
            context.reject(
                ErrorCode::InvalidRequest,
                "The mandatory code_challenge parameter is missing.",
            );
        }
        Ok(())
    }
}

/// Resolves the client application. Everything after this point can assume a
/// registered client.
pub struct ValidateClientApplication;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateClientApplication {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(client_id) = context.transaction.request.client_id() else {
            return Ok(());
        };

        if state.applications()?.find_by_client_id(client_id).await?.is_none() {
            tracing::info!(client_id, "authorization request from unknown client");
            context.reject(
                ErrorCode::InvalidClient,
                "The specified client application cannot be found.",
            );
        }
        Ok(())
    }
}

/// Confidential clients must not use the implicit token response type; a
/// stolen client identity would otherwise downgrade to a secretless flow.
pub struct ValidateClientType;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateClientType {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(application) = resolve_client(state, &context.transaction.request).await? else {
            return Ok(());
        };

        if application.is_confidential()
            && context
                .transaction
                .request
                .has_response_type(response_types::TOKEN)
        {
            context.reject(
                ErrorCode::UnauthorizedClient,
                "Confidential clients cannot use response_type=token.",
            );
        }
        Ok(())
    }
}

/// The presented redirect_uri must equal a registered one, byte-for-byte.
pub struct ValidateRedirectUriRegistered;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateRedirectUriRegistered {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(application) = resolve_client(state, &context.transaction.request).await? else {
            return Ok(());
        };
        let Some(uri) = context.transaction.request.redirect_uri() else {
            return Ok(());
        };

        if !state.applications()?.validate_redirect_uri(&application, uri) {
            tracing::info!(
                client_id = %application.client_id,
                redirect_uri = uri,
                "redirect_uri not registered for client"
            );
            context.reject(
                ErrorCode::InvalidRequest,
                "The specified redirect_uri is not valid for this client application.",
            );
        }
        Ok(())
    }
}

/// Marks the redirect_uri safe for response delivery, including error
/// delivery. Runs only once every earlier gate has passed.
pub struct StoreValidatedRedirectUri;

#[async_trait]
impl EventHandler<ValidateContext> for StoreValidatedRedirectUri {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        if let Some(uri) = context.transaction.request.redirect_uri() {
            let uri = uri.to_string();
            context
                .transaction
                .set_property(properties::VALIDATED_REDIRECT_URI, uri);
        }
        Ok(())
    }
}

/// Every requested scope must be registered (minus the OIDC-reserved ones).
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

pub struct ValidateEndpointPermissions;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateEndpointPermissions {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(application) = resolve_client(state, &context.transaction.request).await? else {
            return Ok(());
        };

        if !application.has_permission(permissions::endpoints::AUTHORIZATION) {
            context.reject(
                ErrorCode::UnauthorizedClient,
                "This client application is not allowed to use the authorization endpoint.",
            );
        }
        Ok(())
    }
}

pub struct ValidateResponseTypePermissions;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateResponseTypePermissions {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(application) = resolve_client(state, &context.transaction.request).await? else {
            return Ok(());
        };

        // Permissions store response types in sorted order ("code id_token").
        let mut values: Vec<&str> = context.transaction.request.response_type()
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default();
        values.sort_unstable();
        values.dedup();
        let permission = format!("rst:{}", values.join(" "));

        if !application.has_permission(&permission) {
            context.reject(
                ErrorCode::UnauthorizedClient,
                "This client application is not allowed to use the specified response_type.",
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
        let Some(application) = resolve_client(state, &context.transaction.request).await? else {
            return Ok(());
        };

        if context
            .transaction
            .request
            .has_response_type(response_types::CODE)
            && !application.has_permission(permissions::grant_types::AUTHORIZATION_CODE)
        {
            context.reject(
                ErrorCode::UnauthorizedClient,
                "This client application is not allowed to use the authorization code grant.",
            );
        }
        Ok(())
    }
}

pub struct ValidateScopePermissions;

#[async_trait]
impl EventHandler<ValidateContext> for ValidateScopePermissions {
    async fn handle(
        &self,
        context: &mut ValidateContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        let Some(application) = resolve_client(state, &context.transaction.request).await? else {
            return Ok(());
        };

        for scope in context.transaction.request.scopes() {
            // openid and offline_access are protocol scopes, not permissions.
            if scope == scopes::OPENID || scope == scopes::OFFLINE_ACCESS {
                continue;
            }
            if !application.has_permission(&permissions::scope(scope)) {
                context.reject(
                    ErrorCode::InvalidRequest,
                    format!("This client application is not allowed to request the scope '{scope}'."),
                );
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Turns the attached principal into persisted grants and response
/// parameters. A missing principal here is a host wiring error: something
/// must have produced one (consent UI, programmatic grant) before this point.
pub struct ProcessSignin;

#[async_trait]
impl EventHandler<HandleContext> for ProcessSignin {
    async fn handle(
        &self,
        context: &mut HandleContext,
        state: &AppState,
    ) -> Result<(), ServerError> {
        if context.is_rejected() {
            return Ok(());
        }
        let principal = context.principal.clone().ok_or_else(|| {
            ServerError::Configuration(
                "no handler attached a principal to the authorization request".to_string(),
            )
        })?;

        let request = &context.transaction.request;
        let client_id = request
            .client_id()
            .ok_or_else(|| ServerError::Configuration("client_id lost after validation".into()))?;
        let application = state
            .applications()?
            .find_by_client_id(client_id)
            .await?
            .ok_or_else(|| {
                ServerError::Configuration("client application lost after validation".into())
            })?;

        // Scopes: what the principal granted, falling back to the request.
        let granted: Vec<String> = if principal.scopes.is_empty() {
            request.scopes().into_iter().map(str::to_owned).collect()
        } else {
            principal.scopes.clone()
        };

        let mut principal = principal;
        principal.scopes = granted.clone();
        principal.audiences = state.scopes()?.resources_for(&granted).await?;

        let authorization =
            ensure_authorization(state, &application, &principal, &granted).await?;
        principal.authorization_id = Some(authorization.clone());

        let issuer = context.transaction.issuer().cloned();
        let request = &context.transaction.request;
        let wants_code = request.has_response_type(response_types::CODE);
        let wants_token = request.has_response_type(response_types::TOKEN);
        let wants_id_token = request.has_response_type(response_types::ID_TOKEN);
        let nonce = request.nonce().map(str::to_owned);
        let redirect_uri = request.redirect_uri().map(str::to_owned);
        let code_challenge = request.code_challenge().map(str::to_owned);
        let code_challenge_method = request.code_challenge_method().map(str::to_owned);

        if wants_code {
            let code = mint_authorization_code(
                state,
                &application,
                &principal,
                Some(&authorization),
                redirect_uri.as_deref(),
                code_challenge.as_deref(),
                code_challenge_method.as_deref(),
            )
            .await?;
            context.transaction.response.set_code(&code);
        }

        if wants_token {
            let (access_token, expires_in) = mint_access_token(
                state,
                issuer.as_ref(),
                &application,
                &principal,
                Some(&authorization),
            )
            .await?;
            context.transaction.response.set_access_token(&access_token);
            context.transaction.response.set_token_type(token_types::BEARER);
            context.transaction.response.set_expires_in(expires_in);
        }

        if wants_id_token {
            let id_token = mint_identity_token(
                state,
                issuer.as_ref(),
                &application,
                &principal,
                Some(&authorization),
                nonce.as_deref(),
            )
            .await?;
            context.transaction.response.set_id_token(&id_token);
        }

        tracing::info!(
            client_id = %application.client_id,
            subject = %principal.subject,
            code = wants_code,
            "authorization granted"
        );
        context.handle_request();
        Ok(())
    }
}

/// Reuses a valid permanent authorization covering the granted scopes, or
/// creates a new one. Systematic consent produces ad-hoc records that the
/// prune job reclaims once their tokens die.
async fn ensure_authorization(
    state: &AppState,
    application: &Application,
    principal: &crate::protocol::Principal,
    granted: &[String],
) -> Result<String, ServerError> {
    let existing = state
        .authorizations()?
        .find(
            &principal.subject,
            &application.id,
            Some(AuthorizationStatus::Valid),
            Some(AuthorizationType::Permanent),
            Some(granted),
        )
        .await?;
    if let Some(authorization) = existing.into_iter().next() {
        return Ok(authorization.id);
    }

    let kind = match application.consent_type {
        ConsentType::Systematic => AuthorizationType::AdHoc,
        _ => AuthorizationType::Permanent,
    };
    let descriptor = AuthorizationDescriptor {
        application_id: Some(application.id.clone()),
        subject: Some(principal.subject.clone()),
        status: Some(AuthorizationStatus::Valid),
        kind: Some(kind),
        scopes: granted.to_vec(),
        properties: None,
    };
    Ok(state.authorizations()?.create(&descriptor).await?.id)
}

/// Shapes the final authorization response: response-mode inference, state
/// echo and the redirect/form-post disposition.
pub struct ApplyAuthorizationResponse;

#[async_trait]
impl EventHandler<ApplyContext> for ApplyAuthorizationResponse {
    async fn handle(
        &self,
        context: &mut ApplyContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        let state_value = context.transaction.request.state().map(str::to_owned);
        if let Some(value) = state_value {
            context.transaction.response.set(params::STATE, value);
        }

        let Some(location) = context
            .transaction
            .property_str(properties::VALIDATED_REDIRECT_URI)
            .map(str::to_owned)
        else {
            // No trusted redirect target; the host renders the response
            // (typically an error) directly.
            context.disposition = Disposition::Json;
            return Ok(());
        };

        let request = &context.transaction.request;
        let mode = request.response_mode().map(str::to_owned).unwrap_or_else(|| {
            // Fragment is the OIDC default whenever tokens travel in the
            // response; query only ever carries codes.
            if request.is_implicit_flow() || request.is_hybrid_flow() {
                response_modes::FRAGMENT.to_string()
            } else {
                response_modes::QUERY.to_string()
            }
        });

        context.disposition = match mode.as_str() {
            response_modes::FORM_POST => Disposition::FormPost { action: location },
            response_modes::FRAGMENT => {
                let fragment = encode_parameters(&context.transaction.response);
                Disposition::Redirect {
                    location: format!("{location}#{fragment}"),
                }
            }
            _ => {
                let mut target = url::Url::parse(&location).map_err(|e| {
                    ServerError::Configuration(format!("validated redirect_uri unparsable: {e}"))
                })?;
                for (name, value) in collect_parameters(&context.transaction.response) {
                    target.query_pairs_mut().append_pair(&name, &value);
                }
                Disposition::Redirect {
                    location: target.to_string(),
                }
            }
        };
        Ok(())
    }
}

fn collect_parameters(response: &crate::protocol::Response) -> Vec<(String, String)> {
    response
        .iter()
        .filter_map(|(name, parameter)| {
            let value = match parameter {
                crate::protocol::Parameter::String(s) => s.clone(),
                crate::protocol::Parameter::Integer(i) => i.to_string(),
                crate::protocol::Parameter::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((name.to_string(), value))
        })
        .collect()
}

fn encode_parameters(response: &crate::protocol::Response) -> String {
    collect_parameters(response)
        .into_iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(&name),
                urlencoding::encode(&value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Resolves the request's client application through the manager cache.
async fn resolve_client(
    state: &AppState,
    request: &crate::protocol::Request,
) -> Result<Option<Application>, ServerError> {
    match request.client_id() {
        Some(client_id) => Ok(state.applications()?.find_by_client_id(client_id).await?),
        None => Ok(None),
    }
}
