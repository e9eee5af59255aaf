//! Built-in endpoint handlers and the default pipeline registry.
//!
//! Orders are spaced by 1000 so hosts can insert their own handlers between
//! the built-ins (the usual extension points are the authorization `handle`
//! stage, which must attach a principal, and the logout `handle` stage,
//! which must approve the sign-out).

pub mod authorization;
pub mod client_auth;
pub mod discovery;
pub mod extract;
pub mod introspection;
pub mod issuance;
pub mod logout;
pub mod revocation;
pub mod token;
pub mod userinfo;

use crate::pipeline::{Filter, HandlerDescriptor, HandlerRegistry, ORDER_STEP};

use self::extract::ExtractProtocolRequest;

/// Assembles the default handler table. The host is expected to attach its
/// principal/logout handlers before sealing the registry into an `AppState`.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::default();

    // -----------------------------------------------------------------
    // Authorization endpoint
    // -----------------------------------------------------------------
    registry.authorization.extract.push(
        HandlerDescriptor::new("extract_protocol_request", ORDER_STEP, ExtractProtocolRequest)
            .required(),
    );

    let validate = &mut registry.authorization.validate;
    validate.push(
        HandlerDescriptor::new(
            "reject_request_parameter",
            ORDER_STEP,
            authorization::RejectRequestParameter,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "reject_request_uri_parameter",
            2 * ORDER_STEP,
            authorization::RejectRequestUriParameter,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_client_id_parameter",
            3 * ORDER_STEP,
            authorization::ValidateClientIdParameter,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_redirect_uri_parameter",
            4 * ORDER_STEP,
            authorization::ValidateRedirectUriParameter,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_response_type_parameter",
            5 * ORDER_STEP,
            authorization::ValidateResponseTypeParameter,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_response_mode_parameter",
            6 * ORDER_STEP,
            authorization::ValidateResponseModeParameter,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_nonce_parameter",
            7 * ORDER_STEP,
            authorization::ValidateNonceParameter,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_prompt_parameter",
            8 * ORDER_STEP,
            authorization::ValidatePromptParameter,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_pkce_parameters",
            9 * ORDER_STEP,
            authorization::ValidatePkceParameters,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_client_application",
            10 * ORDER_STEP,
            authorization::ValidateClientApplication,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_client_type",
            11 * ORDER_STEP,
            authorization::ValidateClientType,
        )
        .with_filter(Filter::RequireDegradedModeDisabled),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_redirect_uri_registered",
            12 * ORDER_STEP,
            authorization::ValidateRedirectUriRegistered,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "store_validated_redirect_uri",
            13 * ORDER_STEP,
            authorization::StoreValidatedRedirectUri,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_scopes_registered",
            14 * ORDER_STEP,
            authorization::ValidateScopesRegistered,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .with_filter(Filter::RequireScopeValidationEnabled),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_endpoint_permissions",
            15 * ORDER_STEP,
            authorization::ValidateEndpointPermissions,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .with_filter(Filter::RequireEndpointPermissionsEnabled),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_response_type_permissions",
            16 * ORDER_STEP,
            authorization::ValidateResponseTypePermissions,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .with_filter(Filter::RequireResponseTypePermissionsEnabled),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_grant_type_permissions",
            17 * ORDER_STEP,
            authorization::ValidateGrantTypePermissions,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .with_filter(Filter::RequireGrantTypePermissionsEnabled),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_scope_permissions",
            18 * ORDER_STEP,
            authorization::ValidateScopePermissions,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .with_filter(Filter::RequireScopePermissionsEnabled),
    );

    registry.authorization.handle.push(
        HandlerDescriptor::new("process_signin", 2 * ORDER_STEP, authorization::ProcessSignin)
            .with_filter(Filter::RequireDegradedModeDisabled)
            .required(),
    );
    registry.authorization.apply.push(
        HandlerDescriptor::new(
            "apply_authorization_response",
            ORDER_STEP,
            authorization::ApplyAuthorizationResponse,
        )
        .required(),
    );

    // -----------------------------------------------------------------
    // Token endpoint
    // -----------------------------------------------------------------
    registry.token.extract.push(
        HandlerDescriptor::new("extract_protocol_request", ORDER_STEP, ExtractProtocolRequest)
            .required(),
    );

    let validate = &mut registry.token.validate;
    validate.push(
        HandlerDescriptor::new("validate_grant_type", ORDER_STEP, token::ValidateGrantType)
            .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_grant_parameters",
            2 * ORDER_STEP,
            token::ValidateGrantParameters,
        )
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_client_authentication",
            3 * ORDER_STEP,
            token::ValidateClientAuthentication,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_endpoint_permissions",
            4 * ORDER_STEP,
            token::ValidateEndpointPermissions,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .with_filter(Filter::RequireEndpointPermissionsEnabled),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_grant_type_permissions",
            5 * ORDER_STEP,
            token::ValidateGrantTypePermissions,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .with_filter(Filter::RequireGrantTypePermissionsEnabled),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_scopes_registered",
            6 * ORDER_STEP,
            token::ValidateScopesRegistered,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .with_filter(Filter::RequireScopeValidationEnabled),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_authorization_code_grant",
            7 * ORDER_STEP,
            token::ValidateAuthorizationCodeGrant,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    validate.push(
        HandlerDescriptor::new(
            "validate_refresh_token_grant",
            8 * ORDER_STEP,
            token::ValidateRefreshTokenGrant,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );

    let handle = &mut registry.token.handle;
    handle.push(
        HandlerDescriptor::new(
            "handle_authorization_code_grant",
            ORDER_STEP,
            token::HandleAuthorizationCodeGrant,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    handle.push(
        HandlerDescriptor::new(
            "handle_refresh_token_grant",
            2 * ORDER_STEP,
            token::HandleRefreshTokenGrant,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    handle.push(
        HandlerDescriptor::new(
            "handle_client_credentials_grant",
            3 * ORDER_STEP,
            token::HandleClientCredentialsGrant,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    handle.push(
        HandlerDescriptor::new(
            "handle_password_grant",
            4 * ORDER_STEP,
            token::HandlePasswordGrant,
        )
        .with_filter(Filter::RequireDegradedModeDisabled),
    );
    registry.token.apply.push(
        HandlerDescriptor::new("apply_token_response", ORDER_STEP, token::ApplyTokenResponse)
            .required(),
    );

    // -----------------------------------------------------------------
    // Introspection endpoint
    // -----------------------------------------------------------------
    registry.introspection.extract.push(
        HandlerDescriptor::new("extract_protocol_request", ORDER_STEP, ExtractProtocolRequest)
            .required(),
    );
    registry.introspection.validate.push(
        HandlerDescriptor::new(
            "validate_token_parameter",
            ORDER_STEP,
            introspection::ValidateTokenParameter,
        )
        .required(),
    );
    registry.introspection.validate.push(
        HandlerDescriptor::new(
            "validate_client_authentication",
            2 * ORDER_STEP,
            introspection::ValidateClientAuthentication,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    registry.introspection.handle.push(
        HandlerDescriptor::new(
            "handle_introspection",
            ORDER_STEP,
            introspection::HandleIntrospection,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );

    // -----------------------------------------------------------------
    // Revocation endpoint
    // -----------------------------------------------------------------
    registry.revocation.extract.push(
        HandlerDescriptor::new("extract_protocol_request", ORDER_STEP, ExtractProtocolRequest)
            .required(),
    );
    registry.revocation.validate.push(
        HandlerDescriptor::new(
            "validate_token_parameter",
            ORDER_STEP,
            revocation::ValidateTokenParameter,
        )
        .required(),
    );
    registry.revocation.validate.push(
        HandlerDescriptor::new(
            "validate_client_authentication",
            2 * ORDER_STEP,
            revocation::ValidateClientAuthentication,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    registry.revocation.handle.push(
        HandlerDescriptor::new("handle_revocation", ORDER_STEP, revocation::HandleRevocation)
            .with_filter(Filter::RequireDegradedModeDisabled)
            .required(),
    );

    // -----------------------------------------------------------------
    // Userinfo endpoint
    // -----------------------------------------------------------------
    registry.userinfo.extract.push(
        HandlerDescriptor::new("extract_protocol_request", ORDER_STEP, ExtractProtocolRequest)
            .required(),
    );
    registry.userinfo.validate.push(
        HandlerDescriptor::new(
            "validate_access_token",
            ORDER_STEP,
            userinfo::ValidateAccessToken,
        )
        .required(),
    );
    registry.userinfo.validate.push(
        HandlerDescriptor::new(
            "validate_token_entity_status",
            2 * ORDER_STEP,
            userinfo::ValidateTokenEntityStatus,
        )
        .with_filter(Filter::RequireDegradedModeDisabled),
    );
    registry.userinfo.handle.push(
        HandlerDescriptor::new(
            "handle_userinfo_passthrough",
            ORDER_STEP / 2,
            userinfo::HandleUserinfoPassthrough,
        )
        .with_filter(Filter::RequireUserinfoPassthroughEnabled),
    );
    registry.userinfo.handle.push(
        HandlerDescriptor::new("handle_userinfo", ORDER_STEP, userinfo::HandleUserinfo).required(),
    );
    registry.userinfo.apply.push(HandlerDescriptor::new(
        "apply_userinfo_response",
        ORDER_STEP,
        userinfo::ApplyUserinfoResponse,
    ));

    // -----------------------------------------------------------------
    // Logout endpoint
    // -----------------------------------------------------------------
    registry.logout.extract.push(
        HandlerDescriptor::new("extract_protocol_request", ORDER_STEP, ExtractProtocolRequest)
            .required(),
    );
    registry.logout.validate.push(
        HandlerDescriptor::new(
            "validate_post_logout_redirect_uri",
            ORDER_STEP,
            logout::ValidatePostLogoutRedirectUri,
        )
        .with_filter(Filter::RequireDegradedModeDisabled)
        .required(),
    );
    registry.logout.handle.push(
        HandlerDescriptor::new(
            "require_logout_accepted",
            2 * ORDER_STEP,
            logout::RequireLogoutAccepted,
        )
        .required(),
    );
    registry.logout.apply.push(
        HandlerDescriptor::new("apply_logout_response", ORDER_STEP, logout::ApplyLogoutResponse)
            .required(),
    );

    registry
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Duration;

    use crate::config::{AppState, ServerOptions, StoreSet};
    use crate::dto::descriptors::{ApplicationDescriptor, ScopeDescriptor};
    use crate::error::ServerError;
    use crate::models::{permissions, ClientType, ConsentType, TokenStatus, TokenType};
    use crate::pipeline::{
        process_request, Disposition, EventHandler, HandleContext, HandlerDescriptor,
        PipelineOutcome, ORDER_STEP,
    };
    use crate::protocol::transaction::properties;
    use crate::protocol::{EndpointType, Principal, Transaction};
    use crate::repositories::memory::MemoryStore;
    use crate::tokens::jwt::JwtTokenSerializer;
    use crate::utils::pkce::s256_challenge;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

    /// Stand-in for the host's consent/session handler: grants as "alice"
    /// with a couple of profile claims.
    struct AttachTestPrincipal;

    #[async_trait]
    impl EventHandler<HandleContext> for AttachTestPrincipal {
        async fn handle(
            &self,
            context: &mut HandleContext,
            _state: &AppState,
        ) -> Result<(), ServerError> {
            let mut principal = Principal::new("alice");
            principal.set_claim("name", "Alice Example");
            principal.set_claim("email", "alice@example.com");
            principal.set_claim("email_verified", true);
            context.principal = Some(principal);
            Ok(())
        }
    }

    struct AllowLogout;

    #[async_trait]
    impl EventHandler<HandleContext> for AllowLogout {
        async fn handle(
            &self,
            context: &mut HandleContext,
            _state: &AppState,
        ) -> Result<(), ServerError> {
            context.is_logout_allowed = true;
            Ok(())
        }
    }

    async fn test_state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let stores = StoreSet {
            applications: store.clone(),
            authorizations: store.clone(),
            tokens: store.clone(),
            scopes: store,
        };

        let mut registry = super::default_registry();
        registry.authorization.handle.push(HandlerDescriptor::new(
            "attach_test_principal",
            ORDER_STEP,
            AttachTestPrincipal,
        ));
        registry.logout.handle.push(HandlerDescriptor::new(
            "allow_logout",
            ORDER_STEP,
            AllowLogout,
        ));

        let serializer = Arc::new(JwtTokenSerializer::generate("test-key").unwrap());
        let state = AppState::new(ServerOptions::default(), stores, serializer, registry);

        for scope in ["openid", "profile", "email"] {
            state
                .scopes()
                .unwrap()
                .create(&ScopeDescriptor {
                    name: Some(scope.to_string()),
                    ..ScopeDescriptor::default()
                })
                .await
                .unwrap();
        }

        state
            .applications()
            .unwrap()
            .create(&ApplicationDescriptor {
                client_id: Some("c1".to_string()),
                client_type: Some(ClientType::Public),
                consent_type: Some(ConsentType::Explicit),
                display_name: Some("Test client".to_string()),
                redirect_uris: vec!["https://app/cb".to_string()],
                post_logout_redirect_uris: vec!["https://app/bye".to_string()],
                permissions: vec![
                    permissions::endpoints::AUTHORIZATION.to_string(),
                    permissions::endpoints::TOKEN.to_string(),
                    permissions::endpoints::INTROSPECTION.to_string(),
                    permissions::endpoints::REVOCATION.to_string(),
                    permissions::endpoints::LOGOUT.to_string(),
                    permissions::grant_types::AUTHORIZATION_CODE.to_string(),
                    permissions::grant_types::REFRESH_TOKEN.to_string(),
                    permissions::response_types::CODE.to_string(),
                    permissions::scope("profile"),
                    permissions::scope("email"),
                ],
                ..ApplicationDescriptor::default()
            })
            .await
            .unwrap();

        state
            .applications()
            .unwrap()
            .create(&ApplicationDescriptor {
                client_id: Some("c2".to_string()),
                client_secret: Some("c2-secret".to_string()),
                client_type: Some(ClientType::Confidential),
                consent_type: Some(ConsentType::Explicit),
                redirect_uris: vec!["https://confidential/cb".to_string()],
                permissions: vec![
                    permissions::endpoints::AUTHORIZATION.to_string(),
                    permissions::endpoints::TOKEN.to_string(),
                    permissions::grant_types::CLIENT_CREDENTIALS.to_string(),
                    permissions::response_types::CODE.to_string(),
                ],
                ..ApplicationDescriptor::default()
            })
            .await
            .unwrap();

        state
    }

    fn transaction(
        state: &AppState,
        endpoint: EndpointType,
        pairs: &[(&str, &str)],
    ) -> Transaction {
        let mut transaction = Transaction::new(endpoint, state.options.clone());
        transaction.set_issuer(url::Url::parse("https://auth.example.com").unwrap());
        transaction.raw_parameters = Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        transaction
    }

    fn redirect_location(outcome: &PipelineOutcome) -> &str {
        match outcome {
            PipelineOutcome::Completed(Disposition::Redirect { location }) => location,
            other => panic!("expected a redirect, got {other:?}"),
        }
    }

    fn query_param(location: &str, name: &str) -> Option<String> {
        let url = url::Url::parse(location).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    async fn authorize(state: &AppState) -> String {
        let challenge = s256_challenge(VERIFIER);
        let result = process_request(
            state,
            transaction(
                state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "code"),
                    ("redirect_uri", "https://app/cb"),
                    ("scope", "openid profile"),
                    ("state", "xyz"),
                    ("code_challenge", challenge.as_str()),
                    ("code_challenge_method", "S256"),
                ],
            ),
        )
        .await
        .unwrap();

        let location = redirect_location(&result.outcome).to_string();
        query_param(&location, "code").expect("authorization code in redirect")
    }

    #[tokio::test]
    async fn test_authorization_code_flow_happy_path() {
        let state = test_state().await;
        let challenge = s256_challenge(VERIFIER);

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "code"),
                    ("redirect_uri", "https://app/cb"),
                    ("scope", "openid profile"),
                    ("state", "xyz"),
                    ("code_challenge", challenge.as_str()),
                    ("code_challenge_method", "S256"),
                ],
            ),
        )
        .await
        .unwrap();

        // The validated redirect URI matches the request's byte-for-byte.
        assert_eq!(
            result
                .transaction
                .property_str(properties::VALIDATED_REDIRECT_URI),
            Some("https://app/cb")
        );

        let location = redirect_location(&result.outcome);
        assert!(location.starts_with("https://app/cb?"));
        assert_eq!(query_param(location, "state").as_deref(), Some("xyz"));
        assert!(query_param(location, "error").is_none());
        let code = query_param(location, "code").unwrap();
        assert!(!code.is_empty());

        // A permanent authorization was persisted for the grant.
        let application = state
            .applications()
            .unwrap()
            .find_by_client_id("c1")
            .await
            .unwrap()
            .unwrap();
        let authorizations = state
            .authorizations()
            .unwrap()
            .find("alice", &application.id, None, None, None)
            .await
            .unwrap();
        assert_eq!(authorizations.len(), 1);
        let authorization = &authorizations[0];
        assert!(authorization.is_valid());
        assert!(authorization.is_permanent());
        assert!(authorization.has_scopes(["openid", "profile"]));

        // The code entity is valid and expires within five minutes.
        let tokens = state
            .tokens()
            .unwrap()
            .find_by_authorization_id(&authorization.id)
            .await
            .unwrap();
        let code_entity = tokens
            .iter()
            .find(|t| t.kind == TokenType::AuthorizationCode)
            .expect("authorization code entity");
        assert_eq!(code_entity.status, TokenStatus::Valid);
        let lifetime = code_entity.expiration_date.unwrap() - code_entity.creation_date;
        assert!(lifetime <= Duration::seconds(300));
    }

    #[tokio::test]
    async fn test_code_exchange_and_replay() {
        let state = test_state().await;
        let code = authorize(&state).await;

        // Exchange.
        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://app/cb"),
                    ("client_id", "c1"),
                    ("code_verifier", VERIFIER),
                ],
            ),
        )
        .await
        .unwrap();

        assert_eq!(
            result.outcome,
            PipelineOutcome::Completed(Disposition::Json)
        );
        let response = &result.transaction.response;
        assert!(response.error().is_none(), "{:?}", response.message());
        assert!(response.access_token().is_some());
        assert_eq!(response.token_type(), Some("Bearer"));
        assert!(response.expires_in().is_some());
        assert!(response.refresh_token().is_some());
        assert!(response.id_token().is_some());

        // The code has transitioned to redeemed.
        let code_entity = state
            .tokens()
            .unwrap()
            .find_by_reference_id(&crate::utils::secret::hash_handle(&code))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code_entity.status, TokenStatus::Redeemed);

        // Replay: the second identical exchange fails with invalid_grant.
        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://app/cb"),
                    ("client_id", "c1"),
                    ("code_verifier", VERIFIER),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_grant"));
    }

    #[tokio::test]
    async fn test_exchange_with_wrong_verifier_fails() {
        let state = test_state().await;
        let code = authorize(&state).await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://app/cb"),
                    ("client_id", "c1"),
                    ("code_verifier", "wrong-verifier-wrong-verifier-wrong-verifier"),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_grant"));
    }

    #[tokio::test]
    async fn test_scope_denial_redirects_with_invalid_scope() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "code"),
                    ("redirect_uri", "https://app/cb"),
                    ("scope", "openid bogus"),
                    ("state", "xyz"),
                ],
            ),
        )
        .await
        .unwrap();

        let location = redirect_location(&result.outcome);
        assert!(location.starts_with("https://app/cb?"));
        assert_eq!(query_param(location, "error").as_deref(), Some("invalid_scope"));
        assert_eq!(query_param(location, "state").as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_missing_client_id_is_rejected_without_redirect() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[("response_type", "code"), ("redirect_uri", "https://app/cb")],
            ),
        )
        .await
        .unwrap();

        // The redirect URI was never validated, so the error must not be
        // delivered through it.
        assert_eq!(
            result.outcome,
            PipelineOutcome::Completed(Disposition::Json)
        );
        assert_eq!(result.transaction.response.error(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn test_redirect_uri_with_fragment_is_rejected() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "code"),
                    ("redirect_uri", "https://app/cb#frag"),
                    ("scope", "openid"),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn test_query_response_mode_with_tokens_is_rejected() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "id_token token"),
                    ("redirect_uri", "https://app/cb"),
                    ("scope", "openid"),
                    ("nonce", "n-1"),
                    ("response_mode", "query"),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn test_prompt_none_cannot_combine_with_login() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "code"),
                    ("redirect_uri", "https://app/cb"),
                    ("scope", "openid"),
                    ("prompt", "none login"),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn test_confidential_client_cannot_use_token_response_type() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c2"),
                    ("response_type", "token"),
                    ("redirect_uri", "https://confidential/cb"),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(
            result.transaction.response.error(),
            Some("unauthorized_client")
        );
    }

    #[tokio::test]
    async fn test_unknown_response_type_is_unsupported() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "magic"),
                    ("redirect_uri", "https://app/cb"),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(
            result.transaction.response.error(),
            Some("unsupported_response_type")
        );
    }

    #[tokio::test]
    async fn test_implicit_flow_delivers_tokens_in_fragment() {
        let state = test_state().await;

        // c1 needs the implicit response-type permission for this test.
        let applications = state.applications().unwrap();
        let mut application = applications.find_by_client_id("c1").await.unwrap().unwrap();
        application
            .permissions
            .push(permissions::response_types::ID_TOKEN.to_string());
        applications.update(&mut application).await.unwrap();

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "id_token"),
                    ("redirect_uri", "https://app/cb"),
                    ("scope", "openid"),
                    ("nonce", "n-1"),
                    ("state", "xyz"),
                ],
            ),
        )
        .await
        .unwrap();

        let location = redirect_location(&result.outcome);
        let (base, fragment) = location.split_once('#').expect("fragment response");
        assert_eq!(base, "https://app/cb");
        assert!(fragment.contains("id_token="));
        assert!(fragment.contains("state=xyz"));
        assert!(!location.contains("?id_token="));
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "client_credentials"),
                    ("client_id", "c2"),
                    ("client_secret", "c2-secret"),
                ],
            ),
        )
        .await
        .unwrap();

        let response = &result.transaction.response;
        assert!(response.error().is_none(), "{:?}", response.message());
        assert!(response.access_token().is_some());
        // No user, no refresh token, no identity token.
        assert!(response.refresh_token().is_none());
        assert!(response.id_token().is_none());
    }

    #[tokio::test]
    async fn test_confidential_client_requires_secret_at_token_endpoint() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[("grant_type", "client_credentials"), ("client_id", "c2")],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_client"));
    }

    #[tokio::test]
    async fn test_public_client_must_not_send_secret() {
        let state = test_state().await;
        let code = authorize(&state).await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://app/cb"),
                    ("client_id", "c1"),
                    ("client_secret", "should-not-be-here"),
                    ("code_verifier", VERIFIER),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_client"));
    }

    #[tokio::test]
    async fn test_refresh_token_rotation() {
        let state = test_state().await;
        let code = authorize(&state).await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://app/cb"),
                    ("client_id", "c1"),
                    ("code_verifier", VERIFIER),
                ],
            ),
        )
        .await
        .unwrap();
        let refresh = result.transaction.response.refresh_token().unwrap().to_string();

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh.as_str()),
                    ("client_id", "c1"),
                ],
            ),
        )
        .await
        .unwrap();
        let response = &result.transaction.response;
        assert!(response.error().is_none(), "{:?}", response.message());
        let rotated = response.refresh_token().unwrap();
        assert_ne!(rotated, refresh);

        // The old refresh token is dead after rotation.
        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh.as_str()),
                    ("client_id", "c1"),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_grant"));
    }

    #[tokio::test]
    async fn test_introspection_of_revoked_token_is_inactive_only() {
        let state = test_state().await;
        let code = authorize(&state).await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://app/cb"),
                    ("client_id", "c1"),
                    ("code_verifier", VERIFIER),
                ],
            ),
        )
        .await
        .unwrap();
        let refresh = result.transaction.response.refresh_token().unwrap().to_string();

        // Revoke the refresh token, then introspect it.
        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Revocation,
                &[("token", refresh.as_str()), ("client_id", "c1")],
            ),
        )
        .await
        .unwrap();
        assert!(result.transaction.response.error().is_none());

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Introspection,
                &[("token", refresh.as_str()), ("client_id", "c1")],
            ),
        )
        .await
        .unwrap();

        let response = &result.transaction.response;
        assert_eq!(response.active(), Some(false));
        // Nothing but the activity flag may leak.
        assert_eq!(response.message().count(), 1);
    }

    #[tokio::test]
    async fn test_revocation_is_idempotent_and_cascades() {
        let state = test_state().await;
        let code = authorize(&state).await;

        let exchange = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://app/cb"),
                    ("client_id", "c1"),
                    ("code_verifier", VERIFIER),
                ],
            ),
        )
        .await
        .unwrap();
        let refresh = exchange.transaction.response.refresh_token().unwrap().to_string();
        let access = exchange.transaction.response.access_token().unwrap().to_string();

        for _ in 0..2 {
            let result = process_request(
                &state,
                transaction(
                    &state,
                    EndpointType::Revocation,
                    &[("token", refresh.as_str()), ("client_id", "c1")],
                ),
            )
            .await
            .unwrap();
            assert!(result.transaction.response.error().is_none());
        }

        // Cascade reached the access token issued with the same grant.
        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Introspection,
                &[("token", access.as_str()), ("client_id", "c1")],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.active(), Some(false));
    }

    #[tokio::test]
    async fn test_userinfo_emits_claims_by_scope() {
        let state = test_state().await;
        let code = authorize(&state).await;

        let exchange = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://app/cb"),
                    ("client_id", "c1"),
                    ("code_verifier", VERIFIER),
                ],
            ),
        )
        .await
        .unwrap();
        let access = exchange.transaction.response.access_token().unwrap().to_string();

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Userinfo,
                &[("access_token", access.as_str())],
            ),
        )
        .await
        .unwrap();

        let response = &result.transaction.response;
        assert!(response.error().is_none(), "{:?}", response.message());
        assert_eq!(response.get_str("sub"), Some("alice"));
        // profile was granted, so the name claim flows through.
        assert_eq!(response.get_str("name"), Some("Alice Example"));
        // email was NOT granted on this request.
        assert_eq!(response.get_str("email"), None);
    }

    #[tokio::test]
    async fn test_userinfo_rejects_garbage_token() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Userinfo,
                &[("access_token", "not-a-real-token")],
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.transaction.response.error(), Some("invalid_token"));
    }

    #[tokio::test]
    async fn test_logout_with_registered_uri_redirects_with_state() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Logout,
                &[
                    ("client_id", "c1"),
                    ("post_logout_redirect_uri", "https://app/bye"),
                    ("state", "after-logout"),
                ],
            ),
        )
        .await
        .unwrap();

        let location = redirect_location(&result.outcome);
        assert!(location.starts_with("https://app/bye?"));
        assert_eq!(
            query_param(location, "state").as_deref(),
            Some("after-logout")
        );
    }

    #[tokio::test]
    async fn test_logout_with_unregistered_uri_is_rejected_without_redirect() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Logout,
                &[
                    ("client_id", "c1"),
                    ("post_logout_redirect_uri", "https://evil/"),
                ],
            ),
        )
        .await
        .unwrap();

        assert_eq!(
            result.outcome,
            PipelineOutcome::Completed(Disposition::Json)
        );
        assert_eq!(result.transaction.response.error(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn test_request_parameter_is_rejected() {
        let state = test_state().await;

        let result = process_request(
            &state,
            transaction(
                &state,
                EndpointType::Authorization,
                &[
                    ("client_id", "c1"),
                    ("response_type", "code"),
                    ("redirect_uri", "https://app/cb"),
                    ("request", "eyJhbGciOi..."),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(
            result.transaction.response.error(),
            Some("request_not_supported")
        );
    }
}
