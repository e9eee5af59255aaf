//! Discovery document construction (OpenID Connect Discovery 1.0).
//!
//! The configuration document is a projection of the server options: every
//! advertised capability is backed by a validation handler that accepts it.

use url::Url;

use crate::config::ServerOptions;
use crate::dto::discovery::ConfigurationDocument;
use crate::protocol::constants::{claims, code_challenge_methods, grant_types, response_modes, scopes};
use crate::tokens::TokenSerializer;

/// Builds the `/.well-known/openid-configuration` document for an issuer.
pub fn configuration_document(
    options: &ServerOptions,
    issuer: &Url,
    serializer: &dyn TokenSerializer,
) -> ConfigurationDocument {
    let base = issuer.as_str().trim_end_matches('/');
    let endpoint = |path: &str| format!("{base}{path}");

    let mut response_types = Vec::new();
    if options.enable_authorization_code_flow {
        response_types.push("code".to_string());
    }
    if options.enable_implicit_flow {
        response_types.push("id_token".to_string());
        response_types.push("id_token token".to_string());
        response_types.push("token".to_string());
    }
    if options.enable_hybrid_flow {
        response_types.push("code id_token".to_string());
        response_types.push("code id_token token".to_string());
        response_types.push("code token".to_string());
    }

    let mut grant_types_supported = Vec::new();
    if options.enable_authorization_code_flow {
        grant_types_supported.push(grant_types::AUTHORIZATION_CODE.to_string());
    }
    if options.enable_implicit_flow || options.enable_hybrid_flow {
        grant_types_supported.push("implicit".to_string());
    }
    if options.enable_refresh_token_grant {
        grant_types_supported.push(grant_types::REFRESH_TOKEN.to_string());
    }
    if options.enable_client_credentials_grant {
        grant_types_supported.push(grant_types::CLIENT_CREDENTIALS.to_string());
    }
    if options.enable_password_grant {
        grant_types_supported.push(grant_types::PASSWORD.to_string());
    }
    if options.enable_device_code_grant {
        grant_types_supported.push(grant_types::DEVICE_CODE.to_string());
    }

    let algorithm = serializer.signing_algorithm().to_string();

    ConfigurationDocument {
        issuer: base.to_string(),
        authorization_endpoint: endpoint(&options.authorization_endpoint_path),
        token_endpoint: endpoint(&options.token_endpoint_path),
        introspection_endpoint: options
            .enable_introspection_endpoint
            .then(|| endpoint(&options.introspection_endpoint_path)),
        revocation_endpoint: options
            .enable_revocation_endpoint
            .then(|| endpoint(&options.revocation_endpoint_path)),
        userinfo_endpoint: options
            .enable_userinfo_endpoint
            .then(|| endpoint(&options.userinfo_endpoint_path)),
        end_session_endpoint: options
            .enable_logout_endpoint
            .then(|| endpoint(&options.logout_endpoint_path)),
        jwks_uri: endpoint("/.well-known/jwks"),
        response_types_supported: response_types,
        response_modes_supported: vec![
            response_modes::QUERY.to_string(),
            response_modes::FRAGMENT.to_string(),
            response_modes::FORM_POST.to_string(),
        ],
        grant_types_supported,
        scopes_supported: vec![
            scopes::OPENID.to_string(),
            scopes::PROFILE.to_string(),
            scopes::EMAIL.to_string(),
            scopes::PHONE.to_string(),
            scopes::ADDRESS.to_string(),
            scopes::OFFLINE_ACCESS.to_string(),
        ],
        claims_supported: vec![
            claims::SUBJECT.to_string(),
            claims::NAME.to_string(),
            claims::FAMILY_NAME.to_string(),
            claims::GIVEN_NAME.to_string(),
            claims::PREFERRED_USERNAME.to_string(),
            claims::PROFILE.to_string(),
            claims::WEBSITE.to_string(),
            claims::BIRTHDATE.to_string(),
            claims::EMAIL.to_string(),
            claims::EMAIL_VERIFIED.to_string(),
            claims::PHONE_NUMBER.to_string(),
            claims::PHONE_NUMBER_VERIFIED.to_string(),
            claims::ADDRESS.to_string(),
        ],
        subject_types_supported: vec!["public".to_string()],
        id_token_signing_alg_values_supported: vec![algorithm.clone()],
        userinfo_signing_alg_values_supported: vec![algorithm],
        code_challenge_methods_supported: vec![
            code_challenge_methods::PLAIN.to_string(),
            code_challenge_methods::S256.to_string(),
        ],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::jwt::JwtTokenSerializer;

    #[test]
    fn test_document_reflects_disabled_capabilities() {
        let options = ServerOptions {
            enable_implicit_flow: false,
            enable_hybrid_flow: false,
            enable_introspection_endpoint: false,
            ..ServerOptions::default()
        };
        let serializer = JwtTokenSerializer::generate("kid").unwrap();
        let issuer = Url::parse("https://auth.example.com").unwrap();

        let document = configuration_document(&options, &issuer, &serializer);

        assert_eq!(document.issuer, "https://auth.example.com");
        assert_eq!(document.response_types_supported, vec!["code"]);
        assert!(document.introspection_endpoint.is_none());
        assert!(document
            .grant_types_supported
            .contains(&"authorization_code".to_string()));
        assert!(!document.grant_types_supported.contains(&"implicit".to_string()));
        assert_eq!(
            document.authorization_endpoint,
            "https://auth.example.com/connect/authorize"
        );
        assert_eq!(document.jwks_uri, "https://auth.example.com/.well-known/jwks");
    }
}
