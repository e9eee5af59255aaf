//! Discovery metadata (OpenID Connect Discovery 1.0).

use serde::Serialize;

/// The `/.well-known/openid-configuration` document.
///
/// Built from the server options so the advertised capabilities always match
/// what the validation handlers actually accept.
#[derive(Clone, Debug, Serialize)]
pub struct ConfigurationDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub userinfo_signing_alg_values_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// The `/.well-known/jwks` document.
#[derive(Clone, Debug, Serialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// A single public key in JWK form (RFC 7517).
#[derive(Clone, Debug, Serialize)]
pub struct Jwk {
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub kid: String,
    /// Base64url-encoded RSA modulus.
    pub n: String,
    /// Base64url-encoded RSA public exponent.
    pub e: String,
}
