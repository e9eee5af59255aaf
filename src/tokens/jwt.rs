//! Default token serializer: RS256 JWTs for self-contained tokens, opaque
//! random handles for grants that live in the token store.
//!
//! Access and identity tokens are signed JWTs verifiable against the JWKS
//! endpoint. Authorization codes and refresh tokens are opaque handles; their
//! principal travels as a JSON payload persisted with the token entity.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dto::discovery::{Jwk, JwksDocument};
use crate::error::ServerError;
use crate::protocol::Principal;
use crate::tokens::{DeserializeTokenEvent, GrantKind, SerializeTokenEvent, TokenSerializer};
use crate::utils::secret::generate_handle;

const SIGNING_ALGORITHM: &str = "RS256";

/// Claims carried by self-contained tokens.
#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    sub: String,
    aud: Vec<String>,
    exp: i64,
    iat: i64,
    jti: String,
    /// Space-separated granted scopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    /// Distinguishes access from identity tokens after decoding.
    token_use: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// RS256 serializer with a single active signing key.
pub struct JwtTokenSerializer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    kid: String,
    /// Base64url RSA public components, published via JWKS.
    n: String,
    e: String,
}

impl JwtTokenSerializer {
    /// Generates an ephemeral RSA-2048 key pair. Suitable for development;
    /// production deployments load a persisted key with [`Self::from_pem`].
    pub fn generate(kid: &str) -> Result<Self, ServerError> {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048)
            .map_err(|e| ServerError::Configuration(format!("RSA key generation failed: {e}")))?;
        let pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| ServerError::Configuration(format!("RSA key export failed: {e}")))?;
        Self::from_parts(kid, &private_key, pem.as_bytes())
    }

    /// Loads a PKCS#8 or PKCS#1 PEM-encoded RSA private key.
    pub fn from_pem(kid: &str, pem: &str) -> Result<Self, ServerError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| ServerError::Configuration(format!("invalid RSA private key: {e}")))?;
        Self::from_parts(kid, &private_key, pem.as_bytes())
    }

    fn from_parts(
        kid: &str,
        private_key: &RsaPrivateKey,
        pem: &[u8],
    ) -> Result<Self, ServerError> {
        let public_key = RsaPublicKey::from(private_key);
        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        let encoding_key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| ServerError::Configuration(format!("unusable RSA key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| ServerError::Configuration(format!("unusable RSA public key: {e}")))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            kid: kid.to_string(),
            n,
            e,
        })
    }

    fn sign(&self, claims: &JwtClaims) -> Result<String, ServerError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| ServerError::TokenSerialization(e.to_string()))
    }

    fn decode_jwt(&self, token: &str, expected_use: &str) -> Option<JwtClaims> {
        let mut validation = Validation::new(Algorithm::RS256);
        // Audience restrictions are checked by the endpoint handlers, which
        // know which client is asking.
        validation.validate_aud = false;

        match decode::<JwtClaims>(token, &self.decoding_key, &validation) {
            Ok(data) if data.claims.token_use == expected_use => Some(data.claims),
            Ok(_) => {
                tracing::debug!("token rejected: wrong token_use claim");
                None
            }
            Err(error) => {
                tracing::debug!(%error, "token rejected during decoding");
                None
            }
        }
    }

    fn build_claims(&self, event: &SerializeTokenEvent, token_use: &str) -> JwtClaims {
        let now = Utc::now().timestamp();
        let mut audiences = vec![event.client_id.clone()];
        audiences.extend(event.principal.audiences.iter().cloned());

        // Principal claims ride along in both token kinds so userinfo can
        // answer from the access token alone; registered claim names are
        // never overridable from the claims map.
        let extra: Map<String, Value> = event
            .principal
            .claims
            .iter()
            .filter(|(name, _)| !RESERVED_CLAIMS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        JwtClaims {
            iss: event.issuer.clone(),
            sub: event.principal.subject.clone(),
            aud: audiences,
            exp: now + event.lifetime_secs,
            iat: now,
            jti: event.token_id.clone(),
            scope: if event.principal.scopes.is_empty() {
                None
            } else {
                Some(event.principal.scopes.join(" "))
            },
            nonce: event.nonce.clone(),
            token_use: token_use.to_string(),
            extra,
        }
    }
}

const RESERVED_CLAIMS: &[&str] = &[
    "iss", "sub", "aud", "exp", "iat", "jti", "scope", "nonce", "token_use",
];

fn principal_from_claims(claims: &JwtClaims) -> Principal {
    let mut principal = Principal::new(claims.sub.clone());
    principal.scopes = claims
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default();
    principal.audiences = claims.aud.clone();
    principal.claims = claims.extra.clone();
    principal
}

#[async_trait]
impl TokenSerializer for JwtTokenSerializer {
    async fn serialize(&self, event: &mut SerializeTokenEvent) -> Result<(), ServerError> {
        match event.kind {
            GrantKind::AccessToken => {
                let claims = self.build_claims(event, "access");
                event.token = Some(self.sign(&claims)?);
            }
            GrantKind::IdentityToken => {
                let claims = self.build_claims(event, "id");
                event.token = Some(self.sign(&claims)?);
            }
            GrantKind::RefreshToken | GrantKind::AuthorizationCode => {
                // Opaque grants: random handle on the wire, principal in the
                // persisted payload.
                event.token = Some(generate_handle());
                event.payload = Some(
                    serde_json::to_string(&event.principal)
                        .map_err(|e| ServerError::TokenSerialization(e.to_string()))?,
                );
            }
        }
        event.handle();
        Ok(())
    }

    async fn deserialize(&self, event: &mut DeserializeTokenEvent) -> Result<(), ServerError> {
        match event.kind {
            GrantKind::AccessToken | GrantKind::IdentityToken => {
                let expected_use = if event.kind == GrantKind::AccessToken {
                    "access"
                } else {
                    "id"
                };
                if let Some(claims) = event
                    .token
                    .as_deref()
                    .and_then(|t| self.decode_jwt(t, expected_use))
                {
                    event.token_id = Some(claims.jti.clone());
                    event.principal = Some(principal_from_claims(&claims));
                }
            }
            GrantKind::RefreshToken | GrantKind::AuthorizationCode => {
                if let Some(payload) = event.payload.as_deref() {
                    match serde_json::from_str::<Principal>(payload) {
                        Ok(principal) => event.principal = Some(principal),
                        Err(error) => {
                            tracing::warn!(%error, "stored grant payload could not be decoded");
                        }
                    }
                }
            }
        }
        event.handle();
        Ok(())
    }

    fn jwks(&self) -> JwksDocument {
        JwksDocument {
            keys: vec![Jwk {
                kty: "RSA".to_string(),
                alg: SIGNING_ALGORITHM.to_string(),
                use_: "sig".to_string(),
                kid: self.kid.clone(),
                n: self.n.clone(),
                e: self.e.clone(),
            }],
        }
    }

    fn signing_algorithm(&self) -> &'static str {
        SIGNING_ALGORITHM
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{deserialize_grant, serialize_grant};

    fn serializer() -> JwtTokenSerializer {
        JwtTokenSerializer::generate("test-key").expect("key generation")
    }

    fn principal() -> Principal {
        let mut principal = Principal::new("alice").with_scopes(["openid", "profile"]);
        principal.set_claim("name", "Alice Example");
        principal
    }

    #[tokio::test]
    async fn test_access_token_round_trip() {
        let serializer = serializer();
        let mut event = SerializeTokenEvent::new(GrantKind::AccessToken, principal(), "c1");
        event.issuer = Some("https://issuer.example".to_string());
        event.token_id = "t-1".to_string();
        event.lifetime_secs = 600;

        let event = serialize_grant(&serializer, event).await.unwrap();
        let token = event.token.expect("access token");
        assert_eq!(token.matches('.').count(), 2, "expected a compact JWT");

        let restored =
            deserialize_grant(&serializer, DeserializeTokenEvent::from_wire(GrantKind::AccessToken, token))
                .await
                .unwrap();
        let principal = restored.principal.expect("principal");
        assert_eq!(principal.subject, "alice");
        assert!(principal.has_scope("openid"));
        assert_eq!(restored.token_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn test_identity_token_carries_claims() {
        let serializer = serializer();
        let mut event = SerializeTokenEvent::new(GrantKind::IdentityToken, principal(), "c1");
        event.token_id = "t-2".to_string();
        event.lifetime_secs = 1200;
        event.nonce = Some("n-0S6_WzA2Mj".to_string());

        let event = serialize_grant(&serializer, event).await.unwrap();
        let restored = deserialize_grant(
            &serializer,
            DeserializeTokenEvent::from_wire(GrantKind::IdentityToken, event.token.unwrap()),
        )
        .await
        .unwrap();

        let principal = restored.principal.expect("principal");
        assert_eq!(
            principal.claim("name").and_then(Value::as_str),
            Some("Alice Example")
        );
    }

    #[tokio::test]
    async fn test_access_token_is_not_accepted_as_identity_token() {
        let serializer = serializer();
        let mut event = SerializeTokenEvent::new(GrantKind::AccessToken, principal(), "c1");
        event.token_id = "t-3".to_string();
        event.lifetime_secs = 600;
        let event = serialize_grant(&serializer, event).await.unwrap();

        let restored = deserialize_grant(
            &serializer,
            DeserializeTokenEvent::from_wire(GrantKind::IdentityToken, event.token.unwrap()),
        )
        .await
        .unwrap();
        assert!(restored.principal.is_none());
    }

    #[tokio::test]
    async fn test_authorization_code_is_opaque_with_payload() {
        let serializer = serializer();
        let mut event = SerializeTokenEvent::new(GrantKind::AuthorizationCode, principal(), "c1");
        event.lifetime_secs = 300;

        let event = serialize_grant(&serializer, event).await.unwrap();
        let code = event.token.as_deref().unwrap();
        assert!(!code.contains('.'), "codes must be opaque, not JWTs");

        let payload = event.payload.expect("payload");
        let restored = deserialize_grant(
            &serializer,
            DeserializeTokenEvent::from_payload(GrantKind::AuthorizationCode, payload),
        )
        .await
        .unwrap();
        assert_eq!(restored.principal.unwrap().subject, "alice");
    }

    #[tokio::test]
    async fn test_tampered_token_yields_no_principal() {
        let serializer = serializer();
        let mut event = SerializeTokenEvent::new(GrantKind::AccessToken, principal(), "c1");
        event.token_id = "t-4".to_string();
        event.lifetime_secs = 600;
        let event = serialize_grant(&serializer, event).await.unwrap();

        let mut token = event.token.unwrap();
        token.push('x');
        let restored = deserialize_grant(
            &serializer,
            DeserializeTokenEvent::from_wire(GrantKind::AccessToken, token),
        )
        .await
        .unwrap();
        assert!(restored.principal.is_none());
    }

    #[test]
    fn test_jwks_exposes_rsa_components() {
        let serializer = serializer();
        let jwks = serializer.jwks();
        assert_eq!(jwks.keys.len(), 1);
        let key = &jwks.keys[0];
        assert_eq!(key.kty, "RSA");
        assert_eq!(key.alg, "RS256");
        assert_eq!(key.kid, "test-key");
        assert!(!key.n.is_empty());
        assert_eq!(key.e, "AQAB");
    }
}
