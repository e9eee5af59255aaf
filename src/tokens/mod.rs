//! Token serialization contract.
//!
//! The pipeline never mints or parses token material itself; it raises
//! serialize/deserialize events against a [`TokenSerializer`]. An event left
//! unhandled after dispatch is a configuration fault, not a protocol error:
//! the server cannot run without a serializer for the grant kinds it issues.

pub mod jwt;

use async_trait::async_trait;

use crate::dto::discovery::JwksDocument;
use crate::error::ServerError;
use crate::protocol::Principal;

/// The grant kinds a serializer is asked to produce or consume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GrantKind {
    AccessToken,
    RefreshToken,
    IdentityToken,
    AuthorizationCode,
}

/// Event payload for producing a token.
#[derive(Debug)]
pub struct SerializeTokenEvent {
    pub kind: GrantKind,
    pub principal: Principal,
    /// Issuer URL to embed, when known.
    pub issuer: Option<String>,
    /// The client the grant is issued to.
    pub client_id: String,
    /// Entity id of the backing token record (`jti`).
    pub token_id: String,
    /// Lifetime in seconds.
    pub lifetime_secs: i64,
    /// OIDC nonce, identity tokens only.
    pub nonce: Option<String>,
    /// Wire form of the token, filled by the handler.
    pub token: Option<String>,
    /// Persisted payload for opaque grants (serialized principal), if any.
    pub payload: Option<String>,
    handled: bool,
}

impl SerializeTokenEvent {
    pub fn new(kind: GrantKind, principal: Principal, client_id: impl Into<String>) -> Self {
        Self {
            kind,
            principal,
            issuer: None,
            client_id: client_id.into(),
            token_id: String::new(),
            lifetime_secs: 0,
            nonce: None,
            token: None,
            payload: None,
            handled: false,
        }
    }

    pub fn handle(&mut self) {
        self.handled = true;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }
}

/// Event payload for consuming a token.
#[derive(Debug)]
pub struct DeserializeTokenEvent {
    pub kind: GrantKind,
    /// Wire form, for self-contained tokens.
    pub token: Option<String>,
    /// Stored payload, for opaque grants resolved through the token store.
    pub payload: Option<String>,
    /// The reconstructed principal, filled by the handler.
    pub principal: Option<Principal>,
    /// The `jti` recovered from a self-contained token.
    pub token_id: Option<String>,
    handled: bool,
}

impl DeserializeTokenEvent {
    pub fn from_wire(kind: GrantKind, token: impl Into<String>) -> Self {
        Self {
            kind,
            token: Some(token.into()),
            payload: None,
            principal: None,
            token_id: None,
            handled: false,
        }
    }

    pub fn from_payload(kind: GrantKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            token: None,
            payload: Some(payload.into()),
            principal: None,
            token_id: None,
            handled: false,
        }
    }

    pub fn handle(&mut self) {
        self.handled = true;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }
}

/// Produces and consumes the four grant kinds.
#[async_trait]
pub trait TokenSerializer: Send + Sync {
    /// Fills `event.token` (and `event.payload` for opaque grants) and marks
    /// the event handled.
    async fn serialize(&self, event: &mut SerializeTokenEvent) -> Result<(), ServerError>;

    /// Rebuilds the principal from `event.token` or `event.payload` and marks
    /// the event handled. An invalid or unverifiable token leaves the event
    /// handled with no principal.
    async fn deserialize(&self, event: &mut DeserializeTokenEvent) -> Result<(), ServerError>;

    /// Public signing keys in JWK form, served by the cryptography endpoint.
    fn jwks(&self) -> JwksDocument;

    /// Signing algorithm advertised in the discovery document.
    fn signing_algorithm(&self) -> &'static str;
}

/// Dispatches a serialize event and enforces the handled contract.
pub async fn serialize_grant(
    serializer: &dyn TokenSerializer,
    mut event: SerializeTokenEvent,
) -> Result<SerializeTokenEvent, ServerError> {
    serializer.serialize(&mut event).await?;
    if !event.is_handled() || event.token.is_none() {
        return Err(ServerError::Configuration(format!(
            "no serializer handled {:?} token production",
            event.kind
        )));
    }
    Ok(event)
}

/// Dispatches a deserialize event and enforces the handled contract.
pub async fn deserialize_grant(
    serializer: &dyn TokenSerializer,
    mut event: DeserializeTokenEvent,
) -> Result<DeserializeTokenEvent, ServerError> {
    serializer.deserialize(&mut event).await?;
    if !event.is_handled() {
        return Err(ServerError::Configuration(format!(
            "no serializer handled {:?} token consumption",
            event.kind
        )));
    }
    Ok(event)
}
