//! Per-request transaction state.
//!
//! A [`Transaction`] is created by the host adapter when a protocol request
//! arrives and is destroyed once the outermost pipeline event completes. All
//! handlers of a transaction run cooperatively on a single logical task;
//! the cancellation token stops dispatch between handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ServerOptions;
use crate::protocol::message::{Request, Response};

/// The endpoint a transaction was received on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EndpointType {
    #[default]
    Unknown,
    Authorization,
    Token,
    Introspection,
    Revocation,
    Userinfo,
    Logout,
    Configuration,
    Cryptography,
}

/// Well-known property-bag keys used to convey cross-handler state.
pub mod properties {
    /// The redirect_uri that survived validation, consumed by apply-response.
    pub const VALIDATED_REDIRECT_URI: &str = "validated_redirect_uri";
    /// The post_logout_redirect_uri that survived validation.
    pub const VALIDATED_POST_LOGOUT_REDIRECT_URI: &str = "validated_post_logout_redirect_uri";
    /// Subject attached by the host before dispatch (authenticated session).
    pub const AUTHENTICATED_SUBJECT: &str = "authenticated_subject";
}

/// Scoped state for one protocol request.
#[derive(Debug)]
pub struct Transaction {
    pub endpoint_type: EndpointType,
    issuer: Option<Url>,
    /// Raw name/value pairs as received by the host (query string or form
    /// body), consumed by the extract stage.
    pub raw_parameters: Option<Vec<(String, String)>>,
    pub request: Request,
    pub response: Response,
    properties: HashMap<String, Value>,
    cancellation: CancellationToken,
    options: Arc<ServerOptions>,
}

impl Transaction {
    pub fn new(endpoint_type: EndpointType, options: Arc<ServerOptions>) -> Self {
        Self {
            endpoint_type,
            issuer: None,
            raw_parameters: None,
            request: Request::default(),
            response: Response::default(),
            properties: HashMap::new(),
            cancellation: CancellationToken::new(),
            options,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The absolute issuer URL, once known or inferred.
    pub fn issuer(&self) -> Option<&Url> {
        self.issuer.as_ref()
    }

    pub fn set_issuer(&mut self, issuer: Url) {
        self.issuer = Some(issuer);
    }

    /// Immutable snapshot of the server options for this request.
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_bag_round_trip() {
        let mut transaction =
            Transaction::new(EndpointType::Authorization, Arc::new(ServerOptions::default()));

        transaction.set_property(properties::VALIDATED_REDIRECT_URI, "https://app/cb");
        assert_eq!(
            transaction.property_str(properties::VALIDATED_REDIRECT_URI),
            Some("https://app/cb")
        );

        transaction.remove_property(properties::VALIDATED_REDIRECT_URI);
        assert!(transaction.property(properties::VALIDATED_REDIRECT_URI).is_none());
    }

    #[test]
    fn test_cancellation_is_observable() {
        let token = CancellationToken::new();
        let transaction = Transaction::new(EndpointType::Token, Arc::new(ServerOptions::default()))
            .with_cancellation(token.clone());

        assert!(!transaction.is_cancelled());
        token.cancel();
        assert!(transaction.is_cancelled());
    }
}
