//! The authenticated principal flowing through grant issuance.
//!
//! A principal is attached by the host's `Handle*` event handler (or rebuilt
//! from a deserialized token) and carries everything token serialization
//! needs: the subject, the granted scope set, the audiences and the claims
//! destined for identity tokens and the userinfo endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// End-user identifier, byte-exact.
    pub subject: String,
    /// Scopes granted to this principal.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Audiences (resources) the issued tokens are valid for.
    #[serde(default)]
    pub audiences: Vec<String>,
    /// The authorization entity backing this grant, once persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    /// Standard and custom claims, keyed by claim name.
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn set_claim(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.claims.insert(name.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_membership_is_byte_exact() {
        let principal = Principal::new("alice").with_scopes(["openid", "profile"]);
        assert!(principal.has_scope("openid"));
        assert!(!principal.has_scope("OpenID"));
    }

    #[test]
    fn test_claims_round_trip_through_json() {
        let mut principal = Principal::new("alice");
        principal.set_claim("email", "alice@example.com");
        principal.set_claim("address", json!({"locality": "Springfield"}));

        let serialized = serde_json::to_string(&principal).unwrap();
        let restored: Principal = serde_json::from_str(&serialized).unwrap();
        assert_eq!(restored, principal);
    }
}
