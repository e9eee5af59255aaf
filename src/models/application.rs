//! Registered OAuth client applications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Confidentiality level of a client (RFC 6749 §2.1).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Public,
    Confidential,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Public => "public",
            ClientType::Confidential => "confidential",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(ClientType::Public),
            "confidential" => Some(ClientType::Confidential),
            _ => None,
        }
    }
}

/// How consent is obtained for a client's authorization requests.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentType {
    /// The user must approve every new scope set; grants are persisted.
    #[default]
    Explicit,
    /// Consent is assumed; a permanent authorization is created silently.
    Implicit,
    /// Consent is managed outside the server; requests without a prior
    /// authorization are rejected.
    External,
    /// Consent is granted programmatically on every request (ad-hoc grants).
    Systematic,
}

impl ConsentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentType::Explicit => "explicit",
            ConsentType::Implicit => "implicit",
            ConsentType::External => "external",
            ConsentType::Systematic => "systematic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "explicit" => Some(ConsentType::Explicit),
            "implicit" => Some(ConsentType::Implicit),
            "external" => Some(ConsentType::External),
            "systematic" => Some(ConsentType::Systematic),
            _ => None,
        }
    }
}

/// Permission strings attached to an application. Opaque on the wire; the
/// prefixes group them by what they unlock.
pub mod permissions {
    pub mod endpoints {
        pub const AUTHORIZATION: &str = "ept:authorization";
        pub const INTROSPECTION: &str = "ept:introspection";
        pub const LOGOUT: &str = "ept:logout";
        pub const REVOCATION: &str = "ept:revocation";
        pub const TOKEN: &str = "ept:token";
    }

    pub mod grant_types {
        pub const AUTHORIZATION_CODE: &str = "gt:authorization_code";
        pub const CLIENT_CREDENTIALS: &str = "gt:client_credentials";
        pub const DEVICE_CODE: &str = "gt:urn:ietf:params:oauth:grant-type:device_code";
        pub const PASSWORD: &str = "gt:password";
        pub const REFRESH_TOKEN: &str = "gt:refresh_token";
    }

    pub mod response_types {
        pub const CODE: &str = "rst:code";
        pub const CODE_ID_TOKEN: &str = "rst:code id_token";
        pub const CODE_ID_TOKEN_TOKEN: &str = "rst:code id_token token";
        pub const CODE_TOKEN: &str = "rst:code token";
        pub const ID_TOKEN: &str = "rst:id_token";
        pub const ID_TOKEN_TOKEN: &str = "rst:id_token token";
        pub const TOKEN: &str = "rst:token";
    }

    /// Prefix for scope permissions: `scp:` followed by the scope name.
    pub const SCOPE_PREFIX: &str = "scp:";

    pub fn scope(name: &str) -> String {
        format!("{SCOPE_PREFIX}{name}")
    }

    pub mod features {
        /// Userinfo responses for this client are returned as signed JWTs.
        pub const SIGNED_USERINFO: &str = "ft:signed_userinfo";
    }
}

/// A registered OAuth client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Opaque entity identifier.
    pub id: String,
    /// Public client identifier, unique and case-sensitive.
    pub client_id: String,
    /// Bcrypt hash of the client secret; absent for public clients.
    #[serde(skip_serializing)]
    pub client_secret_hash: Option<String>,
    pub client_type: ClientType,
    pub consent_type: ConsentType,
    pub display_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub permissions: Vec<String>,
    /// Regenerated on every update; stale writes are rejected.
    pub concurrency_token: String,
    pub created_at: DateTime<Utc>,
}

impl Application {
    pub fn is_confidential(&self) -> bool {
        self.client_type == ClientType::Confidential
    }

    pub fn is_public(&self) -> bool {
        self.client_type == ClientType::Public
    }

    /// Exact string-equality match against the registered redirect URIs.
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    pub fn has_post_logout_redirect_uri(&self, uri: &str) -> bool {
        self.post_logout_redirect_uris.iter().any(|u| u == uri)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Row type bridging the MySQL layout (JSON columns for the string sets).
#[derive(Clone, Debug, FromRow)]
pub struct ApplicationRow {
    pub id: String,
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub client_type: String,
    pub consent_type: String,
    pub display_name: Option<String>,
    pub redirect_uris: serde_json::Value,
    pub post_logout_redirect_uris: serde_json::Value,
    pub permissions: serde_json::Value,
    pub concurrency_token: String,
    pub created_at: DateTime<Utc>,
}

impl From<ApplicationRow> for Application {
    fn from(row: ApplicationRow) -> Self {
        Self {
            id: row.id,
            client_id: row.client_id,
            client_secret_hash: row.client_secret_hash,
            client_type: ClientType::parse(&row.client_type).unwrap_or_default(),
            consent_type: ConsentType::parse(&row.consent_type).unwrap_or_default(),
            display_name: row.display_name,
            redirect_uris: serde_json::from_value(row.redirect_uris).unwrap_or_default(),
            post_logout_redirect_uris: serde_json::from_value(row.post_logout_redirect_uris)
                .unwrap_or_default(),
            permissions: serde_json::from_value(row.permissions).unwrap_or_default(),
            concurrency_token: row.concurrency_token,
            created_at: row.created_at,
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow> for Application {
    fn from_row(row: &'r sqlx::mysql::MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Application::from(ApplicationRow::from_row(row)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Application {
        Application {
            id: "app-1".to_string(),
            client_id: "c1".to_string(),
            client_secret_hash: None,
            client_type: ClientType::Public,
            consent_type: ConsentType::Explicit,
            display_name: Some("Sample".to_string()),
            redirect_uris: vec!["https://app/cb".to_string()],
            post_logout_redirect_uris: vec!["https://app/bye".to_string()],
            permissions: vec![
                permissions::endpoints::TOKEN.to_string(),
                permissions::scope("openid"),
            ],
            concurrency_token: "ct-1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_redirect_uri_match_is_exact() {
        let app = sample();
        assert!(app.has_redirect_uri("https://app/cb"));
        assert!(!app.has_redirect_uri("https://app/cb/"));
        assert!(!app.has_redirect_uri("https://APP/cb"));
    }

    #[test]
    fn test_permission_lookup() {
        let app = sample();
        assert!(app.has_permission("ept:token"));
        assert!(app.has_permission("scp:openid"));
        assert!(!app.has_permission("gt:password"));
    }

    #[test]
    fn test_client_type_parse_is_strict() {
        assert_eq!(ClientType::parse("confidential"), Some(ClientType::Confidential));
        assert_eq!(ClientType::parse("Confidential"), None);
        assert_eq!(ConsentType::parse("systematic"), Some(ConsentType::Systematic));
        assert_eq!(ConsentType::parse("bogus"), None);
    }
}
