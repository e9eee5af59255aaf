//! Consent records binding a subject to a client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    #[default]
    Valid,
    Revoked,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "valid" => Some(AuthorizationStatus::Valid),
            "revoked" => Some(AuthorizationStatus::Revoked),
            _ => None,
        }
    }
}

/// Lifetime class of an authorization. Comparison is case-insensitive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    /// Created implicitly to back a single grant; pruned once its tokens die.
    AdHoc,
    #[default]
    Permanent,
}

impl AuthorizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationType::AdHoc => "ad_hoc",
            AuthorizationType::Permanent => "permanent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("ad_hoc") {
            Some(AuthorizationType::AdHoc)
        } else if value.eq_ignore_ascii_case("permanent") {
            Some(AuthorizationType::Permanent)
        } else {
            None
        }
    }
}

/// A long-lived consent record for (subject, client).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub id: String,
    pub application_id: String,
    /// End-user identifier; compared byte-for-byte.
    pub subject: String,
    pub status: AuthorizationStatus,
    pub kind: AuthorizationType,
    pub scopes: Vec<String>,
    pub properties: Option<serde_json::Value>,
    pub concurrency_token: String,
    pub created_at: DateTime<Utc>,
}

impl Authorization {
    pub fn is_ad_hoc(&self) -> bool {
        self.kind == AuthorizationType::AdHoc
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == AuthorizationType::Permanent
    }

    pub fn is_revoked(&self) -> bool {
        self.status == AuthorizationStatus::Revoked
    }

    pub fn is_valid(&self) -> bool {
        self.status == AuthorizationStatus::Valid
    }

    /// Whether every scope in `scopes` was granted, byte-exact.
    pub fn has_scopes<'a, I: IntoIterator<Item = &'a str>>(&self, scopes: I) -> bool {
        scopes.into_iter().all(|s| self.scopes.iter().any(|g| g == s))
    }
}

/// Row type bridging the MySQL layout.
#[derive(Clone, Debug, FromRow)]
pub struct AuthorizationRow {
    pub id: String,
    pub application_id: String,
    pub subject: String,
    pub status: String,
    pub kind: String,
    pub scopes: serde_json::Value,
    pub properties: Option<serde_json::Value>,
    pub concurrency_token: String,
    pub created_at: DateTime<Utc>,
}

impl From<AuthorizationRow> for Authorization {
    fn from(row: AuthorizationRow) -> Self {
        Self {
            id: row.id,
            application_id: row.application_id,
            subject: row.subject,
            status: AuthorizationStatus::parse(&row.status).unwrap_or_default(),
            kind: AuthorizationType::parse(&row.kind).unwrap_or_default(),
            scopes: serde_json::from_value(row.scopes).unwrap_or_default(),
            properties: row.properties,
            concurrency_token: row.concurrency_token,
            created_at: row.created_at,
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow> for Authorization {
    fn from_row(row: &'r sqlx::mysql::MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Authorization::from(AuthorizationRow::from_row(row)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_parse_is_case_insensitive() {
        assert_eq!(AuthorizationType::parse("ad_hoc"), Some(AuthorizationType::AdHoc));
        assert_eq!(AuthorizationType::parse("AD_HOC"), Some(AuthorizationType::AdHoc));
        assert_eq!(AuthorizationType::parse("Permanent"), Some(AuthorizationType::Permanent));
        assert_eq!(AuthorizationType::parse("other"), None);
    }

    #[test]
    fn test_has_scopes_is_subset_check() {
        let authorization = Authorization {
            id: "a-1".to_string(),
            application_id: "app-1".to_string(),
            subject: "alice".to_string(),
            status: AuthorizationStatus::Valid,
            kind: AuthorizationType::Permanent,
            scopes: vec!["openid".to_string(), "profile".to_string()],
            properties: None,
            concurrency_token: "ct".to_string(),
            created_at: Utc::now(),
        };

        assert!(authorization.has_scopes(["openid"]));
        assert!(authorization.has_scopes(["openid", "profile"]));
        assert!(!authorization.has_scopes(["openid", "email"]));
        assert!(!authorization.has_scopes(["OPENID"]));
    }
}
