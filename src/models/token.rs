//! Issued grants: authorization codes, access/refresh/identity tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    #[default]
    Access,
    Refresh,
    AuthorizationCode,
    DeviceCode,
    UserCode,
    IdToken,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::AuthorizationCode => "authorization_code",
            TokenType::DeviceCode => "device_code",
            TokenType::UserCode => "user_code",
            TokenType::IdToken => "id_token",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(TokenType::Access),
            "refresh" => Some(TokenType::Refresh),
            "authorization_code" => Some(TokenType::AuthorizationCode),
            "device_code" => Some(TokenType::DeviceCode),
            "user_code" => Some(TokenType::UserCode),
            "id_token" => Some(TokenType::IdToken),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    #[default]
    Valid,
    /// Single-use credential already exchanged. Terminal for codes.
    Redeemed,
    /// Explicitly revoked. Terminal.
    Revoked,
    Inactive,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Valid => "valid",
            TokenStatus::Redeemed => "redeemed",
            TokenStatus::Revoked => "revoked",
            TokenStatus::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "valid" => Some(TokenStatus::Valid),
            "redeemed" => Some(TokenStatus::Redeemed),
            "revoked" => Some(TokenStatus::Revoked),
            "inactive" => Some(TokenStatus::Inactive),
            _ => None,
        }
    }
}

/// A persisted grant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    /// Server-issued opaque handle (hashed); how reference tokens and codes
    /// presented on the wire are looked up.
    pub reference_id: Option<String>,
    pub application_id: String,
    pub authorization_id: Option<String>,
    pub subject: Option<String>,
    pub kind: TokenType,
    pub status: TokenStatus,
    pub creation_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    /// Serialized principal or ciphertext attached to the grant.
    #[serde(skip_serializing)]
    pub payload: Option<String>,
    pub properties: Option<serde_json::Value>,
    pub concurrency_token: String,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        match self.expiration_date {
            Some(expiration) => Utc::now() > expiration,
            None => false,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.status == TokenStatus::Revoked
    }

    pub fn is_redeemed(&self) -> bool {
        self.status == TokenStatus::Redeemed
    }

    /// Valid status and not past expiration.
    pub fn is_valid(&self) -> bool {
        self.status == TokenStatus::Valid && !self.is_expired()
    }
}

/// Row type bridging the MySQL layout.
#[derive(Clone, Debug, FromRow)]
pub struct TokenRow {
    pub id: String,
    pub reference_id: Option<String>,
    pub application_id: String,
    pub authorization_id: Option<String>,
    pub subject: Option<String>,
    pub kind: String,
    pub status: String,
    pub creation_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub payload: Option<String>,
    pub properties: Option<serde_json::Value>,
    pub concurrency_token: String,
}

impl From<TokenRow> for Token {
    fn from(row: TokenRow) -> Self {
        Self {
            id: row.id,
            reference_id: row.reference_id,
            application_id: row.application_id,
            authorization_id: row.authorization_id,
            subject: row.subject,
            kind: TokenType::parse(&row.kind).unwrap_or_default(),
            status: TokenStatus::parse(&row.status).unwrap_or_default(),
            creation_date: row.creation_date,
            expiration_date: row.expiration_date,
            payload: row.payload,
            properties: row.properties,
            concurrency_token: row.concurrency_token,
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow> for Token {
    fn from_row(row: &'r sqlx::mysql::MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Token::from(TokenRow::from_row(row)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(status: TokenStatus, expires_in: i64) -> Token {
        Token {
            id: "t-1".to_string(),
            reference_id: None,
            application_id: "app-1".to_string(),
            authorization_id: None,
            subject: Some("alice".to_string()),
            kind: TokenType::Access,
            status,
            creation_date: Utc::now(),
            expiration_date: Some(Utc::now() + Duration::seconds(expires_in)),
            payload: None,
            properties: None,
            concurrency_token: "ct".to_string(),
        }
    }

    #[test]
    fn test_expired_token_is_not_valid() {
        assert!(sample(TokenStatus::Valid, 60).is_valid());
        assert!(!sample(TokenStatus::Valid, -60).is_valid());
    }

    #[test]
    fn test_status_gates_validity() {
        assert!(!sample(TokenStatus::Revoked, 60).is_valid());
        assert!(!sample(TokenStatus::Redeemed, 60).is_valid());
        assert!(!sample(TokenStatus::Inactive, 60).is_valid());
    }

    #[test]
    fn test_revoked_predicate_matches_status() {
        let token = sample(TokenStatus::Revoked, 60);
        assert!(token.is_revoked());
        assert!(!sample(TokenStatus::Valid, 60).is_revoked());
    }
}
