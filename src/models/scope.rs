//! Registered scopes and their resource audiences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named permission a client may request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub id: String,
    /// Unique scope name, case-sensitive on the wire.
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Audiences attached to tokens carrying this scope.
    pub resources: Vec<String>,
    pub concurrency_token: String,
    pub created_at: DateTime<Utc>,
}

/// Row type bridging the MySQL layout.
#[derive(Clone, Debug, FromRow)]
pub struct ScopeRow {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub resources: serde_json::Value,
    pub concurrency_token: String,
    pub created_at: DateTime<Utc>,
}

impl From<ScopeRow> for Scope {
    fn from(row: ScopeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            description: row.description,
            resources: serde_json::from_value(row.resources).unwrap_or_default(),
            concurrency_token: row.concurrency_token,
            created_at: row.created_at,
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow> for Scope {
    fn from_row(row: &'r sqlx::mysql::MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Scope::from(ScopeRow::from_row(row)?))
    }
}
