//! Entity descriptors: the mutable counterpart of each persisted entity.
//!
//! Descriptors flow in both directions: `from_entity` snapshots an entity's
//! observable attributes, `apply_to` writes a descriptor back onto an entity
//! before the manager persists it. Identifiers and concurrency tokens are
//! owned by the manager/store and never travel through descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    Application, Authorization, AuthorizationStatus, AuthorizationType, ClientType, ConsentType,
    Scope, Token, TokenStatus, TokenType,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApplicationDescriptor {
    pub client_id: Option<String>,
    /// Plain-text secret to assign; hashed by the manager before storage.
    /// Never populated back from an entity.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub client_type: Option<ClientType>,
    pub consent_type: Option<ConsentType>,
    pub display_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub permissions: Vec<String>,
}

impl ApplicationDescriptor {
    pub fn from_entity(entity: &Application) -> Self {
        Self {
            client_id: Some(entity.client_id.clone()),
            client_secret: None,
            client_type: Some(entity.client_type),
            consent_type: Some(entity.consent_type),
            display_name: entity.display_name.clone(),
            redirect_uris: entity.redirect_uris.clone(),
            post_logout_redirect_uris: entity.post_logout_redirect_uris.clone(),
            permissions: entity.permissions.clone(),
        }
    }

    /// Writes the descriptor onto the entity. The secret is intentionally not
    /// applied here: hashing is the manager's job.
    pub fn apply_to(&self, entity: &mut Application) {
        if let Some(client_id) = &self.client_id {
            entity.client_id = client_id.clone();
        }
        if let Some(client_type) = self.client_type {
            entity.client_type = client_type;
        }
        if let Some(consent_type) = self.consent_type {
            entity.consent_type = consent_type;
        }
        entity.display_name = self.display_name.clone();
        entity.redirect_uris = self.redirect_uris.clone();
        entity.post_logout_redirect_uris = self.post_logout_redirect_uris.clone();
        entity.permissions = self.permissions.clone();
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthorizationDescriptor {
    pub application_id: Option<String>,
    pub subject: Option<String>,
    pub status: Option<AuthorizationStatus>,
    pub kind: Option<AuthorizationType>,
    pub scopes: Vec<String>,
    pub properties: Option<serde_json::Value>,
}

impl AuthorizationDescriptor {
    pub fn from_entity(entity: &Authorization) -> Self {
        Self {
            application_id: Some(entity.application_id.clone()),
            subject: Some(entity.subject.clone()),
            status: Some(entity.status),
            kind: Some(entity.kind),
            scopes: entity.scopes.clone(),
            properties: entity.properties.clone(),
        }
    }

    pub fn apply_to(&self, entity: &mut Authorization) {
        if let Some(application_id) = &self.application_id {
            entity.application_id = application_id.clone();
        }
        if let Some(subject) = &self.subject {
            entity.subject = subject.clone();
        }
        if let Some(status) = self.status {
            entity.status = status;
        }
        if let Some(kind) = self.kind {
            entity.kind = kind;
        }
        entity.scopes = self.scopes.clone();
        entity.properties = self.properties.clone();
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub reference_id: Option<String>,
    pub application_id: Option<String>,
    pub authorization_id: Option<String>,
    pub subject: Option<String>,
    pub kind: Option<TokenType>,
    pub status: Option<TokenStatus>,
    pub creation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub payload: Option<String>,
    pub properties: Option<serde_json::Value>,
}

impl TokenDescriptor {
    pub fn from_entity(entity: &Token) -> Self {
        Self {
            reference_id: entity.reference_id.clone(),
            application_id: Some(entity.application_id.clone()),
            authorization_id: entity.authorization_id.clone(),
            subject: entity.subject.clone(),
            kind: Some(entity.kind),
            status: Some(entity.status),
            creation_date: Some(entity.creation_date),
            expiration_date: entity.expiration_date,
            payload: entity.payload.clone(),
            properties: entity.properties.clone(),
        }
    }

    pub fn apply_to(&self, entity: &mut Token) {
        entity.reference_id = self.reference_id.clone();
        if let Some(application_id) = &self.application_id {
            entity.application_id = application_id.clone();
        }
        entity.authorization_id = self.authorization_id.clone();
        entity.subject = self.subject.clone();
        if let Some(kind) = self.kind {
            entity.kind = kind;
        }
        if let Some(status) = self.status {
            entity.status = status;
        }
        if let Some(creation_date) = self.creation_date {
            entity.creation_date = creation_date;
        }
        entity.expiration_date = self.expiration_date;
        entity.payload = self.payload.clone();
        entity.properties = self.properties.clone();
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub resources: Vec<String>,
}

impl ScopeDescriptor {
    pub fn from_entity(entity: &Scope) -> Self {
        Self {
            name: Some(entity.name.clone()),
            display_name: entity.display_name.clone(),
            description: entity.description.clone(),
            resources: entity.resources.clone(),
        }
    }

    pub fn apply_to(&self, entity: &mut Scope) {
        if let Some(name) = &self.name {
            entity.name = name.clone();
        }
        entity.display_name = self.display_name.clone();
        entity.description = self.description.clone();
        entity.resources = self.resources.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_descriptor_round_trip() {
        let original = Authorization {
            id: "a-1".to_string(),
            application_id: "app-1".to_string(),
            subject: "alice".to_string(),
            status: AuthorizationStatus::Valid,
            kind: AuthorizationType::AdHoc,
            scopes: vec!["openid".to_string(), "profile".to_string()],
            properties: Some(serde_json::json!({"origin": "test"})),
            concurrency_token: "ct".to_string(),
            created_at: Utc::now(),
        };

        let descriptor = AuthorizationDescriptor::from_entity(&original);
        let mut restored = original.clone();
        restored.subject = "other".to_string();
        restored.scopes.clear();
        descriptor.apply_to(&mut restored);

        assert_eq!(restored, original);
    }

    #[test]
    fn test_token_descriptor_round_trip() {
        let original = Token {
            id: "t-1".to_string(),
            reference_id: Some("ref".to_string()),
            application_id: "app-1".to_string(),
            authorization_id: Some("a-1".to_string()),
            subject: Some("alice".to_string()),
            kind: TokenType::AuthorizationCode,
            status: TokenStatus::Valid,
            creation_date: Utc::now(),
            expiration_date: Some(Utc::now()),
            payload: Some("payload".to_string()),
            properties: None,
            concurrency_token: "ct".to_string(),
        };

        let descriptor = TokenDescriptor::from_entity(&original);
        let mut restored = original.clone();
        restored.status = TokenStatus::Revoked;
        restored.reference_id = None;
        descriptor.apply_to(&mut restored);

        assert_eq!(restored, original);
    }

    #[test]
    fn test_application_descriptor_does_not_leak_secret() {
        let entity = Application {
            id: "app-1".to_string(),
            client_id: "c1".to_string(),
            client_secret_hash: Some("$2b$12$hash".to_string()),
            client_type: ClientType::Confidential,
            consent_type: ConsentType::Explicit,
            display_name: None,
            redirect_uris: vec![],
            post_logout_redirect_uris: vec![],
            permissions: vec![],
            concurrency_token: "ct".to_string(),
            created_at: Utc::now(),
        };

        let descriptor = ApplicationDescriptor::from_entity(&entity);
        assert!(descriptor.client_secret.is_none());
    }
}
