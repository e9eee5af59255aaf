//! In-memory store, used by the test suite and storeless demos.
//!
//! Lookups by string attributes match case-insensitively on purpose: that
//! mirrors the collation of the default MySQL backend and keeps the managers'
//! case-sensitive post-filter honest in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream;

use crate::error::StoreError;
use crate::models::{Application, Authorization, AuthorizationStatus, Scope, Token, TokenStatus};
use crate::repositories::{
    ApplicationStore, AuthorizationStore, EntityStream, ScopeStore, TokenStore,
};

/// A single in-memory store backing all four entity kinds.
#[derive(Default)]
pub struct MemoryStore {
    applications: DashMap<String, Application>,
    authorizations: DashMap<String, Authorization>,
    tokens: DashMap<String, Token>,
    scopes: DashMap<String, Scope>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn page<T: Clone>(mut items: Vec<T>, count: Option<usize>, offset: Option<usize>) -> Vec<T> {
    let offset = offset.unwrap_or(0);
    if offset >= items.len() {
        return Vec::new();
    }
    items.drain(..offset);
    if let Some(count) = count {
        items.truncate(count);
    }
    items
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn create(&self, entity: &Application) -> Result<(), StoreError> {
        self.applications.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn update(&self, entity: &Application, expected_token: &str) -> Result<(), StoreError> {
        let mut current = self
            .applications
            .get_mut(&entity.id)
            .ok_or(StoreError::NotFound)?;
        if current.concurrency_token != expected_token {
            return Err(StoreError::Concurrency);
        }
        *current = entity.clone();
        Ok(())
    }

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError> {
        match self.applications.get(id) {
            Some(current) if current.concurrency_token != expected_token => {
                return Err(StoreError::Concurrency)
            }
            None => return Err(StoreError::NotFound),
            _ => {}
        }
        self.applications.remove(id);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self.applications.get(id).map(|e| e.clone()))
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Vec<Application>, StoreError> {
        Ok(self
            .applications
            .iter()
            .filter(|e| eq_ignore_case(&e.client_id, client_id))
            .map(|e| e.clone())
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.applications.len() as u64)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Application> {
        let mut items: Vec<Application> = self.applications.iter().map(|e| e.clone()).collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Box::pin(stream::iter(page(items, count, offset).into_iter().map(Ok)))
    }
}

#[async_trait]
impl AuthorizationStore for MemoryStore {
    async fn create(&self, entity: &Authorization) -> Result<(), StoreError> {
        self.authorizations.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn update(
        &self,
        entity: &Authorization,
        expected_token: &str,
    ) -> Result<(), StoreError> {
        let mut current = self
            .authorizations
            .get_mut(&entity.id)
            .ok_or(StoreError::NotFound)?;
        if current.concurrency_token != expected_token {
            return Err(StoreError::Concurrency);
        }
        *current = entity.clone();
        Ok(())
    }

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError> {
        match self.authorizations.get(id) {
            Some(current) if current.concurrency_token != expected_token => {
                return Err(StoreError::Concurrency)
            }
            None => return Err(StoreError::NotFound),
            _ => {}
        }
        self.authorizations.remove(id);
        // Cascade: a single process has no real transaction to wrap this in.
        self.tokens
            .retain(|_, token| token.authorization_id.as_deref() != Some(id));
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Authorization>, StoreError> {
        Ok(self.authorizations.get(id).map(|e| e.clone()))
    }

    async fn find_by_subject_and_application(
        &self,
        subject: &str,
        application_id: &str,
        status: Option<AuthorizationStatus>,
    ) -> Result<Vec<Authorization>, StoreError> {
        Ok(self
            .authorizations
            .iter()
            .filter(|e| {
                eq_ignore_case(&e.subject, subject)
                    && e.application_id == application_id
                    && status.map_or(true, |s| e.status == s)
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn find_by_application_id(
        &self,
        application_id: &str,
    ) -> Result<Vec<Authorization>, StoreError> {
        Ok(self
            .authorizations
            .iter()
            .filter(|e| e.application_id == application_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.authorizations.len() as u64)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Authorization> {
        let mut items: Vec<Authorization> =
            self.authorizations.iter().map(|e| e.clone()).collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Box::pin(stream::iter(page(items, count, offset).into_iter().map(Ok)))
    }

    async fn prune(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let prunable: Vec<String> = self
            .authorizations
            .iter()
            .filter(|authorization| {
                if authorization.created_at >= created_before {
                    return false;
                }
                if !authorization.is_valid() {
                    return true;
                }
                if !authorization.is_ad_hoc() {
                    return false;
                }
                // Ad-hoc grants survive only while a usable token remains.
                !self.tokens.iter().any(|token| {
                    token.authorization_id.as_deref() == Some(authorization.id.as_str())
                        && token.is_valid()
                })
            })
            .map(|e| e.id.clone())
            .collect();

        let removed = prunable.len() as u64;
        for id in prunable {
            self.authorizations.remove(&id);
            self.tokens
                .retain(|_, token| token.authorization_id.as_deref() != Some(id.as_str()));
        }
        Ok(removed)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create(&self, entity: &Token) -> Result<(), StoreError> {
        self.tokens.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn update(&self, entity: &Token, expected_token: &str) -> Result<(), StoreError> {
        let mut current = self.tokens.get_mut(&entity.id).ok_or(StoreError::NotFound)?;
        if current.concurrency_token != expected_token {
            return Err(StoreError::Concurrency);
        }
        *current = entity.clone();
        Ok(())
    }

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError> {
        match self.tokens.get(id) {
            Some(current) if current.concurrency_token != expected_token => {
                return Err(StoreError::Concurrency)
            }
            None => return Err(StoreError::NotFound),
            _ => {}
        }
        self.tokens.remove(id);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.tokens.get(id).map(|e| e.clone()))
    }

    async fn find_by_reference_id(&self, reference_id: &str) -> Result<Vec<Token>, StoreError> {
        Ok(self
            .tokens
            .iter()
            .filter(|e| {
                e.reference_id
                    .as_deref()
                    .map_or(false, |r| eq_ignore_case(r, reference_id))
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn find_by_authorization_id(
        &self,
        authorization_id: &str,
    ) -> Result<Vec<Token>, StoreError> {
        Ok(self
            .tokens
            .iter()
            .filter(|e| e.authorization_id.as_deref() == Some(authorization_id))
            .map(|e| e.clone())
            .collect())
    }

    async fn find_by_subject_and_application(
        &self,
        subject: &str,
        application_id: &str,
    ) -> Result<Vec<Token>, StoreError> {
        Ok(self
            .tokens
            .iter()
            .filter(|e| {
                e.application_id == application_id
                    && e.subject.as_deref().map_or(false, |s| eq_ignore_case(s, subject))
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn revoke_by_authorization_id(
        &self,
        authorization_id: &str,
    ) -> Result<u64, StoreError> {
        let mut affected = 0;
        for mut entry in self.tokens.iter_mut() {
            if entry.authorization_id.as_deref() == Some(authorization_id)
                && entry.status != TokenStatus::Revoked
            {
                entry.status = TokenStatus::Revoked;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn try_transition_status(
        &self,
        id: &str,
        from: TokenStatus,
        to: TokenStatus,
        expected_token: &str,
        new_concurrency_token: &str,
    ) -> Result<bool, StoreError> {
        let mut current = self.tokens.get_mut(id).ok_or(StoreError::NotFound)?;
        if current.status != from || current.concurrency_token != expected_token {
            return Ok(false);
        }
        current.status = to;
        current.concurrency_token = new_concurrency_token.to_string();
        Ok(true)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.tokens.len() as u64)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Token> {
        let mut items: Vec<Token> = self.tokens.iter().map(|e| e.clone()).collect();
        items.sort_by(|a, b| a.creation_date.cmp(&b.creation_date));
        Box::pin(stream::iter(page(items, count, offset).into_iter().map(Ok)))
    }

    async fn prune(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| {
            token.creation_date >= created_before || token.is_valid()
        });
        Ok((before - self.tokens.len()) as u64)
    }
}

#[async_trait]
impl ScopeStore for MemoryStore {
    async fn create(&self, entity: &Scope) -> Result<(), StoreError> {
        self.scopes.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn update(&self, entity: &Scope, expected_token: &str) -> Result<(), StoreError> {
        let mut current = self.scopes.get_mut(&entity.id).ok_or(StoreError::NotFound)?;
        if current.concurrency_token != expected_token {
            return Err(StoreError::Concurrency);
        }
        *current = entity.clone();
        Ok(())
    }

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError> {
        match self.scopes.get(id) {
            Some(current) if current.concurrency_token != expected_token => {
                return Err(StoreError::Concurrency)
            }
            None => return Err(StoreError::NotFound),
            _ => {}
        }
        self.scopes.remove(id);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Scope>, StoreError> {
        Ok(self.scopes.get(id).map(|e| e.clone()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Scope>, StoreError> {
        Ok(self
            .scopes
            .iter()
            .filter(|e| eq_ignore_case(&e.name, name))
            .map(|e| e.clone())
            .collect())
    }

    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Scope>, StoreError> {
        Ok(self
            .scopes
            .iter()
            .filter(|e| names.iter().any(|n| eq_ignore_case(&e.name, n)))
            .map(|e| e.clone())
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.scopes.len() as u64)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Scope> {
        let mut items: Vec<Scope> = self.scopes.iter().map(|e| e.clone()).collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Box::pin(stream::iter(page(items, count, offset).into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorizationType, ClientType, ConsentType, TokenType};
    use chrono::Duration;

    fn application(id: &str, client_id: &str) -> Application {
        Application {
            id: id.to_string(),
            client_id: client_id.to_string(),
            client_secret_hash: None,
            client_type: ClientType::Public,
            consent_type: ConsentType::Explicit,
            display_name: None,
            redirect_uris: vec![],
            post_logout_redirect_uris: vec![],
            permissions: vec![],
            concurrency_token: "ct-0".to_string(),
            created_at: Utc::now(),
        }
    }

    fn token(id: &str, authorization_id: Option<&str>, status: TokenStatus, age: i64) -> Token {
        Token {
            id: id.to_string(),
            reference_id: None,
            application_id: "app-1".to_string(),
            authorization_id: authorization_id.map(str::to_owned),
            subject: Some("alice".to_string()),
            kind: TokenType::Access,
            status,
            creation_date: Utc::now() - Duration::seconds(age),
            expiration_date: Some(Utc::now() + Duration::seconds(300)),
            payload: None,
            properties: None,
            concurrency_token: "ct-0".to_string(),
        }
    }

    fn authorization(id: &str, kind: AuthorizationType, age: i64) -> Authorization {
        Authorization {
            id: id.to_string(),
            application_id: "app-1".to_string(),
            subject: "alice".to_string(),
            status: AuthorizationStatus::Valid,
            kind,
            scopes: vec!["openid".to_string()],
            properties: None,
            concurrency_token: "ct-0".to_string(),
            created_at: Utc::now() - Duration::seconds(age),
        }
    }

    #[tokio::test]
    async fn test_update_rejects_stale_concurrency_token() {
        let store = MemoryStore::new();
        let mut app = application("app-1", "c1");
        ApplicationStore::create(&store, &app).await.unwrap();

        app.concurrency_token = "ct-1".to_string();
        let result = ApplicationStore::update(&store, &app, "wrong").await;
        assert!(matches!(result, Err(StoreError::Concurrency)));

        let result = ApplicationStore::update(&store, &app, "ct-0").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_client_id_lookup_is_case_insensitive_like_mysql() {
        let store = MemoryStore::new();
        ApplicationStore::create(&store, &application("app-1", "Client")).await.unwrap();

        let found = store.find_by_client_id("client").await.unwrap();
        assert_eq!(found.len(), 1, "backend over-matching is expected here");
    }

    #[tokio::test]
    async fn test_delete_authorization_cascades_to_tokens() {
        let store = MemoryStore::new();
        let auth = authorization("a-1", AuthorizationType::Permanent, 0);
        AuthorizationStore::create(&store, &auth).await.unwrap();
        TokenStore::create(&store, &token("t-1", Some("a-1"), TokenStatus::Valid, 0))
            .await
            .unwrap();
        TokenStore::create(&store, &token("t-2", None, TokenStatus::Valid, 0))
            .await
            .unwrap();

        AuthorizationStore::delete(&store, "a-1", "ct-0").await.unwrap();
        assert!(TokenStore::find_by_id(&store, "t-1").await.unwrap().is_none());
        assert!(TokenStore::find_by_id(&store, "t-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_try_transition_status_first_writer_wins() {
        let store = MemoryStore::new();
        TokenStore::create(&store, &token("t-1", None, TokenStatus::Valid, 0))
            .await
            .unwrap();

        let first = store
            .try_transition_status("t-1", TokenStatus::Valid, TokenStatus::Redeemed, "ct-0", "ct-1")
            .await
            .unwrap();
        let second = store
            .try_transition_status("t-1", TokenStatus::Valid, TokenStatus::Redeemed, "ct-0", "ct-2")
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn test_prune_removes_ad_hoc_authorization_without_live_tokens() {
        let store = MemoryStore::new();
        AuthorizationStore::create(&store, &authorization("a-1", AuthorizationType::AdHoc, 7200))
            .await
            .unwrap();
        AuthorizationStore::create(&store, &authorization("a-2", AuthorizationType::AdHoc, 7200))
            .await
            .unwrap();
        AuthorizationStore::create(
            &store,
            &authorization("a-3", AuthorizationType::Permanent, 7200),
        )
        .await
        .unwrap();
        // a-2 still has a live token, a-1 only a revoked one.
        TokenStore::create(&store, &token("t-1", Some("a-1"), TokenStatus::Revoked, 7200))
            .await
            .unwrap();
        TokenStore::create(&store, &token("t-2", Some("a-2"), TokenStatus::Valid, 0))
            .await
            .unwrap();

        let removed = AuthorizationStore::prune(&store, Utc::now() - Duration::seconds(3600))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(AuthorizationStore::find_by_id(&store, "a-1").await.unwrap().is_none());
        assert!(AuthorizationStore::find_by_id(&store, "a-2").await.unwrap().is_some());
        assert!(AuthorizationStore::find_by_id(&store, "a-3").await.unwrap().is_some());
    }
}
