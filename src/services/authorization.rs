//! Authorization manager: consent records and their lifecycle.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServerOptions;
use crate::dto::descriptors::AuthorizationDescriptor;
use crate::error::{ManagerError, StoreError};
use crate::models::{Authorization, AuthorizationStatus, AuthorizationType};
use crate::repositories::{filter_entities, AuthorizationStore};
use crate::utils::cache::EntityCache;
use crate::utils::secret::generate_concurrency_token;

#[derive(Clone)]
pub struct AuthorizationManager {
    store: Arc<dyn AuthorizationStore>,
    by_id: EntityCache<Option<Authorization>>,
    by_filter: EntityCache<Vec<Authorization>>,
    options: Arc<ServerOptions>,
}

impl AuthorizationManager {
    pub fn new(store: Arc<dyn AuthorizationStore>, options: Arc<ServerOptions>) -> Self {
        Self {
            store,
            by_id: EntityCache::new(options.entity_cache_window()),
            by_filter: EntityCache::new(options.entity_cache_window()),
            options,
        }
    }

    pub async fn create(
        &self,
        descriptor: &AuthorizationDescriptor,
    ) -> Result<Authorization, ManagerError> {
        let mut messages = Vec::new();
        if descriptor.kind.is_none() {
            messages.push("The authorization type is required.".to_string());
        }
        if descriptor.status.is_none() {
            messages.push("The authorization status is required.".to_string());
        }

        let mut entity = Authorization {
            id: Uuid::new_v4().to_string(),
            application_id: String::new(),
            subject: String::new(),
            status: AuthorizationStatus::Valid,
            kind: AuthorizationType::Permanent,
            scopes: Vec::new(),
            properties: None,
            concurrency_token: generate_concurrency_token(),
            created_at: Utc::now(),
        };
        descriptor.apply_to(&mut entity);

        messages.extend(self.validate(&entity));
        if !messages.is_empty() {
            return Err(ManagerError::validation(messages));
        }

        self.store.create(&entity).await?;
        self.invalidate();
        tracing::debug!(
            authorization = %entity.id,
            subject = %entity.subject,
            kind = %entity.kind.as_str(),
            "authorization created"
        );
        Ok(entity)
    }

    pub async fn update(&self, entity: &mut Authorization) -> Result<(), ManagerError> {
        let messages = self.validate(entity);
        if !messages.is_empty() {
            return Err(ManagerError::validation(messages));
        }

        let expected = std::mem::replace(
            &mut entity.concurrency_token,
            generate_concurrency_token(),
        );

        match self.store.update(entity, &expected).await {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(StoreError::Concurrency) => {
                entity.concurrency_token = expected;
                Err(ManagerError::Concurrency)
            }
            Err(other) => {
                entity.concurrency_token = expected;
                Err(other.into())
            }
        }
    }

    /// Deletes the authorization; the store cascades to its tokens.
    pub async fn delete(&self, entity: &Authorization) -> Result<(), ManagerError> {
        match self.store.delete(&entity.id, &entity.concurrency_token).await {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(StoreError::Concurrency) => Err(ManagerError::Concurrency),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Authorization>, ManagerError> {
        let key = format!("id:{id}");
        if !self.options.disable_entity_caching {
            if let Some(cached) = self.by_id.get(&key) {
                return Ok(cached);
            }
        }

        let found = self
            .store
            .find_by_id(id)
            .await?
            .filter(|entity| self.options.disable_additional_filtering || entity.id == id);

        if !self.options.disable_entity_caching {
            self.by_id.insert(key, found.clone());
        }
        Ok(found)
    }

    /// The domain finder: authorizations of a subject for a client, optionally
    /// narrowed by status, type and a minimum granted scope set.
    pub async fn find(
        &self,
        subject: &str,
        application_id: &str,
        status: Option<AuthorizationStatus>,
        kind: Option<AuthorizationType>,
        scopes: Option<&[String]>,
    ) -> Result<Vec<Authorization>, ManagerError> {
        let key = format!(
            "find:{subject}\u{1f}{application_id}\u{1f}{}\u{1f}{}\u{1f}{}",
            status.map(|s| s.as_str()).unwrap_or("*"),
            kind.map(|k| k.as_str()).unwrap_or("*"),
            scopes.map(|s| s.join(" ")).unwrap_or_default(),
        );
        if !self.options.disable_entity_caching {
            if let Some(cached) = self.by_filter.get(&key) {
                return Ok(cached);
            }
        }

        let candidates = self
            .store
            .find_by_subject_and_application(subject, application_id, status)
            .await?;

        let results: Vec<Authorization> = candidates
            .into_iter()
            .filter(|entity| {
                // Backend collation may have over-matched the subject.
                (self.options.disable_additional_filtering || entity.subject == subject)
                    && kind.map_or(true, |k| entity.kind == k)
                    && scopes.map_or(true, |s| {
                        entity.has_scopes(s.iter().map(String::as_str))
                    })
            })
            .collect();

        if !self.options.disable_entity_caching {
            self.by_filter.insert(key, results.clone());
        }
        Ok(results)
    }

    pub async fn count(&self) -> Result<u64, ManagerError> {
        Ok(self.store.count().await?)
    }

    pub fn list(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
    ) -> crate::repositories::EntityStream<'_, Authorization> {
        self.store.list(count, offset)
    }

    pub fn list_where<'a>(
        &'a self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Authorization) -> bool + Send + Sync + 'a,
    ) -> crate::repositories::EntityStream<'a, Authorization> {
        filter_entities(self.store.list(None, None), cancellation.clone(), predicate)
    }

    pub async fn get_where(
        &self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Authorization) -> bool + Send + Sync,
    ) -> Result<Option<Authorization>, ManagerError> {
        let mut stream = self.list_where(cancellation, predicate);
        Ok(stream.try_next().await?)
    }

    pub async fn count_where(
        &self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Authorization) -> bool + Send + Sync,
    ) -> Result<u64, ManagerError> {
        let mut stream = self.list_where(cancellation, predicate);
        let mut count = 0;
        while stream.try_next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub fn populate_descriptor(&self, entity: &Authorization) -> AuthorizationDescriptor {
        AuthorizationDescriptor::from_entity(entity)
    }

    pub fn validate(&self, entity: &Authorization) -> Vec<String> {
        let mut messages = Vec::new();

        if entity.subject.is_empty() {
            messages.push("The subject is required.".to_string());
        }
        if entity.application_id.is_empty() {
            messages.push("The application identifier is required.".to_string());
        }
        for scope in &entity.scopes {
            if scope.is_empty() {
                messages.push("Scopes cannot be empty.".to_string());
            } else if scope.contains(' ') {
                messages.push(format!("The scope '{scope}' contains a space."));
            }
        }

        messages
    }

    /// Marks the authorization revoked. Revoking an already-revoked entity
    /// is a no-op.
    pub async fn revoke(&self, entity: &mut Authorization) -> Result<(), ManagerError> {
        if entity.is_revoked() {
            return Ok(());
        }
        entity.status = AuthorizationStatus::Revoked;
        self.update(entity).await?;
        tracing::info!(authorization = %entity.id, "authorization revoked");
        Ok(())
    }

    /// Removes invalid authorizations and spent ad-hoc grants older than the
    /// retention window.
    pub async fn prune(&self, retention: Duration) -> Result<u64, ManagerError> {
        let threshold = Utc::now() - retention;
        let removed = self.store.prune(threshold).await?;
        if removed > 0 {
            self.invalidate();
            tracing::info!(removed, "pruned authorizations");
        }
        Ok(removed)
    }

    fn invalidate(&self) {
        self.by_id.clear();
        self.by_filter.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;

    fn manager() -> (AuthorizationManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = AuthorizationManager::new(
            store.clone(),
            Arc::new(ServerOptions::default()),
        );
        (manager, store)
    }

    fn descriptor(subject: &str, scopes: &[&str]) -> AuthorizationDescriptor {
        AuthorizationDescriptor {
            application_id: Some("app-1".to_string()),
            subject: Some(subject.to_string()),
            status: Some(AuthorizationStatus::Valid),
            kind: Some(AuthorizationType::Permanent),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            properties: None,
        }
    }

    #[tokio::test]
    async fn test_create_requires_type_and_status() {
        let (manager, _) = manager();
        let mut incomplete = descriptor("alice", &["openid"]);
        incomplete.kind = None;
        incomplete.status = None;

        let error = manager.create(&incomplete).await.unwrap_err();
        match error {
            ManagerError::Validation { messages } => {
                assert_eq!(messages.len(), 2);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scopes_with_spaces_are_rejected() {
        let (manager, _) = manager();
        let error = manager
            .create(&descriptor("alice", &["openid profile"]))
            .await
            .unwrap_err();
        assert!(matches!(error, ManagerError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_find_filters_subject_byte_exact() {
        let (manager, _) = manager();
        manager.create(&descriptor("Alice", &["openid"])).await.unwrap();

        let exact = manager
            .find("Alice", "app-1", None, None, None)
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);

        let near_miss = manager
            .find("alice", "app-1", None, None, None)
            .await
            .unwrap();
        assert!(near_miss.is_empty());
    }

    #[tokio::test]
    async fn test_find_narrows_by_scope_subset() {
        let (manager, _) = manager();
        manager
            .create(&descriptor("alice", &["openid", "profile"]))
            .await
            .unwrap();

        let wanted = vec!["openid".to_string()];
        let found = manager
            .find("alice", "app-1", None, None, Some(&wanted))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let wanted = vec!["openid".to_string(), "email".to_string()];
        let found = manager
            .find("alice", "app-1", None, None, Some(&wanted))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (manager, _) = manager();
        let mut entity = manager.create(&descriptor("alice", &["openid"])).await.unwrap();

        manager.revoke(&mut entity).await.unwrap();
        assert!(entity.is_revoked());
        let token_after_first = entity.concurrency_token.clone();

        manager.revoke(&mut entity).await.unwrap();
        assert_eq!(entity.concurrency_token, token_after_first);
    }
}
