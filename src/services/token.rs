//! Token manager: issued grants, redemption and revocation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServerOptions;
use crate::dto::descriptors::TokenDescriptor;
use crate::error::{ManagerError, StoreError};
use crate::models::{Token, TokenStatus, TokenType};
use crate::repositories::{filter_entities, TokenStore};
use crate::utils::cache::EntityCache;
use crate::utils::secret::generate_concurrency_token;

/// Attempts before giving up on a contended revocation write.
const REVOKE_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    by_id: EntityCache<Option<Token>>,
    by_reference: EntityCache<Option<Token>>,
    options: Arc<ServerOptions>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, options: Arc<ServerOptions>) -> Self {
        Self {
            store,
            by_id: EntityCache::new(options.entity_cache_window()),
            by_reference: EntityCache::new(options.entity_cache_window()),
            options,
        }
    }

    pub async fn create(&self, descriptor: &TokenDescriptor) -> Result<Token, ManagerError> {
        let mut messages = Vec::new();
        if descriptor.kind.is_none() {
            messages.push("The token type is required.".to_string());
        }
        if descriptor.status.is_none() {
            messages.push("The token status is required.".to_string());
        }

        let mut entity = Token {
            id: Uuid::new_v4().to_string(),
            reference_id: None,
            application_id: String::new(),
            authorization_id: None,
            subject: None,
            kind: TokenType::Access,
            status: TokenStatus::Valid,
            creation_date: Utc::now(),
            expiration_date: None,
            payload: None,
            properties: None,
            concurrency_token: generate_concurrency_token(),
        };
        descriptor.apply_to(&mut entity);

        messages.extend(self.validate(&entity));
        if !messages.is_empty() {
            return Err(ManagerError::validation(messages));
        }

        self.store.create(&entity).await?;
        self.invalidate();
        tracing::debug!(
            token = %entity.id,
            kind = %entity.kind.as_str(),
            application = %entity.application_id,
            "token persisted"
        );
        Ok(entity)
    }

    pub async fn update(&self, entity: &mut Token) -> Result<(), ManagerError> {
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

    pub async fn delete(&self, entity: &Token) -> Result<(), ManagerError> {
        match self.store.delete(&entity.id, &entity.concurrency_token).await {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(StoreError::Concurrency) => Err(ManagerError::Concurrency),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Token>, ManagerError> {
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

    /// Looks up a token by its stored reference digest, byte-for-byte.
    pub async fn find_by_reference_id(
        &self,
        reference_id: &str,
    ) -> Result<Option<Token>, ManagerError> {
        let key = format!("reference:{reference_id}");
        if !self.options.disable_entity_caching {
            if let Some(cached) = self.by_reference.get(&key) {
                return Ok(cached);
            }
        }

        let candidates = self.store.find_by_reference_id(reference_id).await?;
        let found = if self.options.disable_additional_filtering {
            candidates.into_iter().next()
        } else {
            candidates
                .into_iter()
                .find(|entity| entity.reference_id.as_deref() == Some(reference_id))
        };

        if !self.options.disable_entity_caching {
            self.by_reference.insert(key, found.clone());
        }
        Ok(found)
    }

    pub async fn find_by_authorization_id(
        &self,
        authorization_id: &str,
    ) -> Result<Vec<Token>, ManagerError> {
        Ok(self.store.find_by_authorization_id(authorization_id).await?)
    }

    pub async fn find_by_subject_and_application(
        &self,
        subject: &str,
        application_id: &str,
    ) -> Result<Vec<Token>, ManagerError> {
        let candidates = self
            .store
            .find_by_subject_and_application(subject, application_id)
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|entity| {
                self.options.disable_additional_filtering
                    || entity.subject.as_deref() == Some(subject)
            })
            .collect())
    }

    pub async fn count(&self) -> Result<u64, ManagerError> {
        Ok(self.store.count().await?)
    }

    pub fn list(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
    ) -> crate::repositories::EntityStream<'_, Token> {
        self.store.list(count, offset)
    }

    pub fn list_where<'a>(
        &'a self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Token) -> bool + Send + Sync + 'a,
    ) -> crate::repositories::EntityStream<'a, Token> {
        filter_entities(self.store.list(None, None), cancellation.clone(), predicate)
    }

    pub async fn get_where(
        &self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Token) -> bool + Send + Sync,
    ) -> Result<Option<Token>, ManagerError> {
        let mut stream = self.list_where(cancellation, predicate);
        Ok(stream.try_next().await?)
    }

    pub async fn count_where(
        &self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Token) -> bool + Send + Sync,
    ) -> Result<u64, ManagerError> {
        let mut stream = self.list_where(cancellation, predicate);
        let mut count = 0;
        while stream.try_next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub fn populate_descriptor(&self, entity: &Token) -> TokenDescriptor {
        TokenDescriptor::from_entity(entity)
    }

    pub fn validate(&self, entity: &Token) -> Vec<String> {
        let mut messages = Vec::new();

        if entity.application_id.is_empty() {
            messages.push("The application identifier is required.".to_string());
        }
        if let Some(expiration) = entity.expiration_date {
            if expiration < entity.creation_date {
                messages.push("The expiration date precedes the creation date.".to_string());
            }
        }

        messages
    }

    /// Atomically redeems a single-use credential. Exactly one concurrent
    /// caller wins; the rest observe `false`.
    pub async fn try_redeem(&self, entity: &mut Token) -> Result<bool, ManagerError> {
        let new_token = generate_concurrency_token();
        let redeemed = self
            .store
            .try_transition_status(
                &entity.id,
                TokenStatus::Valid,
                TokenStatus::Redeemed,
                &entity.concurrency_token,
                &new_token,
            )
            .await?;

        if redeemed {
            entity.status = TokenStatus::Redeemed;
            entity.concurrency_token = new_token;
            self.invalidate();
        }
        Ok(redeemed)
    }

    /// Marks the token revoked. Revocation is terminal and idempotent;
    /// contended writes are retried against the fresh entity.
    pub async fn revoke(&self, entity: &mut Token) -> Result<(), ManagerError> {
        for _ in 0..REVOKE_RETRIES {
            if entity.is_revoked() {
                return Ok(());
            }
            entity.status = TokenStatus::Revoked;
            match self.update(entity).await {
                Ok(()) => {
                    tracing::info!(token = %entity.id, "token revoked");
                    return Ok(());
                }
                Err(ManagerError::Concurrency) => {
                    match self.store.find_by_id(&entity.id).await? {
                        Some(fresh) => *entity = fresh,
                        None => return Ok(()),
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(ManagerError::Concurrency)
    }

    /// Revokes every token attached to an authorization.
    pub async fn revoke_by_authorization_id(
        &self,
        authorization_id: &str,
    ) -> Result<u64, ManagerError> {
        let affected = self.store.revoke_by_authorization_id(authorization_id).await?;
        if affected > 0 {
            self.invalidate();
            tracing::info!(authorization = %authorization_id, affected, "cascade revocation");
        }
        Ok(affected)
    }

    pub async fn prune(&self, retention: Duration) -> Result<u64, ManagerError> {
        let threshold = Utc::now() - retention;
        let removed = self.store.prune(threshold).await?;
        if removed > 0 {
            self.invalidate();
            tracing::info!(removed, "pruned tokens");
        }
        Ok(removed)
    }

    fn invalidate(&self) {
        self.by_id.clear();
        self.by_reference.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;

    fn manager() -> TokenManager {
        TokenManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ServerOptions::default()),
        )
    }

    fn descriptor(kind: TokenType) -> TokenDescriptor {
        TokenDescriptor {
            application_id: Some("app-1".to_string()),
            subject: Some("alice".to_string()),
            kind: Some(kind),
            status: Some(TokenStatus::Valid),
            expiration_date: Some(Utc::now() + Duration::seconds(300)),
            ..TokenDescriptor::default()
        }
    }

    #[tokio::test]
    async fn test_redeem_twice_first_wins() {
        let manager = manager();
        let created = manager
            .create(&descriptor(TokenType::AuthorizationCode))
            .await
            .unwrap();

        let mut first = created.clone();
        let mut second = created.clone();

        assert!(manager.try_redeem(&mut first).await.unwrap());
        assert!(!manager.try_redeem(&mut second).await.unwrap());
        assert!(first.is_redeemed());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_and_matches_status() {
        let manager = manager();
        let mut entity = manager.create(&descriptor(TokenType::Refresh)).await.unwrap();

        manager.revoke(&mut entity).await.unwrap();
        assert!(entity.is_revoked());
        assert_eq!(entity.status, TokenStatus::Revoked);

        // Second revocation is a no-op, not an error.
        manager.revoke(&mut entity).await.unwrap();
        assert!(entity.is_revoked());
    }

    #[tokio::test]
    async fn test_revoke_survives_concurrent_update() {
        let manager = manager();
        let created = manager.create(&descriptor(TokenType::Refresh)).await.unwrap();

        // Another writer bumps the concurrency token first.
        let mut other = created.clone();
        other.properties = Some(serde_json::json!({"touched": true}));
        manager.update(&mut other).await.unwrap();

        // Revoking from the stale snapshot reloads and succeeds.
        let mut stale = created.clone();
        manager.revoke(&mut stale).await.unwrap();
        assert!(stale.is_revoked());
    }

    #[tokio::test]
    async fn test_reference_lookup_is_byte_exact() {
        let manager = manager();
        let mut desc = descriptor(TokenType::Refresh);
        desc.reference_id = Some("RefDigest".to_string());
        manager.create(&desc).await.unwrap();

        assert!(manager.find_by_reference_id("RefDigest").await.unwrap().is_some());
        assert!(manager.find_by_reference_id("refdigest").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiration_before_creation_is_invalid() {
        let manager = manager();
        let mut desc = descriptor(TokenType::Access);
        desc.creation_date = Some(Utc::now());
        desc.expiration_date = Some(Utc::now() - Duration::seconds(60));

        let error = manager.create(&desc).await.unwrap_err();
        assert!(matches!(error, ManagerError::Validation { .. }));
    }
}
