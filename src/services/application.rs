//! Application manager: registration, lookup and credential checks for
//! OAuth clients.

use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::config::ServerOptions;
use crate::dto::descriptors::ApplicationDescriptor;
use crate::error::{ManagerError, StoreError};
use crate::models::{Application, ClientType, ConsentType};
use crate::repositories::{filter_entities, ApplicationStore};
use crate::utils::cache::EntityCache;
use crate::utils::secret::{generate_concurrency_token, hash_client_secret, verify_client_secret};

#[derive(Clone)]
pub struct ApplicationManager {
    store: Arc<dyn ApplicationStore>,
    cache: EntityCache<Option<Application>>,
    options: Arc<ServerOptions>,
}

impl ApplicationManager {
    pub fn new(store: Arc<dyn ApplicationStore>, options: Arc<ServerOptions>) -> Self {
        Self {
            store,
            cache: EntityCache::new(options.entity_cache_window()),
            options,
        }
    }

    /// Creates and persists an application from a descriptor. The plain-text
    /// secret, if any, is bcrypt-hashed before it reaches the store.
    pub async fn create(
        &self,
        descriptor: &ApplicationDescriptor,
    ) -> Result<Application, ManagerError> {
        let mut entity = Application {
            id: Uuid::new_v4().to_string(),
            client_id: String::new(),
            client_secret_hash: None,
            client_type: ClientType::Public,
            consent_type: ConsentType::Explicit,
            display_name: None,
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            permissions: Vec::new(),
            concurrency_token: generate_concurrency_token(),
            created_at: Utc::now(),
        };
        descriptor.apply_to(&mut entity);

        if let Some(secret) = descriptor.client_secret.as_deref() {
            let hash = hash_client_secret(secret)
                .map_err(|e| ManagerError::validation(vec![e.to_string()]))?;
            entity.client_secret_hash = Some(hash);
        }

        let messages = self.validate(&entity);
        if !messages.is_empty() {
            return Err(ManagerError::validation(messages));
        }

        self.store.create(&entity).await?;
        self.invalidate();
        tracing::info!(client_id = %entity.client_id, "application registered");
        Ok(entity)
    }

    /// Persists changes to an existing entity, rotating its concurrency
    /// token. The entity passed in must carry the token from its last read.
    pub async fn update(&self, entity: &mut Application) -> Result<(), ManagerError> {
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

    /// Applies a descriptor to the entity and persists it.
    pub async fn update_from_descriptor(
        &self,
        entity: &mut Application,
        descriptor: &ApplicationDescriptor,
    ) -> Result<(), ManagerError> {
        descriptor.apply_to(entity);
        if let Some(secret) = descriptor.client_secret.as_deref() {
            let hash = hash_client_secret(secret)
                .map_err(|e| ManagerError::validation(vec![e.to_string()]))?;
            entity.client_secret_hash = Some(hash);
        }
        self.update(entity).await
    }

    pub async fn delete(&self, entity: &Application) -> Result<(), ManagerError> {
        match self.store.delete(&entity.id, &entity.concurrency_token).await {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(StoreError::Concurrency) => Err(ManagerError::Concurrency),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Application>, ManagerError> {
        let key = format!("id:{id}");
        if let Some(cached) = self.cached(&key) {
            return Ok(cached);
        }

        let found = self
            .store
            .find_by_id(id)
            .await?
            // The store may be case-insensitive; the identifier is not.
            .filter(|entity| self.options.disable_additional_filtering || entity.id == id);

        self.remember(key, found.clone());
        Ok(found)
    }

    /// Resolves a client by its public identifier, byte-for-byte.
    pub async fn find_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<Application>, ManagerError> {
        let key = format!("client_id:{client_id}");
        if let Some(cached) = self.cached(&key) {
            return Ok(cached);
        }

        let candidates = self.store.find_by_client_id(client_id).await?;
        let found = if self.options.disable_additional_filtering {
            candidates.into_iter().next()
        } else {
            candidates
                .into_iter()
                .find(|entity| entity.client_id == client_id)
        };

        self.remember(key, found.clone());
        Ok(found)
    }

    pub async fn count(&self) -> Result<u64, ManagerError> {
        Ok(self.store.count().await?)
    }

    pub fn list(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
    ) -> crate::repositories::EntityStream<'_, Application> {
        self.store.list(count, offset)
    }

    /// Streams the applications matching a predicate, observing the
    /// cancellation token between entities.
    pub fn list_where<'a>(
        &'a self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Application) -> bool + Send + Sync + 'a,
    ) -> crate::repositories::EntityStream<'a, Application> {
        filter_entities(self.store.list(None, None), cancellation.clone(), predicate)
    }

    pub async fn get_where(
        &self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Application) -> bool + Send + Sync,
    ) -> Result<Option<Application>, ManagerError> {
        let mut stream = self.list_where(cancellation, predicate);
        Ok(stream.try_next().await?)
    }

    pub async fn count_where(
        &self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Application) -> bool + Send + Sync,
    ) -> Result<u64, ManagerError> {
        let mut stream = self.list_where(cancellation, predicate);
        let mut count = 0;
        while stream.try_next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Snapshot of the entity's observable attributes.
    pub fn populate_descriptor(&self, entity: &Application) -> ApplicationDescriptor {
        ApplicationDescriptor::from_entity(entity)
    }

    /// Validation messages for the entity; empty means valid.
    pub fn validate(&self, entity: &Application) -> Vec<String> {
        let mut messages = Vec::new();

        if entity.client_id.is_empty() {
            messages.push("The client identifier is required.".to_string());
        }
        match entity.client_type {
            ClientType::Confidential if entity.client_secret_hash.is_none() => {
                messages.push("A confidential client requires a secret.".to_string());
            }
            ClientType::Public if entity.client_secret_hash.is_some() => {
                messages.push("A public client cannot have a secret.".to_string());
            }
            _ => {}
        }
        for uri in entity
            .redirect_uris
            .iter()
            .chain(&entity.post_logout_redirect_uris)
        {
            match Url::parse(uri) {
                Ok(parsed) if parsed.fragment().is_none() => {}
                Ok(_) => messages.push(format!("The redirect URI '{uri}' has a fragment.")),
                Err(_) => messages.push(format!("The redirect URI '{uri}' is not absolute.")),
            }
        }

        messages
    }

    /// Constant-time verification of a presented client secret.
    pub fn validate_client_secret(&self, entity: &Application, secret: &str) -> bool {
        match entity.client_secret_hash.as_deref() {
            Some(hash) => verify_client_secret(secret, hash),
            None => false,
        }
    }

    /// Exact-match redirect URI check.
    pub fn validate_redirect_uri(&self, entity: &Application, uri: &str) -> bool {
        entity.has_redirect_uri(uri)
    }

    fn cached(&self, key: &str) -> Option<Option<Application>> {
        if self.options.disable_entity_caching {
            return None;
        }
        self.cache.get(key)
    }

    fn remember(&self, key: String, value: Option<Application>) {
        if !self.options.disable_entity_caching {
            self.cache.insert(key, value);
        }
    }

    /// Writes invalidate every finder key: the cache window is short and a
    /// full clear is the only way to catch keys derived from prior attribute
    /// values.
    fn invalidate(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;

    fn manager() -> ApplicationManager {
        ApplicationManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ServerOptions::default()),
        )
    }

    fn descriptor(client_id: &str) -> ApplicationDescriptor {
        ApplicationDescriptor {
            client_id: Some(client_id.to_string()),
            client_type: Some(ClientType::Public),
            consent_type: Some(ConsentType::Explicit),
            redirect_uris: vec!["https://app/cb".to_string()],
            ..ApplicationDescriptor::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_find_by_client_id() {
        let manager = manager();
        manager.create(&descriptor("c1")).await.unwrap();

        let found = manager.find_by_client_id("c1").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_client_id_lookup_is_case_sensitive() {
        let manager = manager();
        manager.create(&descriptor("Client")).await.unwrap();

        // The memory store over-matches case-insensitively; the manager's
        // post-filter must reject the near-miss.
        assert!(manager.find_by_client_id("client").await.unwrap().is_none());
        assert!(manager.find_by_client_id("Client").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_post_filter_can_be_disabled() {
        let options = Arc::new(ServerOptions {
            disable_additional_filtering: true,
            ..ServerOptions::default()
        });
        let manager = ApplicationManager::new(Arc::new(MemoryStore::new()), options);
        manager.create(&descriptor("Client")).await.unwrap();

        assert!(manager.find_by_client_id("client").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_confidential_client_requires_secret() {
        let manager = manager();
        let mut bad = descriptor("c1");
        bad.client_type = Some(ClientType::Confidential);

        let error = manager.create(&bad).await.unwrap_err();
        assert!(matches!(error, ManagerError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_secret_is_hashed_and_verifiable() {
        let manager = manager();
        let mut desc = descriptor("c1");
        desc.client_type = Some(ClientType::Confidential);
        desc.client_secret = Some("s3cret".to_string());

        let entity = manager.create(&desc).await.unwrap();
        assert_ne!(entity.client_secret_hash.as_deref(), Some("s3cret"));
        assert!(manager.validate_client_secret(&entity, "s3cret"));
        assert!(!manager.validate_client_secret(&entity, "wrong"));
    }

    #[tokio::test]
    async fn test_redirect_uri_with_fragment_is_rejected() {
        let manager = manager();
        let mut bad = descriptor("c1");
        bad.redirect_uris = vec!["https://app/cb#fragment".to_string()];

        let error = manager.create(&bad).await.unwrap_err();
        assert!(matches!(error, ManagerError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_rotates_concurrency_token_and_detects_conflicts() {
        let manager = manager();
        let created = manager.create(&descriptor("c1")).await.unwrap();

        let mut first = created.clone();
        first.display_name = Some("First".to_string());
        manager.update(&mut first).await.unwrap();
        assert_ne!(first.concurrency_token, created.concurrency_token);

        // A writer still holding the original snapshot loses.
        let mut second = created.clone();
        second.display_name = Some("Second".to_string());
        let error = manager.update(&mut second).await.unwrap_err();
        assert!(matches!(error, ManagerError::Concurrency));
    }

    #[tokio::test]
    async fn test_list_where_threads_the_predicate() {
        let manager = manager();
        manager.create(&descriptor("c1")).await.unwrap();
        manager.create(&descriptor("c2")).await.unwrap();
        manager.create(&descriptor("other")).await.unwrap();

        let cancellation = CancellationToken::new();
        let count = manager
            .count_where(&cancellation, |app| app.client_id.starts_with('c'))
            .await
            .unwrap();
        assert_eq!(count, 2);

        let found = manager
            .get_where(&cancellation, |app| app.client_id == "other")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_list_where_stops_on_cancellation() {
        let manager = manager();
        manager.create(&descriptor("c1")).await.unwrap();

        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let count = manager.count_where(&cancellation, |_| true).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_cache_sees_writes_immediately() {
        let manager = manager();
        let created = manager.create(&descriptor("c1")).await.unwrap();

        // Prime the cache.
        manager.find_by_client_id("c1").await.unwrap();

        let mut updated = created.clone();
        updated.display_name = Some("Renamed".to_string());
        manager.update(&mut updated).await.unwrap();

        let found = manager.find_by_client_id("c1").await.unwrap().unwrap();
        assert_eq!(found.display_name.as_deref(), Some("Renamed"));
    }
}
