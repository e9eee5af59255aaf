//! Scope manager: the registry of requestable permissions.

use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServerOptions;
use crate::dto::descriptors::ScopeDescriptor;
use crate::error::{ManagerError, StoreError};
use crate::models::Scope;
use crate::repositories::{filter_entities, ScopeStore};
use crate::utils::cache::EntityCache;
use crate::utils::secret::generate_concurrency_token;

#[derive(Clone)]
pub struct ScopeManager {
    store: Arc<dyn ScopeStore>,
    by_name: EntityCache<Option<Scope>>,
    options: Arc<ServerOptions>,
}

impl ScopeManager {
    pub fn new(store: Arc<dyn ScopeStore>, options: Arc<ServerOptions>) -> Self {
        Self {
            store,
            by_name: EntityCache::new(options.entity_cache_window()),
            options,
        }
    }

    pub async fn create(&self, descriptor: &ScopeDescriptor) -> Result<Scope, ManagerError> {
        let mut entity = Scope {
            id: Uuid::new_v4().to_string(),
            name: String::new(),
            display_name: None,
            description: None,
            resources: Vec::new(),
            concurrency_token: generate_concurrency_token(),
            created_at: Utc::now(),
        };
        descriptor.apply_to(&mut entity);

        let messages = self.validate(&entity);
        if !messages.is_empty() {
            return Err(ManagerError::validation(messages));
        }

        self.store.create(&entity).await?;
        self.invalidate();
        tracing::debug!(scope = %entity.name, "scope registered");
        Ok(entity)
    }

    pub async fn update(&self, entity: &mut Scope) -> Result<(), ManagerError> {
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

    pub async fn delete(&self, entity: &Scope) -> Result<(), ManagerError> {
        match self.store.delete(&entity.id, &entity.concurrency_token).await {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(StoreError::Concurrency) => Err(ManagerError::Concurrency),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Scope>, ManagerError> {
        let found = self
            .store
            .find_by_id(id)
            .await?
            .filter(|entity| self.options.disable_additional_filtering || entity.id == id);
        Ok(found)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Scope>, ManagerError> {
        let key = format!("name:{name}");
        if !self.options.disable_entity_caching {
            if let Some(cached) = self.by_name.get(&key) {
                return Ok(cached);
            }
        }

        let candidates = self.store.find_by_name(name).await?;
        let found = if self.options.disable_additional_filtering {
            candidates.into_iter().next()
        } else {
            candidates.into_iter().find(|entity| entity.name == name)
        };

        if !self.options.disable_entity_caching {
            self.by_name.insert(key, found.clone());
        }
        Ok(found)
    }

    /// Resolves a set of names to registered scopes, dropping near-matches
    /// from case-insensitive backends.
    pub async fn find_by_names(&self, names: &[String]) -> Result<Vec<Scope>, ManagerError> {
        let candidates = self.store.find_by_names(names).await?;
        Ok(candidates
            .into_iter()
            .filter(|entity| {
                self.options.disable_additional_filtering
                    || names.iter().any(|n| *n == entity.name)
            })
            .collect())
    }

    /// Whether every requested scope is registered, byte-exact.
    pub async fn all_registered(&self, names: &[String]) -> Result<bool, ManagerError> {
        if names.is_empty() {
            return Ok(true);
        }
        let found = self.find_by_names(names).await?;
        Ok(names
            .iter()
            .all(|name| found.iter().any(|scope| scope.name == *name)))
    }

    /// Union of the resources of the given scopes, preserving first-seen
    /// order. These become the audiences of issued tokens.
    pub async fn resources_for(&self, names: &[String]) -> Result<Vec<String>, ManagerError> {
        let found = self.find_by_names(names).await?;
        let mut resources = Vec::new();
        for scope in found {
            for resource in scope.resources {
                if !resources.contains(&resource) {
                    resources.push(resource);
                }
            }
        }
        Ok(resources)
    }

    pub async fn count(&self) -> Result<u64, ManagerError> {
        Ok(self.store.count().await?)
    }

    pub fn list(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
    ) -> crate::repositories::EntityStream<'_, Scope> {
        self.store.list(count, offset)
    }

    pub fn list_where<'a>(
        &'a self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Scope) -> bool + Send + Sync + 'a,
    ) -> crate::repositories::EntityStream<'a, Scope> {
        filter_entities(self.store.list(None, None), cancellation.clone(), predicate)
    }

    pub async fn get_where(
        &self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Scope) -> bool + Send + Sync,
    ) -> Result<Option<Scope>, ManagerError> {
        let mut stream = self.list_where(cancellation, predicate);
        Ok(stream.try_next().await?)
    }

    pub async fn count_where(
        &self,
        cancellation: &CancellationToken,
        predicate: impl Fn(&Scope) -> bool + Send + Sync,
    ) -> Result<u64, ManagerError> {
        let mut stream = self.list_where(cancellation, predicate);
        let mut count = 0;
        while stream.try_next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub fn populate_descriptor(&self, entity: &Scope) -> ScopeDescriptor {
        ScopeDescriptor::from_entity(entity)
    }

    pub fn validate(&self, entity: &Scope) -> Vec<String> {
        let mut messages = Vec::new();
        if entity.name.is_empty() {
            messages.push("The scope name is required.".to_string());
        } else if entity.name.contains(' ') {
            messages.push("The scope name cannot contain a space.".to_string());
        }
        messages
    }

    fn invalidate(&self) {
        self.by_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;

    fn manager() -> ScopeManager {
        ScopeManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ServerOptions::default()),
        )
    }

    fn descriptor(name: &str, resources: &[&str]) -> ScopeDescriptor {
        ScopeDescriptor {
            name: Some(name.to_string()),
            display_name: None,
            description: None,
            resources: resources.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_scope_name_with_space_is_rejected() {
        let manager = manager();
        let error = manager.create(&descriptor("open id", &[])).await.unwrap_err();
        assert!(matches!(error, ManagerError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_all_registered_is_byte_exact() {
        let manager = manager();
        manager.create(&descriptor("openid", &[])).await.unwrap();
        manager.create(&descriptor("profile", &[])).await.unwrap();

        let ok = vec!["openid".to_string(), "profile".to_string()];
        assert!(manager.all_registered(&ok).await.unwrap());

        let near_miss = vec!["OpenID".to_string()];
        assert!(!manager.all_registered(&near_miss).await.unwrap());

        let missing = vec!["openid".to_string(), "bogus".to_string()];
        assert!(!manager.all_registered(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_resources_union_preserves_order() {
        let manager = manager();
        manager
            .create(&descriptor("read", &["https://api", "https://files"]))
            .await
            .unwrap();
        manager
            .create(&descriptor("write", &["https://api"]))
            .await
            .unwrap();

        let resources = manager
            .resources_for(&["read".to_string(), "write".to_string()])
            .await
            .unwrap();
        assert_eq!(resources, vec!["https://api", "https://files"]);
    }
}
