//! Store contracts and their bundled implementations.
//!
//! The stores are the only components allowed to touch persistence. Managers
//! depend on these traits exclusively; the MySQL implementation is the
//! production default and the in-memory implementation backs tests and
//! storeless demos. List operations stream their results so callers can
//! apply post-filters and observe cancellation between items.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::models::{Application, Authorization, AuthorizationStatus, Scope, Token, TokenStatus};

/// Streaming list result.
pub type EntityStream<'a, T> = BoxStream<'a, Result<T, StoreError>>;

/// Threads a predicate through a store stream, checking the cancellation
/// token before every yielded entity. A cancelled stream ends quietly; the
/// dispatcher surfaces the cancellation itself.
pub fn filter_entities<'a, T: Send + 'a>(
    stream: EntityStream<'a, T>,
    cancellation: CancellationToken,
    predicate: impl Fn(&T) -> bool + Send + Sync + 'a,
) -> EntityStream<'a, T> {
    stream
        .take_while(move |_| {
            let cancelled = cancellation.is_cancelled();
            async move { !cancelled }
        })
        .try_filter(move |entity| futures::future::ready(predicate(entity)))
        .boxed()
}

/// Store for registered client applications.
///
/// Writes are atomic per entity. `update` and `delete` are conditional on the
/// entity's previous concurrency token and fail with
/// [`StoreError::Concurrency`] when it no longer matches.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn create(&self, entity: &Application) -> Result<(), StoreError>;

    async fn update(&self, entity: &Application, expected_token: &str) -> Result<(), StoreError>;

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Application>, StoreError>;

    /// Backend lookup by client identifier. A case-insensitive backend may
    /// return near-matches; the manager post-filters them.
    async fn find_by_client_id(&self, client_id: &str) -> Result<Vec<Application>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Application>;
}

/// Store for consent authorizations.
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    async fn create(&self, entity: &Authorization) -> Result<(), StoreError>;

    async fn update(&self, entity: &Authorization, expected_token: &str)
        -> Result<(), StoreError>;

    /// Deletes the authorization and cascades to its tokens. Engines that
    /// support it run the cascade under a serializable transaction; others
    /// proceed non-atomically.
    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Authorization>, StoreError>;

    /// Candidate authorizations for a (subject, application) pair, optionally
    /// narrowed by status. Case-insensitive backends may over-match.
    async fn find_by_subject_and_application(
        &self,
        subject: &str,
        application_id: &str,
        status: Option<AuthorizationStatus>,
    ) -> Result<Vec<Authorization>, StoreError>;

    async fn find_by_application_id(
        &self,
        application_id: &str,
    ) -> Result<Vec<Authorization>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Authorization>;

    /// Removes invalid authorizations and ad-hoc authorizations whose tokens
    /// are all invalid or expired, scanning in pages; returns the number
    /// removed. Page failures are skipped, not fatal.
    async fn prune(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Store for issued tokens and codes.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create(&self, entity: &Token) -> Result<(), StoreError>;

    async fn update(&self, entity: &Token, expected_token: &str) -> Result<(), StoreError>;

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Token>, StoreError>;

    async fn find_by_reference_id(&self, reference_id: &str) -> Result<Vec<Token>, StoreError>;

    async fn find_by_authorization_id(
        &self,
        authorization_id: &str,
    ) -> Result<Vec<Token>, StoreError>;

    async fn find_by_subject_and_application(
        &self,
        subject: &str,
        application_id: &str,
    ) -> Result<Vec<Token>, StoreError>;

    /// Marks every token attached to the authorization as revoked; returns
    /// the number affected.
    async fn revoke_by_authorization_id(&self, authorization_id: &str)
        -> Result<u64, StoreError>;

    /// Conditionally transitions a token's status, guarded by the prior
    /// status and concurrency token. Returns false when another writer won
    /// the race (the basis of single-use code redemption).
    async fn try_transition_status(
        &self,
        id: &str,
        from: TokenStatus,
        to: TokenStatus,
        expected_token: &str,
        new_concurrency_token: &str,
    ) -> Result<bool, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Token>;

    async fn prune(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Store for registered scopes.
#[async_trait]
pub trait ScopeStore: Send + Sync {
    async fn create(&self, entity: &Scope) -> Result<(), StoreError>;

    async fn update(&self, entity: &Scope, expected_token: &str) -> Result<(), StoreError>;

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Scope>, StoreError>;

    async fn find_by_name(&self, name: &str) -> Result<Vec<Scope>, StoreError>;

    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Scope>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Scope>;
}
