//! MySQL store for consent authorizations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::{Connection, MySqlPool};

use crate::error::StoreError;
use crate::models::{Authorization, AuthorizationStatus};
use crate::repositories::mysql::conditional_write_failure;
use crate::repositories::{AuthorizationStore, EntityStream};

/// Page size for prune scans.
const PRUNE_PAGE_SIZE: i64 = 1_000;

/// Consecutive page failures tolerated before a prune pass gives up.
const PRUNE_FAILURE_LIMIT: u32 = 3;

#[derive(Clone)]
pub struct MySqlAuthorizationStore {
    pool: MySqlPool,
}

impl MySqlAuthorizationStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorizationStore for MySqlAuthorizationStore {
    async fn create(&self, entity: &Authorization) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO authorizations
                (id, application_id, subject, status, kind, scopes, properties,
                 concurrency_token, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.application_id)
        .bind(&entity.subject)
        .bind(entity.status.as_str())
        .bind(entity.kind.as_str())
        .bind(serde_json::to_value(&entity.scopes).unwrap_or_default())
        .bind(&entity.properties)
        .bind(&entity.concurrency_token)
        .bind(entity.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(
        &self,
        entity: &Authorization,
        expected_token: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE authorizations
            SET application_id = ?, subject = ?, status = ?, kind = ?, scopes = ?,
                properties = ?, concurrency_token = ?
            WHERE id = ? AND concurrency_token = ?
            "#,
        )
        .bind(&entity.application_id)
        .bind(&entity.subject)
        .bind(entity.status.as_str())
        .bind(entity.kind.as_str())
        .bind(serde_json::to_value(&entity.scopes).unwrap_or_default())
        .bind(&entity.properties)
        .bind(&entity.concurrency_token)
        .bind(&entity.id)
        .bind(expected_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(conditional_write_failure(&self.pool, "authorizations", &entity.id).await);
        }
        Ok(())
    }

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError> {
        // The cascade to tokens must not observe concurrent token inserts,
        // so the whole delete runs serializable.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *conn)
            .await?;
        let mut tx = conn.begin().await?;

        sqlx::query("DELETE FROM tokens WHERE authorization_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM authorizations WHERE id = ? AND concurrency_token = ?")
            .bind(id)
            .bind(expected_token)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(conditional_write_failure(&self.pool, "authorizations", id).await);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Authorization>, StoreError> {
        let entity = sqlx::query_as::<_, Authorization>(
            r#"
            SELECT id, application_id, subject, status, kind, scopes, properties,
                   concurrency_token, created_at
            FROM authorizations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entity)
    }

    async fn find_by_subject_and_application(
        &self,
        subject: &str,
        application_id: &str,
        status: Option<AuthorizationStatus>,
    ) -> Result<Vec<Authorization>, StoreError> {
        let entities = match status {
            Some(status) => {
                sqlx::query_as::<_, Authorization>(
                    r#"
                    SELECT id, application_id, subject, status, kind, scopes, properties,
                           concurrency_token, created_at
                    FROM authorizations
                    WHERE subject = ? AND application_id = ? AND status = ?
                    "#,
                )
                .bind(subject)
                .bind(application_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Authorization>(
                    r#"
                    SELECT id, application_id, subject, status, kind, scopes, properties,
                           concurrency_token, created_at
                    FROM authorizations
                    WHERE subject = ? AND application_id = ?
                    "#,
                )
                .bind(subject)
                .bind(application_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(entities)
    }

    async fn find_by_application_id(
        &self,
        application_id: &str,
    ) -> Result<Vec<Authorization>, StoreError> {
        let entities = sqlx::query_as::<_, Authorization>(
            r#"
            SELECT id, application_id, subject, status, kind, scopes, properties,
                   concurrency_token, created_at
            FROM authorizations
            WHERE application_id = ?
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entities)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM authorizations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Authorization> {
        let limit = count.map(|c| c as i64).unwrap_or(i64::MAX);
        let offset = offset.unwrap_or(0) as i64;

        sqlx::query_as::<_, Authorization>(
            r#"
            SELECT id, application_id, subject, status, kind, scopes, properties,
                   concurrency_token, created_at
            FROM authorizations
            ORDER BY created_at
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch(&self.pool)
        .map(|row| row.map_err(StoreError::from))
        .boxed()
    }

    async fn prune(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        let mut failures = 0u32;

        loop {
            match self.prune_page(created_before).await {
                Ok(0) => break,
                Ok(n) => {
                    removed += n;
                    failures = 0;
                }
                Err(error) => {
                    // A lock conflict on one page must not abort the sweep.
                    failures += 1;
                    tracing::warn!(%error, failures, "authorization prune page failed");
                    if failures >= PRUNE_FAILURE_LIMIT {
                        break;
                    }
                }
            }
        }

        Ok(removed)
    }
}

impl MySqlAuthorizationStore {
    /// Deletes one page of prunable authorizations (and their tokens) inside
    /// a repeatable-read transaction. Returns the number deleted.
    async fn prune_page(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *conn)
            .await?;
        let mut tx = conn.begin().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT a.id
            FROM authorizations a
            WHERE a.created_at < ?
              AND (a.status <> 'valid'
                   OR (a.kind = 'ad_hoc' AND NOT EXISTS (
                         SELECT 1 FROM tokens t
                         WHERE t.authorization_id = a.id
                           AND t.status = 'valid'
                           AND (t.expiration_date IS NULL OR t.expiration_date > UTC_TIMESTAMP()))))
            LIMIT ?
            "#,
        )
        .bind(created_before)
        .bind(PRUNE_PAGE_SIZE)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        for id in &ids {
            sqlx::query("DELETE FROM tokens WHERE authorization_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM authorizations WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids.len() as u64)
    }
}
