//! MySQL store for issued tokens and codes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::MySqlPool;

use crate::error::StoreError;
use crate::models::{Token, TokenStatus};
use crate::repositories::mysql::conditional_write_failure;
use crate::repositories::{EntityStream, TokenStore};

const PRUNE_PAGE_SIZE: i64 = 1_000;

#[derive(Clone)]
pub struct MySqlTokenStore {
    pool: MySqlPool,
}

impl MySqlTokenStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for MySqlTokenStore {
    async fn create(&self, entity: &Token) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tokens
                (id, reference_id, application_id, authorization_id, subject, kind, status,
                 creation_date, expiration_date, payload, properties, concurrency_token)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.reference_id)
        .bind(&entity.application_id)
        .bind(&entity.authorization_id)
        .bind(&entity.subject)
        .bind(entity.kind.as_str())
        .bind(entity.status.as_str())
        .bind(entity.creation_date)
        .bind(entity.expiration_date)
        .bind(&entity.payload)
        .bind(&entity.properties)
        .bind(&entity.concurrency_token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, entity: &Token, expected_token: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET reference_id = ?, application_id = ?, authorization_id = ?, subject = ?,
                kind = ?, status = ?, creation_date = ?, expiration_date = ?, payload = ?,
                properties = ?, concurrency_token = ?
            WHERE id = ? AND concurrency_token = ?
            "#,
        )
        .bind(&entity.reference_id)
        .bind(&entity.application_id)
        .bind(&entity.authorization_id)
        .bind(&entity.subject)
        .bind(entity.kind.as_str())
        .bind(entity.status.as_str())
        .bind(entity.creation_date)
        .bind(entity.expiration_date)
        .bind(&entity.payload)
        .bind(&entity.properties)
        .bind(&entity.concurrency_token)
        .bind(&entity.id)
        .bind(expected_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(conditional_write_failure(&self.pool, "tokens", &entity.id).await);
        }
        Ok(())
    }

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = ? AND concurrency_token = ?")
            .bind(id)
            .bind(expected_token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(conditional_write_failure(&self.pool, "tokens", id).await);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Token>, StoreError> {
        let entity = sqlx::query_as::<_, Token>(
            r#"
            SELECT id, reference_id, application_id, authorization_id, subject, kind, status,
                   creation_date, expiration_date, payload, properties, concurrency_token
            FROM tokens
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entity)
    }

    async fn find_by_reference_id(&self, reference_id: &str) -> Result<Vec<Token>, StoreError> {
        let entities = sqlx::query_as::<_, Token>(
            r#"
            SELECT id, reference_id, application_id, authorization_id, subject, kind, status,
                   creation_date, expiration_date, payload, properties, concurrency_token
            FROM tokens
            WHERE reference_id = ?
            "#,
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entities)
    }

    async fn find_by_authorization_id(
        &self,
        authorization_id: &str,
    ) -> Result<Vec<Token>, StoreError> {
        let entities = sqlx::query_as::<_, Token>(
            r#"
            SELECT id, reference_id, application_id, authorization_id, subject, kind, status,
                   creation_date, expiration_date, payload, properties, concurrency_token
            FROM tokens
            WHERE authorization_id = ?
            "#,
        )
        .bind(authorization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entities)
    }

    async fn find_by_subject_and_application(
        &self,
        subject: &str,
        application_id: &str,
    ) -> Result<Vec<Token>, StoreError> {
        let entities = sqlx::query_as::<_, Token>(
            r#"
            SELECT id, reference_id, application_id, authorization_id, subject, kind, status,
                   creation_date, expiration_date, payload, properties, concurrency_token
            FROM tokens
            WHERE subject = ? AND application_id = ?
            "#,
        )
        .bind(subject)
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entities)
    }

    async fn revoke_by_authorization_id(
        &self,
        authorization_id: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET status = 'revoked'
            WHERE authorization_id = ? AND status <> 'revoked'
            "#,
        )
        .bind(authorization_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn try_transition_status(
        &self,
        id: &str,
        from: TokenStatus,
        to: TokenStatus,
        expected_token: &str,
        new_concurrency_token: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET status = ?, concurrency_token = ?
            WHERE id = ? AND status = ? AND concurrency_token = ?
            "#,
        )
        .bind(to.as_str())
        .bind(new_concurrency_token)
        .bind(id)
        .bind(from.as_str())
        .bind(expected_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tokens")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Token> {
        let limit = count.map(|c| c as i64).unwrap_or(i64::MAX);
        let offset = offset.unwrap_or(0) as i64;

        sqlx::query_as::<_, Token>(
            r#"
            SELECT id, reference_id, application_id, authorization_id, subject, kind, status,
                   creation_date, expiration_date, payload, properties, concurrency_token
            FROM tokens
            ORDER BY creation_date
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

        loop {
            let result = sqlx::query(
                r#"
                DELETE FROM tokens
                WHERE creation_date < ?
                  AND (status <> 'valid'
                       OR (expiration_date IS NOT NULL AND expiration_date < UTC_TIMESTAMP()))
                LIMIT ?
                "#,
            )
            .bind(created_before)
            .bind(PRUNE_PAGE_SIZE)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                break;
            }
            removed += result.rows_affected();
        }

        Ok(removed)
    }
}
