//! MySQL store for client applications.

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::MySqlPool;

use crate::error::StoreError;
use crate::models::Application;
use crate::repositories::mysql::conditional_write_failure;
use crate::repositories::{ApplicationStore, EntityStream};

#[derive(Clone)]
pub struct MySqlApplicationStore {
    pool: MySqlPool,
}

impl MySqlApplicationStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationStore for MySqlApplicationStore {
    async fn create(&self, entity: &Application) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO applications
                (id, client_id, client_secret_hash, client_type, consent_type, display_name,
                 redirect_uris, post_logout_redirect_uris, permissions, concurrency_token, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.client_id)
        .bind(&entity.client_secret_hash)
        .bind(entity.client_type.as_str())
        .bind(entity.consent_type.as_str())
        .bind(&entity.display_name)
        .bind(serde_json::to_value(&entity.redirect_uris).unwrap_or_default())
        .bind(serde_json::to_value(&entity.post_logout_redirect_uris).unwrap_or_default())
        .bind(serde_json::to_value(&entity.permissions).unwrap_or_default())
        .bind(&entity.concurrency_token)
        .bind(entity.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, entity: &Application, expected_token: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET client_id = ?, client_secret_hash = ?, client_type = ?, consent_type = ?,
                display_name = ?, redirect_uris = ?, post_logout_redirect_uris = ?,
                permissions = ?, concurrency_token = ?
            WHERE id = ? AND concurrency_token = ?
            "#,
        )
        .bind(&entity.client_id)
        .bind(&entity.client_secret_hash)
        .bind(entity.client_type.as_str())
        .bind(entity.consent_type.as_str())
        .bind(&entity.display_name)
        .bind(serde_json::to_value(&entity.redirect_uris).unwrap_or_default())
        .bind(serde_json::to_value(&entity.post_logout_redirect_uris).unwrap_or_default())
        .bind(serde_json::to_value(&entity.permissions).unwrap_or_default())
        .bind(&entity.concurrency_token)
        .bind(&entity.id)
        .bind(expected_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(conditional_write_failure(&self.pool, "applications", &entity.id).await);
        }
        Ok(())
    }

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM applications WHERE id = ? AND concurrency_token = ?")
            .bind(id)
            .bind(expected_token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(conditional_write_failure(&self.pool, "applications", id).await);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Application>, StoreError> {
        let entity = sqlx::query_as::<_, Application>(
            r#"
            SELECT id, client_id, client_secret_hash, client_type, consent_type, display_name,
                   redirect_uris, post_logout_redirect_uris, permissions, concurrency_token, created_at
            FROM applications
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entity)
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Vec<Application>, StoreError> {
        let entities = sqlx::query_as::<_, Application>(
            r#"
            SELECT id, client_id, client_secret_hash, client_type, consent_type, display_name,
                   redirect_uris, post_logout_redirect_uris, permissions, concurrency_token, created_at
            FROM applications
            WHERE client_id = ?
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entities)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM applications")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Application> {
        let limit = count.map(|c| c as i64).unwrap_or(i64::MAX);
        let offset = offset.unwrap_or(0) as i64;

        sqlx::query_as::<_, Application>(
            r#"
            SELECT id, client_id, client_secret_hash, client_type, consent_type, display_name,
                   redirect_uris, post_logout_redirect_uris, permissions, concurrency_token, created_at
            FROM applications
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
}
