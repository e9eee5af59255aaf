//! MySQL store for registered scopes.

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::MySqlPool;

use crate::error::StoreError;
use crate::models::Scope;
use crate::repositories::mysql::conditional_write_failure;
use crate::repositories::{EntityStream, ScopeStore};

#[derive(Clone)]
pub struct MySqlScopeStore {
    pool: MySqlPool,
}

impl MySqlScopeStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScopeStore for MySqlScopeStore {
    async fn create(&self, entity: &Scope) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scopes
                (id, name, display_name, description, resources, concurrency_token, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.display_name)
        .bind(&entity.description)
        .bind(serde_json::to_value(&entity.resources).unwrap_or_default())
        .bind(&entity.concurrency_token)
        .bind(entity.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, entity: &Scope, expected_token: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scopes
            SET name = ?, display_name = ?, description = ?, resources = ?, concurrency_token = ?
            WHERE id = ? AND concurrency_token = ?
            "#,
        )
        .bind(&entity.name)
        .bind(&entity.display_name)
        .bind(&entity.description)
        .bind(serde_json::to_value(&entity.resources).unwrap_or_default())
        .bind(&entity.concurrency_token)
        .bind(&entity.id)
        .bind(expected_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(conditional_write_failure(&self.pool, "scopes", &entity.id).await);
        }
        Ok(())
    }

    async fn delete(&self, id: &str, expected_token: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM scopes WHERE id = ? AND concurrency_token = ?")
            .bind(id)
            .bind(expected_token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(conditional_write_failure(&self.pool, "scopes", id).await);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Scope>, StoreError> {
        let entity = sqlx::query_as::<_, Scope>(
            r#"
            SELECT id, name, display_name, description, resources, concurrency_token, created_at
            FROM scopes
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entity)
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Scope>, StoreError> {
        let entities = sqlx::query_as::<_, Scope>(
            r#"
            SELECT id, name, display_name, description, resources, concurrency_token, created_at
            FROM scopes
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(entities)
    }

    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Scope>, StoreError> {
        // Bounded fan-out keeps the query free of dynamic IN-list SQL; scope
        // sets on a request are small.
        let mut entities = Vec::new();
        for name in names {
            entities.extend(self.find_by_name(name).await?);
        }
        Ok(entities)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scopes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<'_, Scope> {
        let limit = count.map(|c| c as i64).unwrap_or(i64::MAX);
        let offset = offset.unwrap_or(0) as i64;

        sqlx::query_as::<_, Scope>(
            r#"
            SELECT id, name, display_name, description, resources, concurrency_token, created_at
            FROM scopes
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
