//! MySQL-backed stores.
//!
//! String-set and properties attributes are persisted as JSON columns and
//! parsed once per load. Conditional writes guard on the stored concurrency
//! token; zero affected rows is disambiguated into `NotFound` vs
//! `Concurrency` with a follow-up existence probe.

mod application;
mod authorization;
mod scope;
mod token;

pub use application::MySqlApplicationStore;
pub use authorization::MySqlAuthorizationStore;
pub use scope::MySqlScopeStore;
pub use token::MySqlTokenStore;

use sqlx::MySqlPool;

use crate::error::StoreError;

/// Distinguishes why a conditional write affected zero rows.
pub(crate) async fn conditional_write_failure(
    pool: &MySqlPool,
    table: &str,
    id: &str,
) -> StoreError {
    let query = format!("SELECT COUNT(*) FROM {table} WHERE id = ?");
    match sqlx::query_scalar::<_, i64>(&query).bind(id).fetch_one(pool).await {
        Ok(0) => StoreError::NotFound,
        Ok(_) => StoreError::Concurrency,
        Err(error) => StoreError::Backend(error),
    }
}
