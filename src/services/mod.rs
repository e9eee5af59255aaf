//! Entity managers: cache-aware CRUD over the abstract stores.

pub mod application;
pub mod authorization;
pub mod scope;
pub mod token;

pub use application::ApplicationManager;
pub use authorization::AuthorizationManager;
pub use scope::ScopeManager;
pub use token::TokenManager;
