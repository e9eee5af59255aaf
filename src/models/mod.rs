//! Persistent entities: applications, authorizations, tokens, scopes.

pub mod application;
pub mod authorization;
pub mod scope;
pub mod token;

pub use application::{permissions, Application, ClientType, ConsentType};
pub use authorization::{Authorization, AuthorizationStatus, AuthorizationType};
pub use scope::Scope;
pub use token::{Token, TokenStatus, TokenType};
