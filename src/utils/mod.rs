pub mod cache;
pub mod pkce;
pub mod secret;
