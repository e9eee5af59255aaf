//! Protocol value types: parameters, messages, transactions, principals.

pub mod constants;
pub mod message;
pub mod parameter;
pub mod principal;
pub mod transaction;

pub use message::{Message, Request, Response};
pub use parameter::Parameter;
pub use principal::Principal;
pub use transaction::{EndpointType, Transaction};
