//! Request authentication: the ordered session-loader chain and its
//! credential sources (bearer JWT, htpasswd Basic, stored session).

pub mod basic;
pub mod bearer;
pub mod chain;

pub use basic::{BasicLoader, Htpasswd};
pub use bearer::BearerLoader;
pub use chain::{Chain, ChainError, Scope, SessionLoader, StoredLoader};
