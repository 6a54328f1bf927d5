//! Authentication module
//!
//! Bearer JWT verification feeding the per-request caller context.

mod jwt;
mod middleware;

#[cfg(test)]
pub(crate) use jwt::create_token;
pub use jwt::decode_token;
pub use middleware::{auth_middleware, require_admin};
