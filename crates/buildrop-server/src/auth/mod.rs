//! Session authentication and release access checks.
//!
//! Sessions are HS256 bearer JWTs minted by the surrounding application.
//! Access to a release means membership in the organization owning its app.

pub mod access;
pub mod claims;
pub mod jwt;

pub use access::{AccessControl, AccessError};
pub use claims::Claims;
pub use jwt::JwtManager;
