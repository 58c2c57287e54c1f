//! `buildrop` install-token library
//!
//! Mints and verifies the short-lived links a device uses to fetch an
//! installer manifest and the build behind it.
//!
//! ## Token format
//!
//! `base64url(json payload) "." base64url(HMAC-SHA256(secret, encoded payload))`
//!
//! The payload is `{"releaseId", "subjectId", "exp"}`. A token is bound to
//! exactly one release and expires at `exp` (unix seconds). Verification
//! failures are deliberately indistinguishable from one another.

pub mod error;
pub mod secret;
pub mod token;

pub use error::TokenError;
pub use secret::{SecretSource, resolve_secret};
pub use token::{MintedToken, OtaTokenCodec, PUBLIC_INSTALL_SUBJECT, clamp_ttl};
