//! Token error types.

/// Errors from minting or verifying install tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Any verification failure: malformed, bad signature, wrong release or
    /// expired. Callers must not be able to tell these apart.
    #[error("Invalid or expired token")]
    Invalid,

    #[error("No signing secret configured: set OTA_TOKEN_SECRET or APP_SECRET")]
    MissingSecret,

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}
