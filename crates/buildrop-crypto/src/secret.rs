//! Signing secret selection.

use crate::error::TokenError;

/// Which configured value ended up keying the token codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    OtaSecret,
    AppSecret,
}

/// Pick the OTA-specific secret, falling back to the shared app secret.
///
/// Blank values count as unset. Having neither is a startup fault.
pub fn resolve_secret<'a>(
    ota_secret: Option<&'a str>,
    app_secret: Option<&'a str>,
) -> Result<(&'a str, SecretSource), TokenError> {
    let usable = |s: &&str| !s.trim().is_empty();
    if let Some(secret) = ota_secret.filter(usable) {
        return Ok((secret, SecretSource::OtaSecret));
    }
    if let Some(secret) = app_secret.filter(usable) {
        return Ok((secret, SecretSource::AppSecret));
    }
    Err(TokenError::MissingSecret)
}
