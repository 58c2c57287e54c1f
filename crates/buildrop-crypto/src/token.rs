//! Install token minting and verification.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::TokenError;
use crate::secret::{SecretSource, resolve_secret};

type HmacSha256 = Hmac<Sha256>;

/// Subject recorded in tokens that are not bound to an authenticated user.
pub const PUBLIC_INSTALL_SUBJECT: &str = "public-install";

const DELIMITER: char = '.';

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    release_id: String,
    subject_id: String,
    exp: i64,
}

/// A freshly minted token together with the effective lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedToken {
    pub token: String,
    pub subject_id: String,
    /// Lifetime after clamping; report this back to the requester.
    pub ttl_secs: u64,
    /// Unix seconds after which verification fails.
    pub expires_at: i64,
}

/// Clamp a requested lifetime to whole seconds, never below one.
///
/// Non-finite, zero and negative inputs are not errors; they become `1`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn clamp_ttl(requested: f64) -> u64 {
    if !requested.is_finite() {
        return 1;
    }
    let floored = requested.floor();
    if floored < 1.0 {
        1
    } else if floored >= u64::MAX as f64 {
        u64::MAX
    } else {
        floored as u64
    }
}

/// Signs and checks release-bound install tokens.
#[derive(Clone)]
pub struct OtaTokenCodec {
    key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for OtaTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtaTokenCodec").finish_non_exhaustive()
    }
}

impl OtaTokenCodec {
    /// Create a codec keyed with `secret`.
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }
        Ok(Self {
            key: Zeroizing::new(secret.to_vec()),
        })
    }

    /// Create a codec from the configured secrets, preferring the OTA one.
    pub fn from_secrets(
        ota_secret: Option<&str>,
        app_secret: Option<&str>,
    ) -> Result<(Self, SecretSource), TokenError> {
        let (secret, source) = resolve_secret(ota_secret, app_secret)?;
        Ok((Self::new(secret.as_bytes())?, source))
    }

    /// Mint a token for `release_id` valid for `ttl_secs` (clamped).
    ///
    /// `subject_id = None` mints a public install link.
    pub fn generate(
        &self,
        release_id: &str,
        subject_id: Option<&str>,
        ttl_secs: f64,
    ) -> Result<MintedToken, TokenError> {
        self.generate_at(release_id, subject_id, ttl_secs, now_secs())
    }

    /// [`generate`](Self::generate) against an explicit clock.
    pub fn generate_at(
        &self,
        release_id: &str,
        subject_id: Option<&str>,
        ttl_secs: f64,
        now: i64,
    ) -> Result<MintedToken, TokenError> {
        let ttl_secs = clamp_ttl(ttl_secs);
        let expires_at = now.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
        let payload = TokenPayload {
            release_id: release_id.to_string(),
            subject_id: subject_id.unwrap_or(PUBLIC_INSTALL_SUBJECT).to_string(),
            exp: expires_at,
        };

        let json =
            serde_json::to_vec(&payload).map_err(|e| TokenError::Encoding(e.to_string()))?;
        let encoded_payload = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.signature(&encoded_payload)?);

        Ok(MintedToken {
            token: format!("{encoded_payload}{DELIMITER}{signature}"),
            subject_id: payload.subject_id,
            ttl_secs,
            expires_at,
        })
    }

    /// Verify `token` for `expected_release_id` and return its subject.
    pub fn verify(&self, token: &str, expected_release_id: &str) -> Result<String, TokenError> {
        self.verify_at(token, expected_release_id, now_secs())
    }

    /// [`verify`](Self::verify) against an explicit clock.
    ///
    /// The payload is only decoded after the signature has been accepted.
    pub fn verify_at(
        &self,
        token: &str,
        expected_release_id: &str,
        now: i64,
    ) -> Result<String, TokenError> {
        let Some((encoded_payload, encoded_signature)) = token.split_once(DELIMITER) else {
            return Err(reject("malformed"));
        };
        if encoded_payload.is_empty()
            || encoded_signature.is_empty()
            || encoded_signature.contains(DELIMITER)
        {
            return Err(reject("malformed"));
        }

        let provided = URL_SAFE_NO_PAD
            .decode(encoded_signature)
            .map_err(|_| reject("signature encoding"))?;
        let expected = self
            .signature(encoded_payload)
            .map_err(|_| reject("signature computation"))?;
        if provided.len() != expected.len() {
            return Err(reject("signature length"));
        }
        if !bool::from(provided.as_slice().ct_eq(expected.as_slice())) {
            return Err(reject("signature mismatch"));
        }

        let payload: TokenPayload = URL_SAFE_NO_PAD
            .decode(encoded_payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| reject("payload"))?;

        if payload.release_id != expected_release_id {
            return Err(reject("release mismatch"));
        }
        if payload.exp < now {
            return Err(reject("expired"));
        }

        Ok(payload.subject_id)
    }

    fn signature(&self, encoded_payload: &str) -> Result<Vec<u8>, TokenError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        mac.update(encoded_payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Log the concrete reason server-side and hand back the opaque error.
fn reject(reason: &'static str) -> TokenError {
    debug!(reason, "install token rejected");
    TokenError::Invalid
}

#[allow(clippy::cast_possible_wrap)]
fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const NOW: i64 = 1_760_000_000;

    fn codec() -> OtaTokenCodec {
        OtaTokenCodec::new(b"test-secret-key-for-testing").unwrap()
    }

    fn split(token: &str) -> (&str, &str) {
        token.split_once(DELIMITER).unwrap()
    }

    #[test]
    fn generate_then_verify_returns_subject() {
        let codec = codec();
        let minted = codec.generate("rel-1", Some("user-1"), 600.0).unwrap();
        assert_eq!(minted.ttl_secs, 600);
        assert_eq!(codec.verify(&minted.token, "rel-1").unwrap(), "user-1");
    }

    #[test]
    fn missing_subject_becomes_public_install() {
        let codec = codec();
        let minted = codec.generate_at("rel-1", None, 60.0, NOW).unwrap();
        assert_eq!(minted.subject_id, PUBLIC_INSTALL_SUBJECT);
        assert_eq!(
            codec.verify_at(&minted.token, "rel-1", NOW).unwrap(),
            PUBLIC_INSTALL_SUBJECT
        );
    }

    #[test]
    fn one_second_token_expires() {
        let codec = codec();
        let minted = codec.generate_at("rel-1", Some("u"), 1.0, NOW).unwrap();
        assert_eq!(minted.expires_at, NOW + 1);
        assert!(codec.verify_at(&minted.token, "rel-1", NOW + 1).is_ok());
        assert!(matches!(
            codec.verify_at(&minted.token, "rel-1", NOW + 2),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn token_is_bound_to_its_release() {
        let codec = codec();
        let minted = codec.generate_at("rel-1", Some("u"), 60.0, NOW).unwrap();
        assert!(matches!(
            codec.verify_at(&minted.token, "rel-2", NOW),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn fractional_ttl_is_clamped_and_reported() {
        let minted = codec().generate_at("rel-1", None, 0.5, NOW).unwrap();
        assert_eq!(minted.ttl_secs, 1);
        assert_eq!(minted.expires_at, NOW + 1);
    }

    #[test]
    fn clamp_ttl_edges() {
        assert_eq!(clamp_ttl(0.0), 1);
        assert_eq!(clamp_ttl(-30.0), 1);
        assert_eq!(clamp_ttl(f64::NAN), 1);
        assert_eq!(clamp_ttl(f64::INFINITY), 1);
        assert_eq!(clamp_ttl(90.9), 90);
        assert_eq!(clamp_ttl(1e30), u64::MAX);
    }

    #[test]
    fn huge_ttl_does_not_overflow_expiry() {
        let codec = codec();
        let minted = codec.generate_at("rel-1", None, 1e30, NOW).unwrap();
        assert_eq!(minted.expires_at, i64::MAX);
        assert!(codec.verify_at(&minted.token, "rel-1", NOW).is_ok());
    }

    #[test]
    fn wrong_secret_fails() {
        let minted = codec().generate_at("rel-1", None, 60.0, NOW).unwrap();
        let other = OtaTokenCodec::new(b"different-secret").unwrap();
        assert!(other.verify_at(&minted.token, "rel-1", NOW).is_err());
    }

    #[test]
    fn every_single_bit_flip_of_the_token_text_fails() {
        let codec = codec();
        let minted = codec.generate_at("rel-1", Some("u"), 60.0, NOW).unwrap();
        let bytes = minted.token.as_bytes();

        for i in 0..bytes.len() {
            for bit in 0..8 {
                let mut mutated = bytes.to_vec();
                mutated[i] ^= 1 << bit;
                let Ok(text) = String::from_utf8(mutated) else {
                    continue;
                };
                assert!(
                    codec.verify_at(&text, "rel-1", NOW).is_err(),
                    "flip of bit {bit} at byte {i} was accepted"
                );
            }
        }
    }

    #[test]
    fn every_single_bit_flip_of_the_raw_signature_fails() {
        let codec = codec();
        let minted = codec.generate_at("rel-1", Some("u"), 60.0, NOW).unwrap();
        let (payload, signature) = split(&minted.token);
        let raw = URL_SAFE_NO_PAD.decode(signature).unwrap();

        for i in 0..raw.len() {
            for bit in 0..8 {
                let mut mutated = raw.clone();
                mutated[i] ^= 1 << bit;
                let forged = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(&mutated));
                assert!(codec.verify_at(&forged, "rel-1", NOW).is_err());
            }
        }
    }

    #[test]
    fn truncated_signature_fails() {
        let codec = codec();
        let minted = codec.generate_at("rel-1", None, 60.0, NOW).unwrap();
        let (payload, signature) = split(&minted.token);
        let raw = URL_SAFE_NO_PAD.decode(signature).unwrap();
        let short = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(&raw[..16]));
        assert!(codec.verify_at(&short, "rel-1", NOW).is_err());
    }

    #[test]
    fn malformed_tokens_fail() {
        let codec = codec();
        for token in ["", ".", "abc", "abc.", ".abc", "a.b.c", "!!!.???"] {
            assert!(matches!(
                codec.verify_at(token, "rel-1", NOW),
                Err(TokenError::Invalid)
            ));
        }
    }

    #[test]
    fn re_signed_payload_for_other_release_is_rejected_without_secret() {
        let codec = codec();
        let minted = codec.generate_at("rel-1", Some("u"), 60.0, NOW).unwrap();
        let (_, signature) = split(&minted.token);
        let forged_payload = URL_SAFE_NO_PAD
            .encode(br#"{"releaseId":"rel-2","subjectId":"u","exp":9999999999}"#);
        let forged = format!("{forged_payload}.{signature}");
        assert!(codec.verify_at(&forged, "rel-2", NOW).is_err());
    }

    #[test]
    fn token_is_url_safe() {
        let minted = codec().generate_at("rel-1", Some("user+1/2"), 60.0, NOW).unwrap();
        assert!(
            minted
                .token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        );
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(
            OtaTokenCodec::new(b""),
            Err(TokenError::MissingSecret)
        ));
    }

    #[test]
    fn debug_does_not_leak_key() {
        let rendered = format!("{:?}", codec());
        assert!(!rendered.contains("test-secret"));
    }
}
