//! Provisioning profile (`embedded.mobileprovision`) reader.
//!
//! A profile is a CMS-signed envelope around an XML plist. The signature is
//! not checked here; we only lift the plaintext plist out of the envelope
//! to classify how the build was signed.

use buildrop_core::SigningType;
use chrono::DateTime;

use crate::plist::{self, Value};

/// Fields of a provisioning profile relevant to OTA installs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProvisioningProfile {
    pub name: Option<String>,
    pub team_name: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    pub signing_type: SigningType,
}

/// Locate the embedded plist inside a CMS envelope.
fn embedded_plist(bytes: &[u8]) -> Option<&[u8]> {
    let start = find(bytes, b"<?xml").or_else(|| find(bytes, b"<plist"))?;
    let end_tag = b"</plist>";
    let end = find(&bytes[start..], end_tag)? + start + end_tag.len();
    Some(&bytes[start..end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Classify the signing method from a decoded profile.
///
/// `get-task-allow` marks a development profile; `ProvisionsAllDevices`
/// marks enterprise; an explicit device list marks ad hoc; anything else is
/// an App Store distribution profile.
fn classify(profile: &Value) -> SigningType {
    let debuggable = profile
        .get("Entitlements")
        .and_then(|e| e.get("get-task-allow"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if debuggable {
        return SigningType::Development;
    }
    if profile
        .get("ProvisionsAllDevices")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return SigningType::Enterprise;
    }
    if profile.get("ProvisionedDevices").and_then(Value::as_array).is_some() {
        return SigningType::Adhoc;
    }
    SigningType::Appstore
}

fn parse_date(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

/// Read a provisioning profile. Returns `None` when the envelope holds no
/// parseable plist, which callers report as [`SigningType::Unknown`].
pub fn read_profile(bytes: &[u8]) -> Option<ProvisioningProfile> {
    let xml = embedded_plist(bytes)?;
    let profile = match plist::parse(xml) {
        Ok(value @ Value::Dict(_)) => value,
        Ok(_) => return None,
        Err(e) => {
            tracing::debug!(error = %e, "provisioning profile plist unreadable");
            return None;
        }
    };

    let team_name = profile.string_at("TeamName").or_else(|| {
        profile
            .get("TeamIdentifier")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    Some(ProvisioningProfile {
        name: profile.string_at("Name"),
        team_name,
        expires_at: profile
            .get("ExpirationDate")
            .and_then(Value::as_date)
            .and_then(parse_date),
        signing_type: classify(&profile),
    })
}
