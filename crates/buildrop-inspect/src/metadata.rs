//! The record produced by introspection.

use buildrop_core::SigningType;
use serde::Serialize;

/// Install-relevant metadata pulled from an uploaded archive.
///
/// Every field is optional: a field is `None` whenever the archive did not
/// yield a trustworthy value. `Default` is the all-unknown record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub bundle_id: Option<String>,
    /// Marketing version (`CFBundleShortVersionString` / `versionName`).
    pub version: Option<String>,
    /// Build number (`CFBundleVersion` / `versionCode`).
    pub build_number: Option<String>,
    pub display_name: Option<String>,
    /// Minimum OS (`MinimumOSVersion` / `minSdkVersion`).
    pub min_os_version: Option<String>,
    /// iOS device families, e.g. `["iphone", "ipad"]`.
    pub device_families: Vec<String>,
    pub signing_type: SigningType,
    pub provisioning_profile_name: Option<String>,
    pub team_name: Option<String>,
    /// Unix seconds.
    pub provisioning_expires_at: Option<i64>,
    /// Android `android.permission.*` names found in the manifest.
    pub permissions: Vec<String>,
    /// Set when `bundle_id` was guessed by scanning the Android string pool
    /// rather than read from a parsed manifest.
    pub android_heuristic: bool,
}

impl ArtifactMetadata {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Name an iOS `UIDeviceFamily` code.
pub(crate) const fn device_family_name(code: i64) -> Option<&'static str> {
    match code {
        1 => Some("iphone"),
        2 => Some("ipad"),
        3 => Some("tv"),
        4 => Some("watch"),
        6 => Some("mac"),
        7 => Some("vision"),
        _ => None,
    }
}
