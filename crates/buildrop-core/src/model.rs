//! Domain enums shared by the introspector, the token layer and the server.
//!
//! All three are stored as `TEXT` columns in `SQLite`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Mobile platform an app targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "IOS",
            Self::Android => "ANDROID",
        }
    }

    /// File extension of the installable artifact.
    pub const fn artifact_extension(self) -> &'static str {
        match self {
            Self::Ios => "ipa",
            Self::Android => "apk",
        }
    }

    /// MIME type served for the artifact.
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Ios => "application/octet-stream",
            Self::Android => "application/vnd.android.package-archive",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IOS" => Ok(Self::Ios),
            "ANDROID" => Ok(Self::Android),
            _ => Err(Error::UnknownVariant {
                kind: "platform",
                value: s.to_string(),
            }),
        }
    }
}

/// How an iOS build was signed, as read from its provisioning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SigningType {
    Development,
    Adhoc,
    Enterprise,
    Appstore,
    #[default]
    Unknown,
}

impl SigningType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Adhoc => "adhoc",
            Self::Enterprise => "enterprise",
            Self::Appstore => "appstore",
            Self::Unknown => "unknown",
        }
    }

    /// Whether an OS installer accepts this build from an arbitrary link.
    pub const fn allows_ota_install(self) -> bool {
        matches!(self, Self::Adhoc | Self::Enterprise)
    }
}

impl fmt::Display for SigningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "adhoc" | "ad-hoc" | "ad_hoc" => Ok(Self::Adhoc),
            "enterprise" => Ok(Self::Enterprise),
            "appstore" | "app-store" | "app_store" => Ok(Self::Appstore),
            "unknown" => Ok(Self::Unknown),
            _ => Err(Error::UnknownVariant {
                kind: "signing type",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle of a release while its artifact is being introspected.
///
/// `Processing` moves to exactly one of `Ready` or `Failed`; a reprocess
/// request moves it back to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Processing,
    Ready,
    Failed,
}

impl ReleaseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
