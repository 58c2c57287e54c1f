//! Row types.

use buildrop_core::{Platform, ReleaseStatus, SigningType};
use serde::Serialize;
use sqlx::types::Json;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub platform: Platform,
    pub bundle_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: String,
    pub app_id: String,
    pub version: Option<String>,
    pub build_number: Option<String>,
    pub artifact_key: String,
    pub file_size: Option<i64>,
    pub status: ReleaseStatus,
    pub failure_reason: Option<String>,
    pub signing_type: SigningType,
    pub provisioning_profile_name: Option<String>,
    pub team_name: Option<String>,
    pub provisioning_expires_at: Option<i64>,
    pub extracted_bundle_id: Option<String>,
    pub min_os_version: Option<String>,
    pub display_name: Option<String>,
    pub device_families: Json<Vec<String>>,
    pub permissions: Json<Vec<String>>,
    pub android_heuristic: bool,
    pub download_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Release {
    /// Bundle identifier read from the artifact, else the one the app was
    /// registered with.
    pub fn bundle_id<'a>(&'a self, app: &'a App) -> Option<&'a str> {
        self.extracted_bundle_id
            .as_deref()
            .or(app.bundle_id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLog {
    pub id: i64,
    pub release_id: String,
    pub subject_id: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
}

/// Fields for inserting an app.
#[derive(Debug, Clone)]
pub struct NewApp<'a> {
    pub id: &'a str,
    pub organization_id: &'a str,
    pub name: &'a str,
    pub platform: Platform,
    pub bundle_id: Option<&'a str>,
}

/// Fields known at upload time. Everything else is filled by introspection.
#[derive(Debug, Clone)]
pub struct NewRelease<'a> {
    pub id: &'a str,
    pub app_id: &'a str,
    pub version: Option<&'a str>,
    pub build_number: Option<&'a str>,
    pub artifact_key: &'a str,
}

/// Who fetched a build, appended alongside the counter increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLogEntry {
    pub subject_id: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Introspection result applied to a `processing` release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub version: Option<String>,
    pub build_number: Option<String>,
    pub file_size: i64,
    pub signing_type: SigningType,
    pub provisioning_profile_name: Option<String>,
    pub team_name: Option<String>,
    pub provisioning_expires_at: Option<i64>,
    pub extracted_bundle_id: Option<String>,
    pub min_os_version: Option<String>,
    pub display_name: Option<String>,
    pub device_families: Vec<String>,
    pub permissions: Vec<String>,
    pub android_heuristic: bool,
}
