//! OTA readiness diagnostics.
//!
//! Runs the same checks an install would hit, in order, and reports each
//! one instead of failing on the first problem. Only a bad token stops the
//! battery early. Check failures are ordinary results, not errors.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Response};
use buildrop_core::config::Environment;
use buildrop_core::{Platform, SigningType};
use chrono::DateTime;
use serde::Serialize;

use crate::error::{ApiError, NO_STORE};
use crate::manifest::{download_url, manifest_url};
use crate::origin::{Origin, OriginError, OriginSource};
use crate::request::{RequestMeta, TokenQuery};
use crate::routes::AppState;
use crate::storage::{App, Release};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub key: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl Check {
    fn new(key: &'static str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            key,
            status,
            message: message.into(),
        }
    }

    fn pass(key: &'static str, message: impl Into<String>) -> Self {
        Self::new(key, CheckStatus::Pass, message)
    }

    fn warn(key: &'static str, message: impl Into<String>) -> Self {
        Self::new(key, CheckStatus::Warn, message)
    }

    fn fail(key: &'static str, message: impl Into<String>) -> Self {
        Self::new(key, CheckStatus::Fail, message)
    }
}

/// Links the install flow would use, so a caller can try them directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved {
    pub manifest_url: Option<String>,
    pub download_url: Option<String>,
    pub origin_source: Option<OriginSource>,
    pub mismatch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsReport {
    pub ok: bool,
    pub checks: Vec<Check>,
    pub resolved: Resolved,
}

impl DiagnosticsReport {
    /// `ok` holds exactly when no check failed. Warnings do not count.
    pub fn new(checks: Vec<Check>, resolved: Resolved) -> Self {
        Self {
            ok: checks.iter().all(|c| c.status != CheckStatus::Fail),
            checks,
            resolved,
        }
    }
}

const TOKEN: &str = "token";
const PLATFORM: &str = "platform";
const SIGNING_TYPE: &str = "signing-type";
const PROVISIONING_EXPIRY: &str = "provisioning-expiry";
const BUNDLE_IDENTIFIER: &str = "bundle-identifier";
const BUILD_NUMBER: &str = "build-number";
const ORIGIN: &str = "origin";
const ORIGIN_HOST: &str = "origin-host";
const ORIGIN_MISMATCH: &str = "origin-mismatch";

fn format_date(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0).map_or_else(
        || ts.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

fn signing_check(signing: SigningType) -> Check {
    match signing {
        SigningType::Adhoc | SigningType::Enterprise => {
            Check::pass(SIGNING_TYPE, format!("Signed with an {signing} profile."))
        }
        SigningType::Development => Check::fail(
            SIGNING_TYPE,
            "Development-signed builds are unsupported for OTA installation; re-sign with an ad hoc or enterprise profile.",
        ),
        SigningType::Appstore => Check::fail(
            SIGNING_TYPE,
            "App Store-signed builds can only be installed through the App Store or TestFlight; re-sign with an ad hoc or enterprise profile.",
        ),
        SigningType::Unknown => Check::fail(
            SIGNING_TYPE,
            "Signing type could not be determined; the build has no readable provisioning profile.",
        ),
    }
}

fn expiry_check(expires_at: Option<i64>, now: i64) -> Check {
    match expires_at {
        None => Check::warn(
            PROVISIONING_EXPIRY,
            "Provisioning profile expiry is unknown.",
        ),
        Some(ts) if ts <= now => Check::fail(
            PROVISIONING_EXPIRY,
            format!("Provisioning profile expired on {}.", format_date(ts)),
        ),
        Some(ts) => Check::pass(
            PROVISIONING_EXPIRY,
            format!("Provisioning profile is valid until {}.", format_date(ts)),
        ),
    }
}

/// Checks that depend on the release and the resolved origin, in order.
/// The token check is the caller's.
pub fn release_checks(
    release: &Release,
    app: &App,
    origin: &Result<Origin, OriginError>,
    environment: Environment,
    now: i64,
) -> Vec<Check> {
    let mut checks = Vec::with_capacity(8);

    checks.push(match app.platform {
        Platform::Ios => Check::pass(PLATFORM, "Release targets iOS."),
        Platform::Android => Check::fail(
            PLATFORM,
            "OTA installation is only available for iOS releases.",
        ),
    });
    checks.push(signing_check(release.signing_type));
    checks.push(expiry_check(release.provisioning_expires_at, now));

    checks.push(match release.bundle_id(app) {
        Some(id) => Check::pass(BUNDLE_IDENTIFIER, format!("Bundle identifier is {id}.")),
        None => Check::fail(
            BUNDLE_IDENTIFIER,
            "No bundle identifier was found in the build or on the app.",
        ),
    });

    checks.push(
        match release.build_number.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(build) => Check::pass(BUILD_NUMBER, format!("Build number is {build}.")),
            None => Check::fail(BUILD_NUMBER, "Release has no build number."),
        },
    );

    match origin {
        Err(e) => checks.push(Check::fail(ORIGIN, e.to_string())),
        Ok(origin) => {
            checks.push(Check::pass(
                ORIGIN,
                format!(
                    "Install links use {} ({} origin).",
                    origin.base(),
                    origin.source.as_str()
                ),
            ));

            let host = origin.host();
            checks.push(if !origin.is_private_host() {
                Check::pass(ORIGIN_HOST, format!("Host {host} is not a private or local address."))
            } else if environment.is_production() {
                Check::fail(
                    ORIGIN_HOST,
                    format!("Host {host} is private or local and cannot be reached by an installing device."),
                )
            } else {
                Check::warn(
                    ORIGIN_HOST,
                    format!("Host {host} is private or local; only devices on the same network can install."),
                )
            });

            checks.push(if origin.mismatch {
                Check::warn(
                    ORIGIN_MISMATCH,
                    "The configured public URL differs from the origin this request arrived on.",
                )
            } else {
                Check::pass(ORIGIN_MISMATCH, "No origin mismatch detected.")
            });
        }
    }

    checks
}

/// `GET /api/releases/{id}/ota-diagnostics?token=`
pub async fn serve(
    State(state): State<AppState>,
    Path(release_id): Path<String>,
    Query(query): Query<TokenQuery>,
    meta: RequestMeta,
) -> Result<Response, ApiError> {
    let report = run(&state, &release_id, query.token(), &meta).await?;
    tracing::info!(
        release_id = %release_id,
        ok = report.ok,
        checks = report.checks.len(),
        "OTA diagnostics completed"
    );
    let mut response = Json(report).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    Ok(response)
}

async fn run(
    state: &AppState,
    release_id: &str,
    token: Option<&str>,
    meta: &RequestMeta,
) -> Result<DiagnosticsReport, ApiError> {
    let token_failed =
        |message: &str| DiagnosticsReport::new(vec![Check::fail(TOKEN, message)], Resolved::default());

    let Some(token) = token else {
        return Ok(token_failed("No install token was supplied."));
    };
    let Ok(subject) = state.tokens.verify(token, release_id) else {
        return Ok(token_failed("Install token is invalid or expired."));
    };

    let (release, app) = state.db.get_release_with_app(release_id).await?;
    if !state.access.subject_has_access(&subject, &app).await? {
        return Ok(token_failed(
            "The account this link was issued to no longer has access to the release.",
        ));
    }

    let origin = state.origins.resolve(&meta.origin);
    let mut checks = vec![Check::pass(TOKEN, "Install token is valid for this release.")];
    checks.extend(release_checks(
        &release,
        &app,
        &origin,
        state.origins.environment(),
        buildrop_core::db::unix_timestamp(),
    ));

    let resolved = match &origin {
        Ok(origin) => Resolved {
            manifest_url: (app.platform == Platform::Ios)
                .then(|| manifest_url(origin, release_id, token)),
            download_url: Some(download_url(origin, release_id, token)),
            origin_source: Some(origin.source),
            mismatch: origin.mismatch,
        },
        Err(_) => Resolved::default(),
    };

    Ok(DiagnosticsReport::new(checks, resolved))
}
