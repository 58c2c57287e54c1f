//! Install-link minting for signed-in members.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Response};
use buildrop_core::Platform;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, NO_STORE};
use crate::manifest::{download_url, install_url, manifest_url};
use crate::origin::OriginSource;
use crate::request::RequestMeta;
use crate::routes::AppState;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallLinkRequest {
    /// Requested lifetime; fractional and non-positive values are clamped.
    pub ttl_seconds: Option<f64>,
    /// Mint a link not tied to the caller.
    pub public: bool,
}

impl InstallLinkRequest {
    /// An empty body means all defaults.
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid install-link request: {e}")))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallLinkResponse {
    pub token: String,
    pub ttl_seconds: u64,
    pub expires_at: i64,
    /// iOS only.
    pub manifest_url: Option<String>,
    pub download_url: String,
    /// `itms-services://` trigger; iOS only.
    pub install_url: Option<String>,
    pub origin_source: OriginSource,
    pub mismatch: bool,
}

/// `POST /api/releases/{id}/install-link`
pub async fn create(
    State(state): State<AppState>,
    Path(release_id): Path<String>,
    meta: RequestMeta,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (_, app) = state.db.get_release_with_app(&release_id).await?;
    let user_id = state
        .access
        .authorize_session(meta.bearer.as_deref(), &app)
        .await?;
    let request = InstallLinkRequest::parse(&body)?;

    let origin = state.origins.resolve(&meta.origin)?;
    #[allow(clippy::cast_precision_loss)]
    let ttl = request
        .ttl_seconds
        .unwrap_or(state.default_ttl_secs as f64);
    let subject = (!request.public).then_some(user_id.as_str());
    let minted = state
        .tokens
        .generate(&release_id, subject, ttl)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let manifest = (app.platform == Platform::Ios)
        .then(|| manifest_url(&origin, &release_id, &minted.token));
    let response = InstallLinkResponse {
        install_url: manifest.as_deref().map(install_url),
        manifest_url: manifest,
        download_url: download_url(&origin, &release_id, &minted.token),
        token: minted.token,
        ttl_seconds: minted.ttl_secs,
        expires_at: minted.expires_at,
        origin_source: origin.source,
        mismatch: origin.mismatch,
    };

    tracing::info!(
        release_id = %release_id,
        user_id = %user_id,
        public = request.public,
        ttl_secs = response.ttl_seconds,
        source = origin.source.as_str(),
        mismatch = origin.mismatch,
        "Install link issued"
    );

    let mut response = Json(response).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    Ok(response)
}
