//! Router and shared state.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use buildrop_crypto::OtaTokenCodec;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth::AccessControl;
use crate::blob::BlobStore;
use crate::error::ApiError;
use crate::ingest::{IngestHandle, Submitted};
use crate::origin::OriginResolver;
use crate::request::RequestMeta;
use crate::storage::Database;
use crate::{diagnostics, download, install_link, manifest};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub blobs: Arc<dyn BlobStore>,
    pub tokens: Arc<OtaTokenCodec>,
    pub origins: Arc<OriginResolver>,
    pub access: AccessControl,
    pub ingest: IngestHandle,
    /// Install-link lifetime when the request names none.
    pub default_ttl_secs: u64,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/releases/{id}/install-link", post(install_link::create))
        .route("/api/releases/{id}/manifest", get(manifest::serve))
        .route("/api/releases/{id}/download", get(download::serve))
        .route("/api/releases/{id}/ota-diagnostics", get(diagnostics::serve))
        .route("/api/releases/{id}/reprocess", post(reprocess))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /healthz`
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /api/releases/{id}/reprocess`
///
/// Puts the release back into `processing` and runs introspection again.
/// Answers `202` when the work was queued.
async fn reprocess(
    State(state): State<AppState>,
    Path(release_id): Path<String>,
    meta: RequestMeta,
) -> Result<Response, ApiError> {
    let (_, app) = state.db.get_release_with_app(&release_id).await?;
    let user_id = state
        .access
        .authorize_session(meta.bearer.as_deref(), &app)
        .await?;

    state.db.mark_processing(&release_id).await?;
    tracing::info!(release_id = %release_id, user_id = %user_id, "Reprocess requested");

    let submitted = state.ingest.submit(&release_id).await?;
    let release = state.db.get_release(&release_id).await?;
    let body = Json(json!({
        "releaseId": release.id,
        "status": release.status,
        "failureReason": release.failure_reason,
    }));

    Ok(match submitted {
        Submitted::Queued => (StatusCode::ACCEPTED, body).into_response(),
        Submitted::Completed(_) => (StatusCode::OK, body).into_response(),
    })
}
