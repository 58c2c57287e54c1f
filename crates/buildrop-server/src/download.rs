//! Artifact download with installer-correct headers and download accounting.
//!
//! A request is authorized by exactly one of: an install token in the query
//! (takes precedence when present) or a session bearer token plus
//! membership. The counter increment and log row are committed when the
//! final body chunk is handed to the transport; a client that disconnects
//! before that drops the body stream and nothing is counted. `HEAD` reports
//! the stored blob length and never counts.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use buildrop_core::Platform;
use buildrop_crypto::PUBLIC_INSTALL_SUBJECT;
use bytes::Bytes;

use crate::error::{ApiError, NO_STORE};
use crate::request::{RequestMeta, TokenQuery};
use crate::routes::AppState;
use crate::storage::{App, Database, DownloadLogEntry, Release};

const CHUNK_SIZE: usize = 64 * 1024;

/// How the artifact is presented to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The iOS installer fetching through an install link: a streamed
    /// resource with byte ranges, never a file save.
    InstallerStream,
    /// A user-facing file download.
    Attachment { filename: String },
}

impl Delivery {
    pub fn choose(app: &App, release: &Release, via_token: bool) -> Self {
        match (app.platform, via_token) {
            (Platform::Ios, true) => Self::InstallerStream,
            (Platform::Ios | Platform::Android, _) => Self::Attachment {
                filename: attachment_filename(
                    &app.name,
                    release.version.as_deref().or(release.build_number.as_deref()),
                    app.platform,
                ),
            },
        }
    }

    fn headers(&self, platform: Platform, content_length: Option<u64>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(platform.content_type()));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        match self {
            Self::InstallerStream => {
                headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            }
            Self::Attachment { filename } => {
                if let Ok(value) =
                    HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
                {
                    headers.insert(CONTENT_DISPOSITION, value);
                }
            }
        }
        if let Some(len) = content_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        headers
    }
}

/// `<app>-<version>.<ext>` restricted to `[A-Za-z0-9._-]`.
pub fn attachment_filename(app_name: &str, version: Option<&str>, platform: Platform) -> String {
    let stem = match version.map(str::trim).filter(|v| !v.is_empty()) {
        Some(version) => format!("{}-{version}", app_name.trim()),
        None => app_name.trim().to_string(),
    };
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_' || c == '-');
    let stem = if cleaned.is_empty() { "app" } else { cleaned };
    format!("{stem}.{}", platform.artifact_extension())
}

/// Outcome of interpreting a `Range` header against a body of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    Full,
    /// Inclusive byte bounds.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Interpret a single `bytes=` range. Multi-range, foreign units and
/// malformed values are ignored in favour of the full body.
pub fn parse_range(header: Option<&str>, size: u64) -> RangeRequest {
    let Some(ranges) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return RangeRequest::Full;
    };
    if ranges.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return RangeRequest::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        let Ok(suffix) = last.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if suffix == 0 || size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if last.is_empty() {
        None
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return RangeRequest::Full,
        }
    };
    if start >= size {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Partial {
        start,
        end: end.map_or(size - 1, |e| e.min(size - 1)),
    }
}

struct Caller {
    subject: String,
    via_token: bool,
}

/// `GET|HEAD /api/releases/{id}/download[?token=]`
pub async fn serve(
    State(state): State<AppState>,
    Path(release_id): Path<String>,
    Query(query): Query<TokenQuery>,
    method: Method,
    meta: RequestMeta,
) -> Response {
    let head = method == Method::HEAD;
    match respond(&state, &release_id, query.token(), head, &meta).await {
        Ok(response) => response,
        Err(e) => e.into_plain(),
    }
}

async fn respond(
    state: &AppState,
    release_id: &str,
    token: Option<&str>,
    head: bool,
    meta: &RequestMeta,
) -> Result<Response, ApiError> {
    let token_subject = match token {
        Some(token) => Some(
            state
                .tokens
                .verify(token, release_id)
                .map_err(|_| ApiError::InvalidToken)?,
        ),
        None => None,
    };

    let (release, app) = state.db.get_release_with_app(release_id).await?;
    let caller = match token_subject {
        Some(subject) => Caller {
            subject,
            via_token: true,
        },
        None => Caller {
            subject: state
                .access
                .authorize_session(meta.bearer.as_deref(), &app)
                .await?,
            via_token: false,
        },
    };
    let delivery = Delivery::choose(&app, &release, caller.via_token);

    if head {
        let size = state.blobs.size(&release.artifact_key).await?;
        return Ok(with_headers(
            StatusCode::OK,
            delivery.headers(app.platform, Some(size)),
            Body::empty(),
        ));
    }

    let data = state.blobs.get(&release.artifact_key).await?;
    let size = data.len() as u64;

    if delivery == Delivery::InstallerStream {
        match parse_range(meta.range.as_deref(), size) {
            RangeRequest::Full => {}
            RangeRequest::Unsatisfiable => return Err(ApiError::RangeNotSatisfiable { size }),
            RangeRequest::Partial { start, end } => {
                let (Ok(from), Ok(to)) = (usize::try_from(start), usize::try_from(end)) else {
                    return Err(ApiError::RangeNotSatisfiable { size });
                };
                let mut headers = delivery.headers(app.platform, Some(end - start + 1));
                if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")) {
                    headers.insert(CONTENT_RANGE, value);
                }
                tracing::debug!(release_id, start, end, "Serving partial download");
                return Ok(with_headers(
                    StatusCode::PARTIAL_CONTENT,
                    headers,
                    Body::from(data.slice(from..=to)),
                ));
            }
        }
    }

    let entry = (caller.subject != PUBLIC_INSTALL_SUBJECT).then(|| DownloadLogEntry {
        subject_id: caller.subject.clone(),
        client_ip: meta.client_ip(state.origins.trusts_proxy_headers()),
        user_agent: meta.user_agent.clone(),
    });
    tracing::info!(
        release_id,
        via_token = caller.via_token,
        platform = %app.platform,
        size,
        "Serving download"
    );

    Ok(with_headers(
        StatusCode::OK,
        delivery.headers(app.platform, Some(size)),
        counted_body(data, state.db.clone(), release_id.to_string(), entry),
    ))
}

fn with_headers(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Stream `data` in chunks. The download is committed just before the
/// final chunk is yielded: a transport that stops polling once it has sent
/// `Content-Length` bytes must still see the count, while a client that
/// disconnects during an earlier chunk is never counted.
fn counted_body(
    data: Bytes,
    db: Database,
    release_id: String,
    entry: Option<DownloadLogEntry>,
) -> Body {
    let stream = async_stream::stream! {
        let mut offset = 0;
        loop {
            let end = (offset + CHUNK_SIZE).min(data.len());
            if end == data.len() {
                commit_download(&db, &release_id, entry.as_ref()).await;
                if end > offset {
                    yield Ok::<Bytes, std::io::Error>(data.slice(offset..end));
                }
                break;
            }
            yield Ok(data.slice(offset..end));
            offset = end;
        }
    };
    Body::from_stream(stream)
}

async fn commit_download(db: &Database, release_id: &str, entry: Option<&DownloadLogEntry>) {
    match db.record_download(release_id, entry).await {
        Ok(()) => tracing::debug!(release_id, logged = entry.is_some(), "Download counted"),
        Err(e) => tracing::warn!(
            release_id,
            error = %e,
            "Download served but could not be counted"
        ),
    }
}
