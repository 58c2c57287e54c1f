//! iOS installer manifest.
//!
//! `itms-services://?action=download-manifest&url=…` makes the device fetch
//! this property list and then the package it points at. The device, not our
//! client, consumes both, so errors here are plain text.

use std::fmt::Write;

use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use buildrop_core::Platform;

use crate::error::{ApiError, NO_STORE};
use crate::origin::Origin;
use crate::request::{RequestMeta, TokenQuery};
use crate::routes::AppState;
use crate::storage::{App, Release};

/// Escape text for inclusion in XML character data or attribute values.
pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Values interpolated into a manifest. Raw; escaping happens on render.
#[derive(Debug, Clone)]
pub struct ManifestFields<'a> {
    pub package_url: &'a str,
    pub bundle_id: &'a str,
    pub bundle_version: &'a str,
    pub title: &'a str,
}

impl<'a> ManifestFields<'a> {
    /// Fields for `release`, or `None` when no bundle identifier is known.
    pub fn for_release(release: &'a Release, app: &'a App, package_url: &'a str) -> Option<Self> {
        Some(Self {
            package_url,
            bundle_id: release.bundle_id(app)?,
            bundle_version: release
                .version
                .as_deref()
                .or(release.build_number.as_deref())
                .unwrap_or("0"),
            title: &app.name,
        })
    }
}

/// Render the installer property list.
pub fn render_manifest(fields: &ManifestFields<'_>) -> String {
    let mut doc = String::from(concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        "\n",
        r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#,
        "\n",
    ));
    let _ = write!(
        doc,
        r#"<plist version="1.0">
<dict>
  <key>items</key>
  <array>
    <dict>
      <key>assets</key>
      <array>
        <dict>
          <key>kind</key>
          <string>software-package</string>
          <key>url</key>
          <string>{url}</string>
        </dict>
      </array>
      <key>metadata</key>
      <dict>
        <key>bundle-identifier</key>
        <string>{bundle_id}</string>
        <key>bundle-version</key>
        <string>{bundle_version}</string>
        <key>kind</key>
        <string>software</string>
        <key>title</key>
        <string>{title}</string>
      </dict>
    </dict>
  </array>
</dict>
</plist>
"#,
        url = escape_xml(fields.package_url),
        bundle_id = escape_xml(fields.bundle_id),
        bundle_version = escape_xml(fields.bundle_version),
        title = escape_xml(fields.title),
    );
    doc
}

pub fn manifest_url(origin: &Origin, release_id: &str, token: &str) -> String {
    origin.endpoint(&["api", "releases", release_id, "manifest"], Some(token))
}

pub fn download_url(origin: &Origin, release_id: &str, token: &str) -> String {
    origin.endpoint(&["api", "releases", release_id, "download"], Some(token))
}

/// The `itms-services` link that starts an install on the device.
pub fn install_url(manifest_url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(manifest_url.as_bytes()).collect();
    format!("itms-services://?action=download-manifest&url={encoded}")
}

/// `GET /api/releases/{id}/manifest?token=`
pub async fn serve(
    State(state): State<AppState>,
    Path(release_id): Path<String>,
    Query(query): Query<TokenQuery>,
    meta: RequestMeta,
) -> Response {
    match build(&state, &release_id, query.token(), &meta).await {
        Ok(document) => (
            [
                (CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8")),
                (CACHE_CONTROL, HeaderValue::from_static(NO_STORE)),
            ],
            document,
        )
            .into_response(),
        Err(e) => e.into_plain(),
    }
}

async fn build(
    state: &AppState,
    release_id: &str,
    token: Option<&str>,
    meta: &RequestMeta,
) -> Result<String, ApiError> {
    let token = token.ok_or(ApiError::InvalidToken)?;
    state
        .tokens
        .verify(token, release_id)
        .map_err(|_| ApiError::InvalidToken)?;

    let (release, app) = state.db.get_release_with_app(release_id).await?;
    if app.platform != Platform::Ios {
        return Err(ApiError::BadRequest(
            "Install manifests are only available for iOS releases".to_string(),
        ));
    }

    let origin = state.origins.resolve(&meta.origin)?;
    let package_url = download_url(&origin, release_id, token);
    let fields = ManifestFields::for_release(&release, &app, &package_url).ok_or_else(|| {
        ApiError::NotReady("Release has no bundle identifier yet".to_string())
    })?;

    tracing::info!(
        release_id,
        source = origin.source.as_str(),
        mismatch = origin.mismatch,
        "Serving install manifest"
    );
    Ok(render_manifest(&fields))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use buildrop_inspect::plist::{self, Value};

    fn fields<'a>(title: &'a str, url: &'a str) -> ManifestFields<'a> {
        ManifestFields {
            package_url: url,
            bundle_id: "com.example.demo",
            bundle_version: "1.0",
            title,
        }
    }

    #[test]
    fn escapes_all_markup_characters() {
        assert_eq!(
            escape_xml(r#"Tom & Jerry's <"Beta">"#),
            "Tom &amp; Jerry&apos;s &lt;&quot;Beta&quot;&gt;"
        );
    }

    #[test]
    fn hostile_title_keeps_document_structure() {
        let title = r#"A & B <x> "q" 'y' </string></dict>"#;
        let url = "https://ota.example.com/api/releases/r1/download?token=a.b&x=1";
        let doc = render_manifest(&fields(title, url));

        let root = plist::parse(doc.as_bytes()).unwrap();
        let item = &root.get("items").and_then(Value::as_array).unwrap()[0];
        let asset = &item.get("assets").and_then(Value::as_array).unwrap()[0];
        assert_eq!(asset.string_at("kind").as_deref(), Some("software-package"));
        assert_eq!(asset.string_at("url").as_deref(), Some(url));

        let metadata = item.get("metadata").unwrap();
        assert_eq!(metadata.string_at("title").as_deref(), Some(title));
        assert_eq!(
            metadata.string_at("bundle-identifier").as_deref(),
            Some("com.example.demo")
        );
        assert_eq!(metadata.string_at("kind").as_deref(), Some("software"));
    }

    #[test]
    fn install_url_percent_encodes_manifest_url() {
        let url = install_url("https://ota.example.com/api/releases/r1/manifest?token=a.b");
        assert_eq!(
            url,
            "itms-services://?action=download-manifest&url=https%3A%2F%2Fota.example.com%2Fapi%2Freleases%2Fr1%2Fmanifest%3Ftoken%3Da.b"
        );
    }
}
