//! Per-request facts the OTA handlers need, pulled out of headers once.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, HOST, RANGE, USER_AGENT};
use axum::http::request::Parts;
use serde::Deserialize;

use crate::origin::OriginHints;

const FORWARDED: &str = "forwarded";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// `?token=` on OTA routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

impl TokenQuery {
    /// The token, with an empty parameter treated as absent.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub origin: OriginHints,
    pub user_agent: Option<String>,
    /// `Authorization: Bearer` credential, if any.
    pub bearer: Option<String>,
    pub range: Option<String>,
    forwarded_for: Option<String>,
    peer: Option<SocketAddr>,
}

fn header(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl RequestMeta {
    pub fn from_parts(parts: &Parts) -> Self {
        let headers = &parts.headers;
        let host = header(headers, HOST)
            .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()));
        let bearer = header(headers, AUTHORIZATION).and_then(|value| {
            let (scheme, credential) = value.split_once(' ')?;
            scheme
                .eq_ignore_ascii_case("bearer")
                .then(|| credential.trim().to_string())
                .filter(|c| !c.is_empty())
        });

        Self {
            origin: OriginHints {
                host,
                forwarded: header(headers, FORWARDED),
                forwarded_proto: header(headers, X_FORWARDED_PROTO),
                forwarded_host: header(headers, X_FORWARDED_HOST),
            },
            user_agent: header(headers, USER_AGENT),
            bearer,
            range: header(headers, RANGE),
            forwarded_for: header(headers, X_FORWARDED_FOR),
            peer: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        }
    }

    /// Client address: the first `X-Forwarded-For` hop when proxy headers
    /// are trusted, else the socket peer.
    pub fn client_ip(&self, trust_proxy_headers: bool) -> Option<String> {
        let forwarded = trust_proxy_headers
            .then(|| self.forwarded_for.as_deref())
            .flatten()
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        forwarded.or_else(|| self.peer.map(|addr| addr.ip().to_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}
