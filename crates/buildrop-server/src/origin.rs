//! Externally reachable origin resolution.
//!
//! Install links are opened by a phone, not by whoever called the API, so
//! the URLs we hand out must use the origin the phone can reach. Resolution
//! order: configured public URL, then trusted reverse-proxy headers, then
//! the request's own `Host`.

use std::net::{Ipv4Addr, Ipv6Addr};

use buildrop_core::config::{Environment, OtaConfig};
use serde::Serialize;
use url::{Host, Url};

/// Where a resolved origin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginSource {
    Configured,
    Forwarded,
    Request,
}

impl OriginSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Forwarded => "forwarded",
            Self::Request => "request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OriginError {
    #[error("PUBLIC_BASE_URL is not a valid absolute http(s) URL: {0}")]
    InvalidPublicUrl(String),

    #[error("Request has no usable Host header and no public URL is configured")]
    MissingHost,

    #[error("Origin {0} is plain HTTP; iOS installs require HTTPS in production")]
    InsecureOrigin(String),
}

/// Host-related request headers, captured verbatim.
#[derive(Debug, Clone, Default)]
pub struct OriginHints {
    pub host: Option<String>,
    /// RFC 7239 `Forwarded`.
    pub forwarded: Option<String>,
    pub forwarded_proto: Option<String>,
    pub forwarded_host: Option<String>,
}

/// A resolved base URL plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    url: Url,
    pub source: OriginSource,
    /// The configured public URL and the request-derived origin disagree.
    pub mismatch: bool,
}

impl Origin {
    /// Base URL without a trailing slash, e.g. `https://ota.example.com/base`.
    pub fn base(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> String {
        self.url.host_str().unwrap_or_default().to_string()
    }

    /// Host is loopback, link-local, private-range or a local-only name.
    pub fn is_private_host(&self) -> bool {
        self.url.host().is_some_and(|h| is_private_host(&h))
    }

    /// Absolute URL for `segments` under this origin, with an optional
    /// `token` query parameter. Segments are percent-encoded.
    pub fn endpoint(&self, segments: &[&str], token: Option<&str>) -> String {
        let mut url = self.url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        url.into()
    }
}

/// Resolves request origins against process-wide settings.
#[derive(Debug, Clone)]
pub struct OriginResolver {
    configured: Option<Result<Url, OriginError>>,
    environment: Environment,
    trust_proxy_headers: bool,
}

impl OriginResolver {
    pub fn new(
        public_url: Option<&str>,
        environment: Environment,
        trust_proxy_headers: bool,
    ) -> Self {
        let configured = public_url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_public_url);
        Self {
            configured,
            environment,
            trust_proxy_headers,
        }
    }

    pub fn from_config(config: &OtaConfig) -> Self {
        Self::new(
            config.public_url.as_deref(),
            config.environment,
            config.trust_proxy_headers,
        )
    }

    /// The configuration problem every resolution will report, if any.
    pub fn config_error(&self) -> Option<&OriginError> {
        self.configured.as_ref().and_then(|c| c.as_ref().err())
    }

    pub const fn environment(&self) -> Environment {
        self.environment
    }

    pub const fn trusts_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    pub fn resolve(&self, hints: &OriginHints) -> Result<Origin, OriginError> {
        let derived = self.request_origin(hints);

        let origin = match &self.configured {
            Some(Err(e)) => return Err(e.clone()),
            Some(Ok(url)) => Origin {
                mismatch: derived
                    .as_ref()
                    .is_some_and(|(request_url, _)| !same_authority(url, request_url)),
                url: url.clone(),
                source: OriginSource::Configured,
            },
            None => {
                let (url, source) = derived.ok_or(OriginError::MissingHost)?;
                Origin {
                    url,
                    source,
                    mismatch: false,
                }
            }
        };

        if self.environment.is_production() && origin.scheme() != "https" {
            return Err(OriginError::InsecureOrigin(origin.base().to_string()));
        }
        Ok(origin)
    }

    /// Origin as seen by the request itself, honouring proxy headers when
    /// trusted.
    fn request_origin(&self, hints: &OriginHints) -> Option<(Url, OriginSource)> {
        let (mut proto, mut host) = (None, None);
        if self.trust_proxy_headers {
            if let Some(forwarded) = hints.forwarded.as_deref() {
                (proto, host) = parse_forwarded(forwarded);
            }
            proto = proto.or_else(|| first_hop(hints.forwarded_proto.as_deref()));
            host = host.or_else(|| first_hop(hints.forwarded_host.as_deref()));
        }
        let source = if proto.is_some() || host.is_some() {
            OriginSource::Forwarded
        } else {
            OriginSource::Request
        };

        let host = host.or_else(|| first_hop(hints.host.as_deref()))?;
        let scheme = match proto.map(|p| p.to_ascii_lowercase()).as_deref() {
            Some("https" | "wss") => "https",
            _ => "http",
        };
        let url = Url::parse(&format!("{scheme}://{host}")).ok()?;
        url.host()?;
        Some((url, source))
    }
}

fn parse_public_url(raw: &str) -> Result<Url, OriginError> {
    let invalid = || OriginError::InvalidPublicUrl(raw.to_string());
    let mut url = Url::parse(raw).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(invalid());
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// First comma-separated value, trimmed.
fn first_hop(value: Option<&str>) -> Option<String> {
    value
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `proto` and `host` from the first element of an RFC 7239 header.
fn parse_forwarded(value: &str) -> (Option<String>, Option<String>) {
    let (mut proto, mut host) = (None, None);
    let first = value.split(',').next().unwrap_or_default();
    for pair in first.split(';') {
        let Some((name, val)) = pair.split_once('=') else {
            continue;
        };
        let val = val.trim().trim_matches('"').trim();
        if val.is_empty() {
            continue;
        }
        match name.trim().to_ascii_lowercase().as_str() {
            "proto" => proto = Some(val.to_string()),
            "host" => host = Some(val.to_string()),
            _ => {}
        }
    }
    (proto, host)
}

fn same_authority(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
        && a.port_or_known_default() == b.port_or_known_default()
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            name == "localhost" || name.ends_with(".localhost") || name.ends_with(".local")
        }
        Host::Ipv4(ip) => is_private_v4(*ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

const fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn hints(host: &str) -> OriginHints {
        OriginHints {
            host: Some(host.to_string()),
            ..OriginHints::default()
        }
    }

    fn dev(public: Option<&str>) -> OriginResolver {
        OriginResolver::new(public, Environment::Development, true)
    }

    #[test]
    fn configured_url_wins_and_keeps_path_prefix() {
        let origin = dev(Some("https://ota.example.com/base/"))
            .resolve(&hints("ota.example.com"))
            .unwrap();
        assert_eq!(origin.source, OriginSource::Configured);
        assert_eq!(origin.base(), "https://ota.example.com/base");
        // Request came in over http (no proxy headers), so it disagrees.
        assert!(origin.mismatch);
    }

    #[test]
    fn configured_url_matching_request_is_not_a_mismatch() {
        let h = OriginHints {
            host: Some("internal:8080".into()),
            forwarded_proto: Some("https".into()),
            forwarded_host: Some("OTA.example.com".into()),
            ..OriginHints::default()
        };
        let origin = dev(Some("https://ota.example.com")).resolve(&h).unwrap();
        assert!(!origin.mismatch);
    }

    #[test]
    fn invalid_configured_url_is_reported_on_every_resolve() {
        for bad in ["not a url", "ftp://files.example.com", "localhost:3000", "https://"] {
            let resolver = dev(Some(bad));
            assert!(resolver.config_error().is_some(), "{bad}");
            assert!(matches!(
                resolver.resolve(&hints("a.example.com")).unwrap_err(),
                OriginError::InvalidPublicUrl(_)
            ));
        }
    }

    #[test]
    fn blank_configured_url_counts_as_unset() {
        let origin = dev(Some("  ")).resolve(&hints("a.example.com")).unwrap();
        assert_eq!(origin.source, OriginSource::Request);
    }

    #[test]
    fn x_forwarded_headers_use_first_hop() {
        let h = OriginHints {
            host: Some("10.0.0.5:3000".into()),
            forwarded_proto: Some("https, http".into()),
            forwarded_host: Some("ota.example.com, proxy.internal".into()),
            ..OriginHints::default()
        };
        let origin = dev(None).resolve(&h).unwrap();
        assert_eq!(origin.source, OriginSource::Forwarded);
        assert_eq!(origin.base(), "https://ota.example.com");
    }

    #[test]
    fn rfc7239_forwarded_takes_precedence() {
        let h = OriginHints {
            host: Some("backend:3000".into()),
            forwarded: Some(r#"for=192.0.2.60;proto=https;host="ota.example.com", for=10.0.0.1"#.into()),
            forwarded_proto: Some("http".into()),
            forwarded_host: Some("wrong.example.com".into()),
        };
        let origin = dev(None).resolve(&h).unwrap();
        assert_eq!(origin.base(), "https://ota.example.com");
    }

    #[test]
    fn proxy_headers_ignored_when_untrusted() {
        let h = OriginHints {
            host: Some("app.example.com".into()),
            forwarded_proto: Some("https".into()),
            forwarded_host: Some("evil.example.com".into()),
            ..OriginHints::default()
        };
        let resolver = OriginResolver::new(None, Environment::Development, false);
        let origin = resolver.resolve(&h).unwrap();
        assert_eq!(origin.source, OriginSource::Request);
        assert_eq!(origin.base(), "http://app.example.com");
    }

    #[test]
    fn missing_host_is_an_error() {
        assert_eq!(
            dev(None).resolve(&OriginHints::default()).unwrap_err(),
            OriginError::MissingHost
        );
    }

    #[test]
    fn production_rejects_plain_http() {
        let resolver = OriginResolver::new(None, Environment::Production, true);
        assert!(matches!(
            resolver.resolve(&hints("ota.example.com")).unwrap_err(),
            OriginError::InsecureOrigin(_)
        ));

        let configured =
            OriginResolver::new(Some("http://ota.example.com"), Environment::Production, true);
        assert!(matches!(
            configured.resolve(&hints("ota.example.com")).unwrap_err(),
            OriginError::InsecureOrigin(_)
        ));
    }

    #[test]
    fn private_hosts_are_flagged_independently_of_scheme() {
        let resolver = OriginResolver::new(None, Environment::Production, true);
        let h = OriginHints {
            host: Some("192.168.1.20:8443".into()),
            forwarded_proto: Some("https".into()),
            ..OriginHints::default()
        };
        let origin = resolver.resolve(&h).unwrap();
        assert!(origin.is_private_host());

        for host in [
            "localhost:3000",
            "devbox.local",
            "api.localhost",
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "169.254.10.10",
            "[::1]",
            "[fd12:3456::1]",
            "[fe80::1]",
            "[::ffff:192.168.0.1]",
        ] {
            let origin = dev(None).resolve(&hints(host)).unwrap();
            assert!(origin.is_private_host(), "{host} should be private");
        }
        for host in ["ota.example.com", "203.0.113.9", "[2001:db8::1]"] {
            let origin = dev(None).resolve(&hints(host)).unwrap();
            assert!(!origin.is_private_host(), "{host} should be public");
        }
    }

    #[test]
    fn endpoint_encodes_segments_and_token() {
        let origin = dev(Some("https://ota.example.com/base"))
            .resolve(&OriginHints::default())
            .unwrap();
        assert_eq!(
            origin.endpoint(&["api", "releases", "rel 1", "manifest"], Some("abc.def")),
            "https://ota.example.com/base/api/releases/rel%201/manifest?token=abc.def"
        );
        assert_eq!(
            origin.endpoint(&["api", "releases", "r1", "download"], None),
            "https://ota.example.com/base/api/releases/r1/download"
        );
    }
}
