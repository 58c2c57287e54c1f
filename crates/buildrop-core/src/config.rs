//! Configuration resolution for buildrop.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. JSON config file (`--config <path>`)
//! 3. Environment variables
//! 4. CLI arguments (applied by the binary, highest priority)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Complete buildrop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ota: OtaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener and database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_path: PathBuf::from("./data/buildrop.db"),
        }
    }
}

/// Deployment environment. Production turns on HTTPS and public-host
/// enforcement for install origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        })
    }
}

/// Over-the-air install settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// OTA-specific signing secret. Preferred over `app_secret`.
    pub token_secret: Option<String>,
    /// Shared application secret (also keys session JWTs).
    pub app_secret: Option<String>,
    /// Link lifetime used when the caller does not ask for one.
    pub default_ttl_secs: u64,
    /// Explicit externally reachable base URL, e.g. `https://ota.example.com`.
    pub public_url: Option<String>,
    pub environment: Environment,
    /// Honour `Forwarded` / `X-Forwarded-*` headers from a reverse proxy.
    pub trust_proxy_headers: bool,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            app_secret: None,
            default_ttl_secs: 3600,
            public_url: None,
            environment: Environment::Development,
            trust_proxy_headers: true,
        }
    }
}

/// Which blob store holds uploaded artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Filesystem,
    S3,
}

impl FromStr for StorageBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "local" => Ok(Self::Filesystem),
            "s3" => Ok(Self::S3),
            other => Err(Error::UnknownVariant {
                kind: "storage backend",
                value: other.to_string(),
            }),
        }
    }
}

/// S3-compatible bucket settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct S3Settings {
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO etc.).
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

/// Artifact storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Root directory for the filesystem backend.
    pub path: PathBuf,
    pub s3: Option<S3Settings>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Filesystem,
            path: PathBuf::from("./data/artifacts"),
            s3: None,
        }
    }
}

/// Whether uploads are introspected before responding or handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    #[default]
    Inline,
    Queued,
}

impl FromStr for IngestMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "queued" | "queue" => Ok(Self::Queued),
            other => Err(Error::UnknownVariant {
                kind: "ingest mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Binary introspection pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub mode: IngestMode,
    pub queue_capacity: usize,
    pub max_attempts: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::Inline,
            queue_capacity: 64,
            max_attempts: 3,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "buildrop_server=info,buildrop_inspect=info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.ota.default_ttl_secs == 0 {
            return Err(Error::Config(
                "ota.default_ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.storage.backend == StorageBackendKind::S3
            && self.storage.s3.as_ref().is_none_or(|s3| s3.bucket.is_empty())
        {
            return Err(Error::Config(
                "storage.backend = s3 requires storage.s3.bucket (or S3_BUCKET)".to_string(),
            ));
        }
        if self.ingest.max_attempts == 0 {
            return Err(Error::Config(
                "ingest.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(config_file: Option<&Path>) -> Result<Config> {
    let mut config = match config_file {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("BUILDROP_LISTEN_ADDR") {
        config.server.listen_addr = parse_env("BUILDROP_LISTEN_ADDR", &val)?;
    }
    if let Some(val) = non_empty(lookup("BUILDROP_DATABASE_PATH")) {
        config.server.database_path = PathBuf::from(val);
    }

    if let Some(val) = non_empty(lookup("OTA_TOKEN_SECRET")) {
        config.ota.token_secret = Some(val);
    }
    if let Some(val) = non_empty(lookup("APP_SECRET")) {
        config.ota.app_secret = Some(val);
    }
    if let Some(val) = lookup("OTA_TOKEN_TTL_SECS") {
        config.ota.default_ttl_secs = parse_env("OTA_TOKEN_TTL_SECS", &val)?;
    }
    if let Some(val) = non_empty(lookup("PUBLIC_BASE_URL")) {
        config.ota.public_url = Some(val);
    }
    if let Some(val) = lookup("APP_ENV") {
        config.ota.environment = parse_env("APP_ENV", &val)?;
    }
    if let Some(val) = lookup("BUILDROP_TRUST_PROXY") {
        config.ota.trust_proxy_headers = parse_env("BUILDROP_TRUST_PROXY", &val)?;
    }

    if let Some(val) = lookup("STORAGE_BACKEND") {
        config.storage.backend = val.parse()?;
    }
    if let Some(val) = non_empty(lookup("STORAGE_PATH")) {
        config.storage.path = PathBuf::from(val);
    }
    if let Some(bucket) = non_empty(lookup("S3_BUCKET")) {
        let s3 = config.storage.s3.get_or_insert_with(S3Settings::default);
        s3.bucket = bucket;
        s3.region = non_empty(lookup("S3_REGION")).unwrap_or_else(default_s3_region);
        s3.endpoint = non_empty(lookup("S3_ENDPOINT"));
        s3.prefix = non_empty(lookup("S3_PREFIX"));
    }

    if let Some(val) = lookup("INGEST_MODE") {
        config.ingest.mode = val.parse()?;
    }
    if let Some(val) = lookup("INGEST_QUEUE_CAPACITY") {
        config.ingest.queue_capacity = parse_env("INGEST_QUEUE_CAPACITY", &val)?;
    }
    if let Some(val) = lookup("INGEST_MAX_ATTEMPTS") {
        config.ingest.max_attempts = parse_env("INGEST_MAX_ATTEMPTS", &val)?;
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_development_inline_filesystem() {
        let config = Config::default();
        assert_eq!(config.ota.environment, Environment::Development);
        assert_eq!(config.ota.default_ttl_secs, 3600);
        assert!(config.ota.trust_proxy_headers);
        assert_eq!(config.ingest.mode, IngestMode::Inline);
        assert_eq!(config.storage.backend, StorageBackendKind::Filesystem);
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_secrets_and_environment() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[
                ("OTA_TOKEN_SECRET", "ota"),
                ("APP_SECRET", "app"),
                ("APP_ENV", "production"),
                ("PUBLIC_BASE_URL", "https://ota.example.com"),
                ("OTA_TOKEN_TTL_SECS", "900"),
            ]),
        )
        .unwrap();

        assert_eq!(config.ota.token_secret.as_deref(), Some("ota"));
        assert_eq!(config.ota.app_secret.as_deref(), Some("app"));
        assert!(config.ota.environment.is_production());
        assert_eq!(config.ota.public_url.as_deref(), Some("https://ota.example.com"));
        assert_eq!(config.ota.default_ttl_secs, 900);
    }

    #[test]
    fn blank_secret_is_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, lookup_from(&[("OTA_TOKEN_SECRET", "  ")])).unwrap();
        assert!(config.ota.token_secret.is_none());
    }

    #[test]
    fn invalid_ttl_is_a_config_error() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, lookup_from(&[("OTA_TOKEN_TTL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn s3_env_populates_bucket_settings() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[
                ("STORAGE_BACKEND", "s3"),
                ("S3_BUCKET", "builds"),
                ("S3_ENDPOINT", "http://minio:9000"),
            ]),
        )
        .unwrap();

        let s3 = config.storage.s3.as_ref().unwrap();
        assert_eq!(s3.bucket, "builds");
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(s3.endpoint.as_deref(), Some("http://minio:9000"));
        config.validate().unwrap();
    }

    #[test]
    fn s3_backend_without_bucket_fails_validation() {
        let mut config = Config::default();
        config.storage.backend = StorageBackendKind::S3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_file_fills_missing_sections_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildrop.json");
        std::fs::write(
            &path,
            r#"{"ota": {"public_url": "https://ota.example.com", "environment": "production"}}"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert!(config.ota.environment.is_production());
        assert_eq!(config.ota.default_ttl_secs, 3600);
        assert_eq!(config.ingest.max_attempts, 3);
    }

    #[test]
    fn environment_parse_is_lenient() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("staging".parse::<Environment>().unwrap(), Environment::Development);
    }
}
