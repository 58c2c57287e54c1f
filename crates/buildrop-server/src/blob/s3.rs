//! S3-compatible backend (AWS, MinIO and friends).

use async_trait::async_trait;
use buildrop_core::config::S3Settings;
use bytes::Bytes;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;

use super::{BlobError, BlobResult, BlobStore};

pub struct S3Store {
    bucket: Box<Bucket>,
    prefix: Option<String>,
}

impl S3Store {
    /// Connect using credentials from the environment or instance profile.
    ///
    /// A custom endpoint implies path-style addressing.
    pub fn new(settings: &S3Settings) -> BlobResult<Self> {
        let credentials = Credentials::default()
            .map_err(|e| BlobError::Config(format!("Failed to load S3 credentials: {e}")))?;

        let region = match &settings.endpoint {
            Some(endpoint) => Region::Custom {
                region: settings.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => settings
                .region
                .parse()
                .map_err(|_| BlobError::Config(format!("Invalid S3 region: {}", settings.region)))?,
        };

        let bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(|e| BlobError::Config(format!("Failed to create S3 bucket: {e}")))?;
        let bucket = if settings.endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self {
            bucket,
            prefix: settings.prefix.clone(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        full_key(self.prefix.as_deref(), key)
    }
}

fn full_key(prefix: Option<&str>, key: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}/{}", key.trim_start_matches('/')),
        None => key.trim_start_matches('/').to_string(),
    }
}

/// Depending on client features a missing object surfaces either as an
/// error carrying the status or as a response with a 404 status.
fn is_not_found(e: &s3::error::S3Error) -> bool {
    let text = e.to_string();
    text.contains("404") || text.contains("NoSuchKey") || text.contains("Not Found")
}

fn check_status(key: &str, status: u16) -> BlobResult<()> {
    match status {
        200..=299 => Ok(()),
        404 => Err(BlobError::NotFound(key.to_string())),
        other => Err(BlobError::Backend(format!(
            "S3 returned status {other} for '{key}'"
        ))),
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn put(&self, key: &str, content: Bytes) -> BlobResult<()> {
        let response = self
            .bucket
            .put_object(self.full_key(key), &content)
            .await
            .map_err(|e| BlobError::Backend(format!("Failed to put object '{key}': {e}")))?;
        check_status(key, response.status_code())?;

        tracing::debug!(key, size = content.len(), "S3 put object successful");
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        let response = match self.bucket.get_object(self.full_key(key)).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Err(BlobError::NotFound(key.to_string())),
            Err(e) => {
                return Err(BlobError::Backend(format!(
                    "Failed to get object '{key}': {e}"
                )));
            }
        };
        check_status(key, response.status_code())?;

        tracing::debug!(key, size = response.bytes().len(), "S3 get object successful");
        Ok(Bytes::from(response.to_vec()))
    }

    async fn size(&self, key: &str) -> BlobResult<u64> {
        let (head, status) = match self.bucket.head_object(self.full_key(key)).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Err(BlobError::NotFound(key.to_string())),
            Err(e) => {
                return Err(BlobError::Backend(format!(
                    "Failed to read metadata of '{key}': {e}"
                )));
            }
        };
        check_status(key, status)?;

        head.content_length
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| BlobError::Backend(format!("S3 reported no length for '{key}'")))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let response = self
            .bucket
            .delete_object(self.full_key(key))
            .await
            .map_err(|e| BlobError::Backend(format!("Failed to delete object '{key}': {e}")))?;
        check_status(key, response.status_code())?;

        tracing::debug!(key, "S3 delete object successful");
        Ok(())
    }
}
