//! Artifact blob storage.
//!
//! The install path only needs to read and probe blobs; `put` and `delete`
//! exist for the upload side and for tests. Backends are constructed once at
//! startup and shared as `Arc<dyn BlobStore>`.

pub mod filesystem;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use buildrop_core::config::{StorageBackendKind, StorageConfig};
use bytes::Bytes;

pub use filesystem::FilesystemStore;
pub use s3::S3Store;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage configuration error: {0}")]
    Config(String),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Storage backend for uploaded artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, content: Bytes) -> BlobResult<()>;

    /// Fetch a blob. A missing key is [`BlobError::NotFound`].
    async fn get(&self, key: &str) -> BlobResult<Bytes>;

    /// Stored length in bytes. A missing key is [`BlobError::NotFound`].
    async fn size(&self, key: &str) -> BlobResult<u64>;

    async fn delete(&self, key: &str) -> BlobResult<()>;
}

/// Build the configured backend.
pub fn from_config(config: &StorageConfig) -> BlobResult<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackendKind::Filesystem => {
            tracing::info!(path = %config.path.display(), "Using filesystem artifact storage");
            Ok(Arc::new(FilesystemStore::new(&config.path)))
        }
        StorageBackendKind::S3 => {
            let settings = config
                .s3
                .as_ref()
                .ok_or_else(|| BlobError::Config("S3 backend selected without settings".into()))?;
            tracing::info!(bucket = %settings.bucket, region = %settings.region, "Using S3 artifact storage");
            Ok(Arc::new(S3Store::new(settings)?))
        }
    }
}
